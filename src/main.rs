//! Parrot CLI - sample text from a pre-trained GPT-NeoX style checkpoint.
//!
//! Samples are printed to stdout, one per line; everything else goes to stderr.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use rs_parrot::{
    checkpoint::CONFIG_FILE,
    generation::CancelToken,
    utils::{get_device, parse_dtype},
    GenerationConfig, GenerationDriver, ModelConfig, SafetensorsLoader, SampleRequest,
};

#[derive(Parser)]
#[command(name = "parrot")]
#[command(author, version, about = "Generates text samples based on a pre-trained model and tokenizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generates text samples based on a pre-trained model and tokenizer
    Generate {
        /// The prompt string to use for generating the samples
        #[arg(short, long, default_value = "Hello, my name is")]
        prompt: String,

        /// The number of text samples to generate
        #[arg(long, default_value = "1")]
        num_samples: usize,

        /// The number of generation steps to take
        #[arg(long, default_value = "50")]
        max_new_tokens: usize,

        /// Cap on the total sequence length, prompt included
        #[arg(long)]
        max_seq_length: Option<usize>,

        /// Sample only from the top-k most likely tokens (0 disables the filter)
        #[arg(long, default_value = "200")]
        top_k: usize,

        /// Scales the predicted logits (higher = more random)
        #[arg(long, default_value = "0.8")]
        temperature: f32,

        /// Directory containing the checkpoint and tokenizer files
        #[arg(long, env = "PARROT_CHECKPOINT_DIR", default_value = "checkpoints/stabilityai/stablelm-base-alpha-3b")]
        checkpoint_dir: PathBuf,

        /// Random seed (sample i uses seed + i)
        #[arg(long)]
        seed: Option<u64>,

        /// Stop a sample when the end-of-sequence token is produced
        #[arg(long)]
        stop_at_eos: bool,

        /// GPU device ID (auto-detect if not specified)
        #[arg(long)]
        device: Option<usize>,

        /// Weight precision: f32, f16 or bf16
        #[arg(long, default_value = "f32")]
        dtype: String,

        /// Abort generation after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Show the configuration of a checkpoint
    Info {
        /// Directory containing lit_config.json
        #[arg(long, env = "PARROT_CHECKPOINT_DIR")]
        checkpoint_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only samples
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rs_parrot=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            prompt,
            num_samples,
            max_new_tokens,
            max_seq_length,
            top_k,
            temperature,
            checkpoint_dir,
            seed,
            stop_at_eos,
            device,
            dtype,
            timeout_secs,
        } => {
            let generation = GenerationConfig {
                max_new_tokens,
                max_seq_length,
                temperature,
                top_k: top_k_option(top_k),
                stop_token: None,
                seed,
            };
            let request = SampleRequest::new(prompt, num_samples, generation).with_stop_at_eos(stop_at_eos);

            generate(request, &checkpoint_dir, device, &dtype, timeout_secs).await?;
        }

        Commands::Info { checkpoint_dir } => {
            show_info(&checkpoint_dir)?;
        }
    }

    Ok(())
}

/// `--top-k 0` turns the filter off
fn top_k_option(top_k: usize) -> Option<usize> {
    (top_k > 0).then_some(top_k)
}

async fn generate(
    request: SampleRequest,
    checkpoint_dir: &Path,
    device_id: Option<usize>,
    dtype: &str,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let device = get_device(device_id)?;
    let dtype = parse_dtype(dtype)?;

    eprintln!("Loading model {:?}", checkpoint_dir);
    let loader = SafetensorsLoader::new(device, dtype);
    let driver = GenerationDriver::from_checkpoint(&loader, checkpoint_dir)?;
    if let Some(config) = driver.config() {
        eprintln!("{}", config);
    }

    let mut cancel = CancelToken::new();
    if let Some(secs) = timeout_secs {
        cancel = cancel.with_timeout(Duration::from_secs(secs));
    }

    let pb = if request.num_samples > 1 {
        let pb = ProgressBar::new(request.num_samples as u64);
        pb.set_style(
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} samples")?,
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let worker_cancel = cancel.clone();
    let mut handle = tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::stdout().lock();
        let result = driver.run(&request, &mut stdout, &worker_cancel, |_| pb.inc(1));
        pb.finish_and_clear();
        result
    });

    let samples = tokio::select! {
        result = &mut handle => result??,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, stopping after the current step");
            cancel.cancel();
            handle.await??
        }
    };

    tracing::debug!("Generated {} samples", samples.len());
    Ok(())
}

fn show_info(checkpoint_dir: &Path) -> anyhow::Result<()> {
    let config = ModelConfig::from_file(checkpoint_dir.join(CONFIG_FILE))?;

    println!("Model Information");
    println!("=================");
    println!("Block size: {}", config.block_size);
    println!("Vocab size: {}", config.vocab_size);
    println!("Padded vocab size: {}", config.padded_vocab_size());
    println!("Num layers: {}", config.n_layer);
    println!("Num attention heads: {}", config.n_head);
    println!("Embedding dim: {}", config.n_embd);
    println!("Head size: {}", config.head_size());
    println!("Rotary dims per head: {}", config.rope_n_elem());
    println!("Parallel residual: {}", config.parallel_residual);
    println!("Bias: {}", config.bias);

    let n_embd = config.n_embd;
    let params_per_layer = 4 * n_embd * n_embd  // QKV + output projection
        + 8 * n_embd * n_embd; // MLP
    let total_params = 2 * config.padded_vocab_size() * n_embd  // embeddings + lm_head
        + params_per_layer * config.n_layer;

    println!("\nEstimated Parameters");
    println!("====================");
    println!("Per layer: ~{:.1}M", params_per_layer as f64 / 1e6);
    println!("Total: ~{:.2}B", total_params as f64 / 1e9);
    println!("Memory (F32): ~{:.1} GB", (total_params * 4) as f64 / 1e9);
    println!("Memory (F16): ~{:.1} GB", (total_params * 2) as f64 / 1e9);

    Ok(())
}
