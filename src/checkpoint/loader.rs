//! Safetensors checkpoint loading with memory mapping.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use safetensors::SafeTensors;

use super::{check_files, CheckpointLoader, LoadedCheckpoint, CONFIG_FILE, WEIGHTS_FILE};
use crate::config::ModelConfig;
use crate::model::ParrotModel;
use crate::tokenizer::HfTokenizer;

/// Loads Parrot checkpoints stored as safetensors.
#[derive(Debug, Clone)]
pub struct SafetensorsLoader {
    /// Device to load tensors to
    device: Device,
    /// Data type for tensors
    dtype: DType,
}

impl SafetensorsLoader {
    pub fn new(device: Device, dtype: DType) -> Self {
        Self { device, dtype }
    }

    /// Read every tensor in a safetensors file, converted to the loader's dtype and device
    pub fn load_weights(&self, path: impl AsRef<Path>) -> crate::Result<HashMap<String, Tensor>> {
        let path = path.as_ref();
        tracing::debug!("Loading weights: {:?}", path);

        // Memory-map the file
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };

        let safetensors = SafeTensors::deserialize(&mmap)
            .map_err(|e| crate::ParrotError::Checkpoint(format!("{}: {}", path.display(), e)))?;

        let mut tensors = HashMap::new();
        for (name, view) in safetensors.tensors() {
            let tensor = self
                .load_tensor(&view)
                .map_err(|e| crate::ParrotError::Checkpoint(format!("tensor {}: {}", name, e)))?;
            tensors.insert(name, tensor);
        }

        tracing::debug!("Loaded {} tensors", tensors.len());
        Ok(tensors)
    }

    fn load_tensor(&self, view: &safetensors::tensor::TensorView<'_>) -> crate::Result<Tensor> {
        let dtype = convert_safetensor_dtype(view.dtype())?;
        let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), &Device::Cpu)?;

        // Convert dtype and move to device
        let tensor = tensor.to_dtype(self.dtype)?;
        Ok(tensor.to_device(&self.device)?)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

impl CheckpointLoader for SafetensorsLoader {
    fn load(&self, checkpoint_dir: &Path) -> crate::Result<LoadedCheckpoint> {
        check_files(checkpoint_dir)?;

        let config = ModelConfig::from_file(checkpoint_dir.join(CONFIG_FILE))?;
        let tokenizer = HfTokenizer::from_dir(checkpoint_dir)?;

        let tensors = self.load_weights(checkpoint_dir.join(WEIGHTS_FILE))?;
        let vb = VarBuilder::from_tensors(tensors, self.dtype, &self.device);
        let model = ParrotModel::new(&config, vb).map_err(|e| match e {
            crate::ParrotError::ModelExecution(e) => {
                crate::ParrotError::Checkpoint(format!("incompatible weights: {}", e))
            }
            other => other,
        })?;

        tracing::info!(
            "Loaded checkpoint {:?} ({} layers, block size {})",
            checkpoint_dir,
            config.n_layer,
            config.block_size
        );

        Ok(LoadedCheckpoint {
            config,
            model: Box::new(model),
            tokenizer: Box::new(tokenizer),
        })
    }
}

/// Convert safetensor dtype to candle dtype
fn convert_safetensor_dtype(dtype: safetensors::Dtype) -> crate::Result<DType> {
    match dtype {
        safetensors::Dtype::F16 => Ok(DType::F16),
        safetensors::Dtype::BF16 => Ok(DType::BF16),
        safetensors::Dtype::F32 => Ok(DType::F32),
        safetensors::Dtype::F64 => Ok(DType::F64),
        safetensors::Dtype::I64 => Ok(DType::I64),
        safetensors::Dtype::U8 => Ok(DType::U8),
        safetensors::Dtype::U32 => Ok(DType::U32),
        other => Err(crate::ParrotError::Checkpoint(format!(
            "unsupported tensor dtype {:?}",
            other
        ))),
    }
}
