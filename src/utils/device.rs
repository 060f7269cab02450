//! Device and data type utilities.

use candle_core::{Device as CandleDevice, DType as CandleDType};

/// Re-export candle Device for convenience
pub type Device = CandleDevice;

/// Re-export candle DType for convenience
pub type DType = CandleDType;

/// Get the best available device (CUDA > Metal > CPU)
#[allow(unused_variables)]
pub fn get_device(device_id: Option<usize>) -> crate::Result<Device> {
    #[cfg(feature = "cuda")]
    {
        let id = device_id.unwrap_or(0);
        match CandleDevice::new_cuda(id) {
            Ok(device) => {
                tracing::info!("Using CUDA device {}", id);
                return Ok(device);
            }
            Err(e) => {
                tracing::warn!("CUDA not available: {}", e);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        match CandleDevice::new_metal(device_id.unwrap_or(0)) {
            Ok(device) => {
                tracing::info!("Using Metal device");
                return Ok(device);
            }
            Err(e) => {
                tracing::warn!("Metal not available: {}", e);
            }
        }
    }

    tracing::info!("Using CPU device");
    Ok(CandleDevice::Cpu)
}

/// Parse a dtype name such as `f32`, `f16` or `bf16`
pub fn parse_dtype(dtype_str: &str) -> crate::Result<DType> {
    match dtype_str.to_lowercase().as_str() {
        "f32" | "float32" | "float" => Ok(CandleDType::F32),
        "f16" | "float16" | "half" => Ok(CandleDType::F16),
        "bf16" | "bfloat16" => Ok(CandleDType::BF16),
        other => Err(crate::ParrotError::InvalidArgument(format!(
            "unknown dtype '{}', expected f32, f16 or bf16",
            other
        ))),
    }
}
