//! Utility modules for device management.

mod device;

pub use device::{get_device, parse_dtype, Device, DType};
