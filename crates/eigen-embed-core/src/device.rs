//! Accelerator discovery and data placement.

use candle_core::{Device, Tensor};
use tracing::{info, warn};

use crate::error::EmbedResult;

/// True when `device` is fast (accelerator) memory rather than host memory.
pub fn is_accelerated(device: &Device) -> bool {
    device.is_cuda() || device.is_metal()
}

/// Pick the compute device.
///
/// Requesting an accelerator on a machine without one is not an error: the
/// request is downgraded to the host with a warning.
pub fn select_device(use_accelerator: bool, device_id: usize) -> Device {
    if !use_accelerator {
        return Device::Cpu;
    }
    match Device::cuda_if_available(device_id) {
        Ok(dev) if dev.is_cuda() => {
            info!(device_id, "CUDA device detected, using GPU acceleration");
            dev
        }
        Ok(_) => {
            warn!("GPU use requested, but GPU not available. Toggling off GPU use.");
            Device::Cpu
        }
        Err(e) => {
            warn!(error = %e, "Failed to initialize CUDA, toggling off GPU use");
            Device::Cpu
        }
    }
}

/// Move a dense tensor to `device` as one blocking transfer.
/// Returns the same tensor when it is already there.
pub fn place(tensor: &Tensor, device: &Device) -> EmbedResult<Tensor> {
    if tensor.device().same_device(device) {
        return Ok(tensor.clone());
    }
    Ok(tensor.to_device(device)?)
}
