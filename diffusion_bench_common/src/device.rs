use crate::core::Device;
use tracing::info;

/// Pick the device to run on: Metal when built with the `metal` feature, otherwise the first CUDA
/// device if one is available, otherwise the CPU.
pub fn best_device(silent: bool) -> anyhow::Result<Device> {
    #[cfg(not(feature = "metal"))]
    let device = Device::cuda_if_available(0)?;
    #[cfg(feature = "metal")]
    let device = Device::new_metal(0)?;

    if !silent {
        info!("running on {device:?}");
    }
    Ok(device)
}
