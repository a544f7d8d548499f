mod device;
mod progress;

/// Tensor primitives used throughout the workspace.
pub use candle_core as core;

pub use device::best_device;
pub use progress::NiceProgressBar;
