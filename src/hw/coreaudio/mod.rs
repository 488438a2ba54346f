pub mod address;
pub mod controller;
pub mod error;
pub mod hal;
pub mod ioproc;
pub mod latency;
#[cfg(target_os = "macos")]
pub mod system;

pub use self::address::{DeviceId, Pid, PropertyAddress};
pub use self::controller::{DeviceController, ExclusiveAccess};
pub use self::error::DeviceError;
pub use self::hal::{AudioHardware, AudioSystem, PropertyListener};
pub use self::ioproc::{AudioBuffer, RenderContext, RenderSource, TimeHint};
#[cfg(target_os = "macos")]
pub use self::system::CoreAudioHal;
