pub mod hw;
pub mod logging;

pub use hw::coreaudio::{DeviceController, DeviceError, RenderSource};
