pub mod config;
pub mod coreaudio;
pub mod error_fmt;
pub mod options;

pub use self::options::{ControllerOptions, DeviceSettings};
