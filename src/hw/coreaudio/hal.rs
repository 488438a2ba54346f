//! Seams between the device controller and the CoreAudio HAL.
//!
//! `AudioHardware` is the per-device property and IOProc interface,
//! `AudioSystem` the process-wide audio configuration. `CoreAudioHal`
//! (macOS) implements both; tests drive the controller with doubles.

use super::address::{DeviceId, PropertyAddress};
use super::error::OsStatus;
use super::ioproc::RenderContext;
use std::sync::Arc;

/// Registration of an IOProc with the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoProcToken(pub u64);

/// Registration of a property listener with the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

/// Receives property-change notifications for a device. Called on a HAL
/// notification thread.
pub trait PropertyListener: Send + Sync {
    fn properties_changed(&self, device: DeviceId, addresses: &[PropertyAddress]);
}

impl<F> PropertyListener for F
where
    F: Fn(DeviceId, &[PropertyAddress]) + Send + Sync,
{
    fn properties_changed(&self, device: DeviceId, addresses: &[PropertyAddress]) {
        self(device, addresses)
    }
}

pub type HalResult<T> = Result<T, OsStatus>;

pub trait AudioHardware: Send + Sync {
    fn get_u32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<u32>;
    fn set_u32(&self, device: DeviceId, address: PropertyAddress, value: u32) -> HalResult<()>;

    fn get_i32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<i32>;
    fn set_i32(&self, device: DeviceId, address: PropertyAddress, value: i32) -> HalResult<()>;

    fn get_f32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<f32>;
    fn set_f32(&self, device: DeviceId, address: PropertyAddress, value: f32) -> HalResult<()>;

    fn get_f64(&self, device: DeviceId, address: PropertyAddress) -> HalResult<f64>;
    fn set_f64(&self, device: DeviceId, address: PropertyAddress, value: f64) -> HalResult<()>;

    fn is_settable(&self, device: DeviceId, address: PropertyAddress) -> HalResult<bool>;

    fn get_string(&self, device: DeviceId, address: PropertyAddress) -> HalResult<String>;

    /// Read a property holding an array of 32-bit ids (streams, data sources).
    fn get_u32_list(&self, device: DeviceId, address: PropertyAddress) -> HalResult<Vec<u32>>;

    /// Read an `AudioBufferList` property and return the channel count of
    /// each buffer.
    fn get_buffer_channels(
        &self,
        device: DeviceId,
        address: PropertyAddress,
    ) -> HalResult<Vec<u32>>;

    /// Read a variable-size property as raw bytes.
    fn get_bytes(&self, device: DeviceId, address: PropertyAddress) -> HalResult<Vec<u8>>;

    /// Register an IOProc that dispatches into `context` on the device's
    /// IO thread. The HAL keeps `context` alive until the IOProc is destroyed.
    fn create_io_proc(
        &self,
        device: DeviceId,
        context: Arc<RenderContext>,
    ) -> HalResult<IoProcToken>;
    fn destroy_io_proc(&self, device: DeviceId, proc_id: IoProcToken) -> HalResult<()>;

    fn start(&self, device: DeviceId, proc_id: Option<IoProcToken>) -> HalResult<()>;
    fn stop(&self, device: DeviceId, proc_id: Option<IoProcToken>) -> HalResult<()>;

    fn add_property_listener(
        &self,
        device: DeviceId,
        address: PropertyAddress,
        listener: Arc<dyn PropertyListener>,
    ) -> HalResult<ListenerToken>;
    fn remove_property_listener(
        &self,
        device: DeviceId,
        address: PropertyAddress,
        token: ListenerToken,
    ) -> HalResult<()>;

    /// Pid of the calling process, as the HAL reports hog-mode owners.
    fn process_id(&self) -> i32 {
        std::process::id() as i32
    }
}

pub trait AudioSystem: Send + Sync {
    /// Allow or forbid the HAL from handing out hog mode automatically.
    fn set_auto_hog_mode(&self, enabled: bool) -> HalResult<()>;
}
