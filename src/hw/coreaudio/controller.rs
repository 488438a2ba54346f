//! Output device controller.
//!
//! Binds to one CoreAudio device, negotiates device-level settings, owns the
//! IOProc that pulls samples from a [`RenderSource`], and puts every setting
//! it changed back when the device is released.
//!
//! Restore bookkeeping is deliberately asymmetric: mixing and nominal sample
//! rate are captured on the first change this controller makes, the buffer
//! frame size is captured unconditionally at open.

use super::address::{DeviceId, NO_HOG_OWNER, Pid, PropertyAddress, selector};
use super::error::DeviceError;
use super::hal::{AudioHardware, AudioSystem, IoProcToken, ListenerToken, PropertyListener};
use super::ioproc::{RenderContext, RenderSource};
use super::latency::query_output_latency;
use crate::hw::error_fmt::os_status;
use crate::hw::options::{ControllerOptions, DeviceSettings};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What this controller believes about hog-mode ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExclusiveAccess {
    #[default]
    Unset,
    Held,
    /// Released; carries the owner the HAL reported afterwards.
    NotHeld(Pid),
}

pub struct DeviceController {
    hw: Arc<dyn AudioHardware>,
    system: Arc<dyn AudioSystem>,
    options: ControllerOptions,
    device_id: Option<DeviceId>,
    started: bool,
    render: Arc<RenderContext>,
    io_proc: Option<IoProcToken>,
    listener: Option<ListenerToken>,
    exclusive: ExclusiveAccess,
    mixing_restore: Option<bool>,
    sample_rate_restore: Option<f64>,
    buffer_size_restore: Option<u32>,
}

impl DeviceController {
    pub fn new(hw: Arc<dyn AudioHardware>, system: Arc<dyn AudioSystem>) -> Self {
        Self::with_options(hw, system, ControllerOptions::from_env())
    }

    pub fn with_options(
        hw: Arc<dyn AudioHardware>,
        system: Arc<dyn AudioSystem>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            hw,
            system,
            options,
            device_id: None,
            started: false,
            render: Arc::new(RenderContext::new()),
            io_proc: None,
            listener: None,
            exclusive: ExclusiveAccess::Unset,
            mixing_restore: None,
            sample_rate_restore: None,
            buffer_size_restore: None,
        }
    }

    /// Construct and open in one step.
    pub fn with_device(
        hw: Arc<dyn AudioHardware>,
        system: Arc<dyn AudioSystem>,
        device: DeviceId,
    ) -> Result<Self, DeviceError> {
        let mut controller = Self::new(hw, system);
        controller.open(device)?;
        Ok(controller)
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.device_id
    }

    /// Whether this controller has started the IOProc. See
    /// [`is_running`](Self::is_running) for what the hardware reports.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn has_render_source(&self) -> bool {
        self.io_proc.is_some()
    }

    pub fn exclusive_access_state(&self) -> ExclusiveAccess {
        self.exclusive
    }

    pub fn render_context(&self) -> &Arc<RenderContext> {
        &self.render
    }

    fn bound(&self) -> Result<DeviceId, DeviceError> {
        self.device_id.ok_or(DeviceError::Unbound)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Bind to `device` and snapshot its buffer frame size as the baseline
    /// restored on close. Re-opening a bound controller is the caller's
    /// problem.
    pub fn open(&mut self, device: DeviceId) -> Result<(), DeviceError> {
        if device == 0 {
            return Err(DeviceError::InvalidArgument("device id"));
        }
        self.device_id = Some(device);
        let frames = self.buffer_size();
        self.buffer_size_restore = (frames != 0).then_some(frames);
        debug!("Opened CoreAudio device {device:#06x}");
        Ok(())
    }

    /// Release the device. Every restore step is attempted even when an
    /// earlier one fails.
    pub fn close(&mut self) {
        let Some(device) = self.device_id else {
            return;
        };

        let _ = self.stop();

        if self.io_proc.is_some()
            && let Err(e) = self.set_render_source(None, 0, 0)
        {
            error!("Failed to detach render source from device {device:#06x}: {e}");
        }

        if let Err(e) = self.set_exclusive_access(false) {
            error!("Failed to release hog mode on device {device:#06x}: {e}");
        }
        if let Err(status) = self.system.set_auto_hog_mode(false) {
            error!("Failed to disable auto hog mode: {}", os_status(status));
        }

        if let Some(mixing) = self.mixing_restore {
            debug!("Restoring original mixing support on device {device:#06x}");
            if let Err(e) = self.set_mixing_enabled(mixing) {
                error!("Failed to restore mixing support on device {device:#06x}: {e}");
            }
        }
        self.mixing_restore = None;

        if let Some(rate) = self.sample_rate_restore {
            debug!("Restoring original nominal sample rate {rate:.0} on device {device:#06x}");
            if let Err(e) = self.set_nominal_sample_rate(rate) {
                error!("Failed to restore sample rate on device {device:#06x}: {e}");
            }
        }
        self.sample_rate_restore = None;

        if let Some(frames) = self.buffer_size_restore
            && frames != self.buffer_size()
        {
            debug!("Restoring original buffer size {frames} on device {device:#06x}");
            if let Err(e) = self.set_buffer_size(frames) {
                error!("Failed to restore buffer size on device {device:#06x}: {e}");
            }
        }
        self.buffer_size_restore = None;

        if let Some(token) = self.listener.take()
            && let Err(status) =
                self.hw
                    .remove_property_listener(device, PropertyAddress::wildcard(), token)
        {
            error!(
                "Failed to remove property listener from device {device:#06x}: {}",
                os_status(status)
            );
        }

        debug!("Closed CoreAudio device {device:#06x}");
        self.device_id = None;
        self.started = false;
        self.io_proc = None;
        self.exclusive = ExclusiveAccess::Unset;
        self.render.set_source(None);
    }

    pub fn start(&mut self) -> Result<(), DeviceError> {
        let Some(device) = self.device_id else {
            return Ok(());
        };
        if self.started {
            return Ok(());
        }
        let Some(proc_id) = self.io_proc else {
            debug!("No IOProc registered on device {device:#06x}; not starting");
            return Ok(());
        };
        self.hw.start(device, Some(proc_id)).map_err(|status| {
            error!(
                "Unable to start device {device:#06x}: {}",
                os_status(status)
            );
            DeviceError::hardware("AudioDeviceStart", status)
        })?;
        self.started = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), DeviceError> {
        let Some(device) = self.device_id else {
            return Ok(());
        };
        if !self.started {
            return Ok(());
        }
        self.hw.stop(device, self.io_proc).map_err(|status| {
            error!("Unable to stop device {device:#06x}: {}", os_status(status));
            DeviceError::hardware("AudioDeviceStop", status)
        })?;
        self.started = false;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Render source / IOProc
    // -----------------------------------------------------------------------

    /// Attach `source` (installing the IOProc and starting the device) or,
    /// with `None`, detach the current one. `frame_size` is the byte size of
    /// one frame in the output buffer at `output_buffer_index`.
    ///
    /// When detaching returns, the old source is no longer being called and
    /// will not be called again.
    pub fn set_render_source(
        &mut self,
        source: Option<Arc<dyn RenderSource>>,
        frame_size: u32,
        output_buffer_index: u32,
    ) -> Result<(), DeviceError> {
        match source {
            Some(source) => self.add_io_proc(source, frame_size, output_buffer_index),
            None => self.remove_io_proc(),
        }
    }

    fn add_io_proc(
        &mut self,
        source: Arc<dyn RenderSource>,
        frame_size: u32,
        output_buffer_index: u32,
    ) -> Result<(), DeviceError> {
        let device = self.bound()?;
        if self.io_proc.is_some() {
            return Err(DeviceError::AlreadyRegistered("IOProc"));
        }

        // Each registration gets its own context. An IOProc the HAL failed to
        // destroy keeps the old one, whose source has been cleared.
        let render = Arc::new(RenderContext::new());
        render.set_layout(frame_size, output_buffer_index);
        render.set_source(Some(source));
        let proc_id = match self.hw.create_io_proc(device, Arc::clone(&render)) {
            Ok(proc_id) => proc_id,
            Err(status) => {
                render.set_source(None);
                error!(
                    "Unable to add IOProc to device {device:#06x}: {}",
                    os_status(status)
                );
                return Err(DeviceError::hardware("AudioDeviceCreateIOProcID", status));
            }
        };
        self.render = render;
        self.io_proc = Some(proc_id);

        // start() logs its own failure; the IOProc stays registered and the
        // caller may retry.
        let _ = self.start();

        debug!("IOProc {proc_id:?} set for device {device:#06x}");
        Ok(())
    }

    fn remove_io_proc(&mut self) -> Result<(), DeviceError> {
        let device = self.bound()?;
        let Some(proc_id) = self.io_proc else {
            self.render.set_source(None);
            return Err(DeviceError::NotRegistered("IOProc"));
        };

        let _ = self.stop();

        match self.hw.destroy_io_proc(device, proc_id) {
            Ok(()) => debug!("IOProc {proc_id:?} removed from device {device:#06x}"),
            Err(status) => error!(
                "Unable to remove IOProc from device {device:#06x}: {}",
                os_status(status)
            ),
        }
        self.io_proc = None;
        self.started = false;

        self.render.set_source(None);
        std::thread::sleep(self.options.detach_quiescence);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Property listener
    // -----------------------------------------------------------------------

    /// Listen for every property change on the device. One listener at a
    /// time.
    pub fn set_property_listener(
        &mut self,
        listener: Arc<dyn PropertyListener>,
    ) -> Result<(), DeviceError> {
        let device = self.bound()?;
        if self.listener.is_some() {
            return Err(DeviceError::AlreadyRegistered("property listener"));
        }
        let token = self
            .hw
            .add_property_listener(device, PropertyAddress::wildcard(), listener)
            .map_err(|status| {
                error!(
                    "Unable to add property listener to device {device:#06x}: {}",
                    os_status(status)
                );
                DeviceError::hardware("AudioObjectAddPropertyListener", status)
            })?;
        self.listener = Some(token);
        Ok(())
    }

    pub fn remove_property_listener(&mut self) -> Result<(), DeviceError> {
        let device = self.bound()?;
        let token = self
            .listener
            .take()
            .ok_or(DeviceError::NotRegistered("property listener"))?;
        self.hw
            .remove_property_listener(device, PropertyAddress::wildcard(), token)
            .map_err(|status| {
                error!(
                    "Unable to remove property listener from device {device:#06x}: {}",
                    os_status(status)
                );
                DeviceError::hardware("AudioObjectRemovePropertyListener", status)
            })
    }

    pub fn has_property_listener(&self) -> bool {
        self.listener.is_some()
    }

    // -----------------------------------------------------------------------
    // Hog mode
    // -----------------------------------------------------------------------

    /// Take or release hog mode. Setting the HAL property toggles ownership,
    /// so success is judged by the owner pid the HAL reports afterwards.
    pub fn set_exclusive_access(&mut self, enable: bool) -> Result<(), DeviceError> {
        let device = self.bound()?;
        let address = PropertyAddress::output(selector::HOG_MODE);
        let me = self.hw.process_id();

        if enable {
            if self.exclusive == ExclusiveAccess::Held {
                return Ok(());
            }
            debug!("Setting hog mode on device {device:#06x}");
            let owner = self.toggle_hog_mode(device, address, me)?;
            if owner != me {
                error!("Unable to set hog mode on device {device:#06x}: owned by pid {owner}");
                return Err(DeviceError::VerificationMismatch {
                    what: "hog mode owner",
                    expected: me.to_string(),
                    reported: owner.to_string(),
                });
            }
            self.exclusive = ExclusiveAccess::Held;
            debug!("Hog mode set on device {device:#06x}");
        } else {
            if self.exclusive != ExclusiveAccess::Held {
                return Ok(());
            }
            debug!("Releasing hog mode on device {device:#06x}");
            let owner = self.toggle_hog_mode(device, address, NO_HOG_OWNER)?;
            if owner == me {
                error!("Unable to release hog mode on device {device:#06x}");
                return Err(DeviceError::VerificationMismatch {
                    what: "hog mode owner",
                    expected: format!("not {me}"),
                    reported: owner.to_string(),
                });
            }
            self.exclusive = ExclusiveAccess::NotHeld(owner);
        }
        Ok(())
    }

    fn toggle_hog_mode(
        &self,
        device: DeviceId,
        address: PropertyAddress,
        value: Pid,
    ) -> Result<Pid, DeviceError> {
        self.hw.set_i32(device, address, value).map_err(|status| {
            error!(
                "Unable to change hog mode on device {device:#06x}: {}",
                os_status(status)
            );
            DeviceError::hardware("set hog mode", status)
        })?;
        self.hw.get_i32(device, address).map_err(|status| {
            error!(
                "Unable to read hog mode owner of device {device:#06x}: {}",
                os_status(status)
            );
            DeviceError::hardware("get hog mode", status)
        })
    }

    /// Pid of the process holding hog mode, as the HAL reports it. `None`
    /// when nobody holds it or the device is unbound.
    pub fn exclusive_access_owner(&self) -> Option<Pid> {
        let device = self.device_id?;
        match self
            .hw
            .get_i32(device, PropertyAddress::output(selector::HOG_MODE))
        {
            Ok(NO_HOG_OWNER) | Err(_) => None,
            Ok(pid) => Some(pid),
        }
    }

    // -----------------------------------------------------------------------
    // Mixing
    // -----------------------------------------------------------------------

    /// Turn hardware mixing on or off. The first change is remembered and
    /// undone on close.
    ///
    /// Refused when the device does not report mixing as controllable. Once
    /// this controller has changed the setting, a writable property is
    /// enough, so the change can always be reverted.
    pub fn set_mixing_enabled(&mut self, enabled: bool) -> Result<(), DeviceError> {
        let device = self.bound()?;
        let address = PropertyAddress::output(selector::SUPPORTS_MIXING);

        let allowed = if self.mixing_restore.is_some() {
            self.mixing_writable(device)
        } else {
            self.is_mixing_controllable()
        };
        if !allowed {
            return Err(DeviceError::Unsupported("mixing"));
        }

        let previous = match self.mixing_restore {
            Some(_) => None,
            None => self.hw.get_u32(device, address).ok().map(|v| v != 0),
        };

        debug!(
            "{} mixing for device {device:#06x}",
            if enabled { "Enabling" } else { "Disabling" }
        );
        self.hw
            .set_u32(device, address, u32::from(enabled))
            .map_err(|status| {
                error!(
                    "Unable to set mixing support to {} on device {device:#06x}: {}",
                    if enabled { "on" } else { "off" },
                    os_status(status)
                );
                DeviceError::hardware("set mixing support", status)
            })?;

        if self.mixing_restore.is_none() {
            self.mixing_restore = previous;
        }
        Ok(())
    }

    /// Whether mixing can be toggled and is currently on. A property the
    /// HAL will not let us write counts as mixing disabled.
    pub fn is_mixing_controllable(&self) -> bool {
        let Some(device) = self.device_id else {
            return false;
        };
        let mix = self.mixing_writable(device)
            && self
                .hw
                .get_u32(device, PropertyAddress::output(selector::SUPPORTS_MIXING))
                .map(|v| v != 0)
                .unwrap_or(false);
        info!(
            "Device {device:#06x} mixing support: {}",
            if mix { "yes" } else { "no" }
        );
        mix
    }

    fn mixing_writable(&self, device: DeviceId) -> bool {
        match self
            .hw
            .is_settable(device, PropertyAddress::output(selector::SUPPORTS_MIXING))
        {
            Ok(writable) => writable,
            Err(status) => {
                error!(
                    "Unable to query mixing support property of device {device:#06x}: {}",
                    os_status(status)
                );
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sample rate
    // -----------------------------------------------------------------------

    pub fn nominal_sample_rate(&self) -> f64 {
        let Some(device) = self.device_id else {
            return 0.0;
        };
        match self
            .hw
            .get_f64(device, PropertyAddress::output(selector::NOMINAL_SAMPLE_RATE))
        {
            Ok(rate) => rate,
            Err(status) => {
                error!(
                    "Unable to read sample rate of device {device:#06x}: {}",
                    os_status(status)
                );
                0.0
            }
        }
    }

    /// Change the nominal sample rate. Asking for the current rate is a
    /// no-op and does not count as a change.
    pub fn set_nominal_sample_rate(&mut self, rate: f64) -> Result<(), DeviceError> {
        let device = self.bound()?;
        if rate <= 0.0 || !rate.is_finite() {
            return Err(DeviceError::InvalidArgument("sample rate"));
        }

        let current = self.nominal_sample_rate();
        if current == rate {
            return Ok(());
        }

        self.hw
            .set_f64(
                device,
                PropertyAddress::output(selector::NOMINAL_SAMPLE_RATE),
                rate,
            )
            .map_err(|status| {
                error!(
                    "Unable to set sample rate of device {device:#06x} to {rate:.0}: {}",
                    os_status(status)
                );
                DeviceError::hardware("set nominal sample rate", status)
            })?;
        debug!("Changed sample rate of device {device:#06x} from {current:.0} to {rate:.0}");

        if self.sample_rate_restore.is_none() && current > 0.0 {
            self.sample_rate_restore = Some(current);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Buffer size
    // -----------------------------------------------------------------------

    pub fn buffer_size(&self) -> u32 {
        let Some(device) = self.device_id else {
            return 0;
        };
        match self
            .hw
            .get_u32(device, PropertyAddress::output(selector::BUFFER_FRAME_SIZE))
        {
            Ok(frames) => frames,
            Err(status) => {
                error!(
                    "Unable to read buffer size of device {device:#06x}: {}",
                    os_status(status)
                );
                0
            }
        }
    }

    /// Request a buffer frame size. `Ok` means the HAL accepted the request;
    /// it may have picked a different size, which is logged. Read
    /// [`buffer_size`](Self::buffer_size) if the exact value matters.
    pub fn set_buffer_size(&mut self, frames: u32) -> Result<(), DeviceError> {
        let device = self.bound()?;
        let result = self
            .hw
            .set_u32(
                device,
                PropertyAddress::output(selector::BUFFER_FRAME_SIZE),
                frames,
            )
            .map_err(|status| {
                error!(
                    "Unable to set buffer size of device {device:#06x}: {}",
                    os_status(status)
                );
                DeviceError::hardware("set buffer frame size", status)
            });

        let actual = self.buffer_size();
        if actual != frames {
            warn!(
                "Buffer size change not applied on device {device:#06x}: requested {frames}, device reports {actual}"
            );
        } else {
            debug!("Set buffer size of device {device:#06x} to {frames}");
        }
        result
    }

    // -----------------------------------------------------------------------
    // Volume
    // -----------------------------------------------------------------------

    /// Set the output volume scalar, clamped to `0.0..=1.0`. Not restored on
    /// close.
    pub fn set_current_volume(&mut self, volume: f32) -> Result<(), DeviceError> {
        let device = self.bound()?;
        if volume.is_nan() {
            return Err(DeviceError::InvalidArgument("volume"));
        }
        let volume = volume.clamp(0.0, 1.0);
        self.hw
            .set_f32(
                device,
                PropertyAddress::output(selector::VOLUME_SCALAR),
                volume,
            )
            .map_err(|status| {
                error!(
                    "Unable to set volume of device {device:#06x}: {}",
                    os_status(status)
                );
                DeviceError::hardware("set volume", status)
            })
    }

    /// Output volume scalar, or `None` if the device has no such control.
    pub fn current_volume(&self) -> Option<f32> {
        let device = self.device_id?;
        self.hw
            .get_f32(device, PropertyAddress::output(selector::VOLUME_SCALAR))
            .ok()
    }

    // -----------------------------------------------------------------------
    // Read-only queries
    // -----------------------------------------------------------------------

    pub fn name(&self) -> String {
        let Some(device) = self.device_id else {
            return String::new();
        };
        match self
            .hw
            .get_string(device, PropertyAddress::output(selector::DEVICE_NAME))
        {
            Ok(name) => name,
            Err(status) => {
                error!(
                    "Unable to get name of device {device:#06x}: {}",
                    os_status(status)
                );
                String::new()
            }
        }
    }

    pub fn total_output_channels(&self) -> u32 {
        let Some(device) = self.device_id else {
            return 0;
        };
        match self.hw.get_buffer_channels(
            device,
            PropertyAddress::output(selector::STREAM_CONFIGURATION),
        ) {
            Ok(buffers) => {
                let channels = buffers.iter().copied().fold(0u32, u32::saturating_add);
                debug!(
                    "Found {channels} channels in {} buffers on device {device:#06x}",
                    buffers.len()
                );
                channels
            }
            Err(status) => {
                error!(
                    "Unable to get output channels of device {device:#06x}: {}",
                    os_status(status)
                );
                0
            }
        }
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        let Some(device) = self.device_id else {
            return Vec::new();
        };
        self.hw
            .get_u32_list(device, PropertyAddress::output(selector::STREAMS))
            .unwrap_or_default()
    }

    /// Whether the HAL reports the device as running, for any client.
    pub fn is_running(&self) -> bool {
        let Some(device) = self.device_id else {
            return false;
        };
        self.hw
            .get_u32(device, PropertyAddress::output(selector::DEVICE_IS_RUNNING))
            .map(|v| v != 0)
            .unwrap_or(false)
    }

    /// Raw `AudioChannelLayout` the device prefers; empty if it has none.
    pub fn preferred_channel_layout(&self) -> Vec<u8> {
        let Some(device) = self.device_id else {
            return Vec::new();
        };
        match self.hw.get_bytes(
            device,
            PropertyAddress::output(selector::PREFERRED_CHANNEL_LAYOUT),
        ) {
            Ok(layout) => layout,
            Err(status) => {
                error!(
                    "Unable to retrieve preferred channel layout of device {device:#06x}: {}",
                    os_status(status)
                );
                Vec::new()
            }
        }
    }

    pub fn data_sources(&self) -> Vec<u32> {
        let Some(device) = self.device_id else {
            return Vec::new();
        };
        self.hw
            .get_u32_list(device, PropertyAddress::output(selector::DATA_SOURCES))
            .unwrap_or_default()
    }

    pub fn latency_frames(&self) -> u32 {
        match self.device_id {
            Some(device) => query_output_latency(self.hw.as_ref(), device),
            None => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Apply `settings` in the order hog mode, mixing, sample rate, buffer
    /// size. Every step runs; the first failure is returned.
    pub fn apply_settings(&mut self, settings: &DeviceSettings) -> Result<(), DeviceError> {
        let results = [
            match settings.exclusive {
                Some(exclusive) => self.set_exclusive_access(exclusive),
                None => Ok(()),
            },
            match settings.mixing {
                Some(mixing) => self.set_mixing_enabled(mixing),
                None => Ok(()),
            },
            match settings.sample_rate {
                Some(rate) => self.set_nominal_sample_rate(rate),
                None => Ok(()),
            },
            match settings.buffer_frames {
                Some(frames) => self.set_buffer_size(frames),
                None => Ok(()),
            },
        ];
        results.into_iter().collect()
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        self.close();
    }
}
