//! Output latency of a device, in frames.
//!
//! The total is the sum of:
//!   - `kAudioDevicePropertyLatency`: fixed device latency
//!   - `kAudioDevicePropertyBufferFrameSize`: frames sitting in the IO buffer
//!   - `kAudioDevicePropertySafetyOffset`: frames ahead of the hardware
//!     position the HAL keeps clear
//!
//! Each contributor is read on its own; one that cannot be read counts as 0.

use super::address::{DeviceId, PropertyAddress, selector};
use super::hal::AudioHardware;

pub const LATENCY_SELECTORS: [u32; 3] = [
    selector::LATENCY,
    selector::BUFFER_FRAME_SIZE,
    selector::SAFETY_OFFSET,
];

pub fn query_output_latency(hw: &dyn AudioHardware, device: DeviceId) -> u32 {
    LATENCY_SELECTORS
        .iter()
        .map(|&sel| hw.get_u32(device, PropertyAddress::output(sel)).unwrap_or(0))
        .fold(0u32, u32::saturating_add)
}
