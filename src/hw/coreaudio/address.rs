//! CoreAudio property addresses.
//!
//! Selectors and scopes are four-char codes. They are spelled out here
//! instead of taken from `coreaudio-sys` so the controller and its tests
//! build on every platform; only `system.rs` touches the real HAL.

pub type DeviceId = u32;
pub type Pid = i32;

/// Owner pid the HAL reports when no process holds hog mode.
pub const NO_HOG_OWNER: Pid = -1;

pub const SYSTEM_OBJECT: DeviceId = 1;

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

pub mod scope {
    use super::fourcc;

    pub const GLOBAL: u32 = fourcc(b"glob");
    pub const INPUT: u32 = fourcc(b"inpt");
    pub const OUTPUT: u32 = fourcc(b"outp");
    pub const WILDCARD: u32 = fourcc(b"****");
}

pub mod element {
    pub const MAIN: u32 = 0;
    pub const WILDCARD: u32 = 0xFFFF_FFFF;
}

pub mod selector {
    use super::fourcc;

    pub const WILDCARD: u32 = fourcc(b"****");
    pub const DEVICE_NAME: u32 = fourcc(b"name");
    pub const DEVICE_IS_RUNNING: u32 = fourcc(b"goin");
    pub const HOG_MODE: u32 = fourcc(b"oink");
    pub const SUPPORTS_MIXING: u32 = fourcc(b"mix?");
    pub const NOMINAL_SAMPLE_RATE: u32 = fourcc(b"nsrt");
    pub const BUFFER_FRAME_SIZE: u32 = fourcc(b"fsiz");
    pub const LATENCY: u32 = fourcc(b"ltnc");
    pub const SAFETY_OFFSET: u32 = fourcc(b"saft");
    pub const STREAMS: u32 = fourcc(b"stm#");
    pub const STREAM_CONFIGURATION: u32 = fourcc(b"slay");
    pub const PREFERRED_CHANNEL_LAYOUT: u32 = fourcc(b"srnd");
    pub const DATA_SOURCES: u32 = fourcc(b"ssc#");
    pub const VOLUME_SCALAR: u32 = fourcc(b"volm");
    pub const HOG_MODE_IS_ALLOWED: u32 = fourcc(b"hogr");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyAddress {
    pub selector: u32,
    pub scope: u32,
    pub element: u32,
}

impl PropertyAddress {
    pub const fn new(selector: u32, scope: u32, element: u32) -> Self {
        Self {
            selector,
            scope,
            element,
        }
    }

    /// Main element of the output scope, where every device property this
    /// crate touches lives.
    pub const fn output(selector: u32) -> Self {
        Self::new(selector, scope::OUTPUT, element::MAIN)
    }

    pub const fn global(selector: u32) -> Self {
        Self::new(selector, scope::GLOBAL, element::MAIN)
    }

    /// Matches every property change on an object.
    pub const fn wildcard() -> Self {
        Self::new(selector::WILDCARD, scope::WILDCARD, element::WILDCARD)
    }

    pub fn matches(&self, other: &PropertyAddress) -> bool {
        (self.selector == selector::WILDCARD
            || other.selector == selector::WILDCARD
            || self.selector == other.selector)
            && (self.scope == scope::WILDCARD
                || other.scope == scope::WILDCARD
                || self.scope == other.scope)
            && (self.element == element::WILDCARD
                || other.element == element::WILDCARD
                || self.element == other.element)
    }
}
