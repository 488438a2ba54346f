//! Render dispatch for the device IOProc.
//!
//! `RenderContext` is the only state shared with the hardware-clocked thread.
//! The IOProc trampoline recovers it from the client-data pointer registered
//! with the HAL and calls [`RenderContext::dispatch`]. Dispatch never blocks,
//! allocates or logs: the source slot is taken with `try_lock`, and a slot
//! that is busy (a detach is in progress) renders silence.

use super::error::OsStatus;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

pub const NO_ERR: OsStatus = 0;

/// One buffer of an output buffer list. Same layout as CoreAudio's
/// `AudioBuffer`, so the trampoline can hand the HAL's list over as a slice.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AudioBuffer {
    pub number_channels: u32,
    pub data_byte_size: u32,
    pub data: *mut c_void,
}

impl AudioBuffer {
    /// View the buffer as interleaved `f32` samples.
    ///
    /// # Safety
    ///
    /// `data` must point to at least `data_byte_size` writable bytes, aligned
    /// for `f32`, that no one else accesses while the slice is alive.
    pub unsafe fn as_f32_mut(&mut self) -> &mut [f32] {
        if self.data.is_null() || self.data_byte_size == 0 {
            return &mut [];
        }
        let len = self.data_byte_size as usize / std::mem::size_of::<f32>();
        unsafe { std::slice::from_raw_parts_mut(self.data as *mut f32, len) }
    }
}

/// Timing of the input data for this cycle, as far as the HAL reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeHint {
    pub sample_time: f64,
    pub host_time: u64,
}

/// Produces output samples for the device. Called only from the IOProc
/// thread; implementations must not block.
pub trait RenderSource: Send + Sync {
    fn render(
        &self,
        input_time: Option<&TimeHint>,
        frames: u32,
        output: &mut [AudioBuffer],
    ) -> OsStatus;
}

pub struct RenderContext {
    source: Mutex<Option<Arc<dyn RenderSource>>>,
    frame_size: AtomicU32,
    output_buffer_index: AtomicU32,
    cycles: AtomicU64,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderContext {
    pub fn new() -> Self {
        Self {
            source: Mutex::new(None),
            frame_size: AtomicU32::new(0),
            output_buffer_index: AtomicU32::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn set_layout(&self, frame_size: u32, output_buffer_index: u32) {
        self.frame_size.store(frame_size, Ordering::Release);
        self.output_buffer_index
            .store(output_buffer_index, Ordering::Release);
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size.load(Ordering::Acquire)
    }

    pub fn output_buffer_index(&self) -> u32 {
        self.output_buffer_index.load(Ordering::Acquire)
    }

    /// Install or clear the render source. Waits for a dispatch that is
    /// currently inside the old source to return.
    pub fn set_source(&self, source: Option<Arc<dyn RenderSource>>) {
        let old = {
            let mut slot = match self.source.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *slot, source)
        };
        drop(old);
    }

    pub fn has_source(&self) -> bool {
        match self.source.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Number of IOProc cycles dispatched so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Handle one IOProc cycle.
    pub fn dispatch(&self, input_time: Option<&TimeHint>, output: &mut [AudioBuffer]) -> OsStatus {
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let index = self.output_buffer_index() as usize;
        if index >= output.len() {
            return NO_ERR;
        }
        let frame_size = self.frame_size();

        let slot = match self.source.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };

        if let Some(guard) = slot
            && let Some(source) = guard.as_ref()
            && frame_size != 0
        {
            let frames = output[index].data_byte_size / frame_size;
            return source.render(input_time, frames, output);
        }

        output[index].data_byte_size = 0;
        NO_ERR
    }
}
