//! In-memory CoreAudio HAL for driving `DeviceController` in tests.

#![allow(dead_code)]

use maolan_coreaudio::hw::coreaudio::address::{DeviceId, NO_HOG_OWNER, PropertyAddress, selector};
use maolan_coreaudio::hw::coreaudio::hal::{
    AudioHardware, AudioSystem, HalResult, IoProcToken, ListenerToken, PropertyListener,
};
use maolan_coreaudio::hw::coreaudio::ioproc::{AudioBuffer, RenderContext, RenderSource, TimeHint};
use std::collections::{HashMap, HashSet};
use std::os::raw::c_void;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEVICE: DeviceId = 0x42;
pub const OTHER_PID: i32 = 4242;

pub const ERR_UNKNOWN_PROPERTY: i32 = 0x7768_6F3F;
pub const ERR_ILLEGAL_OPERATION: i32 = 0x6E6F_7065;
pub const ERR_BAD_DEVICE: i32 = 0x2164_6576;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Set,
    Start,
    Stop,
    CreateIoProc,
    DestroyIoProc,
}

#[derive(Default)]
pub struct State {
    pub u32s: HashMap<u32, u32>,
    pub f32s: HashMap<u32, f32>,
    pub f64s: HashMap<u32, f64>,
    pub settable: HashSet<u32>,
    pub name: Option<String>,
    pub buffer_channels: Vec<u32>,
    pub streams: Vec<u32>,
    pub data_sources: Vec<u32>,
    pub layout: Vec<u8>,

    pub hog_owner: i32,
    /// The HAL silently keeps hog mode with us when asked to release it.
    pub refuse_hog_release: bool,
    /// Largest buffer size the device accepts; bigger requests are clamped.
    pub max_buffer_frames: Option<u32>,

    pub failing: HashSet<(Op, u32)>,
    pub writes: Vec<(u32, f64)>,

    pub next_token: u64,
    pub io_procs: HashMap<u64, Arc<RenderContext>>,
    /// Destroyed IOProcs the fake clock keeps calling, like a HAL that has
    /// not drained its IO thread yet.
    pub lingering: Vec<Arc<RenderContext>>,
    pub started: HashSet<u64>,
    pub listeners: HashMap<u64, Arc<dyn PropertyListener>>,
}

pub struct FakeHal {
    state: Mutex<State>,
    pid: i32,
}

const WHOLE_DEVICE: u32 = 0;

impl FakeHal {
    pub fn new() -> Arc<Self> {
        let mut state = State {
            hog_owner: NO_HOG_OWNER,
            name: Some("Built-in Output".to_string()),
            buffer_channels: vec![2, 2],
            streams: vec![0x50, 0x51],
            data_sources: vec![u32::from_be_bytes(*b"ispk"), u32::from_be_bytes(*b"hdpn")],
            layout: vec![0, 0, 0x65, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            ..State::default()
        };
        state.u32s.insert(selector::BUFFER_FRAME_SIZE, 512);
        state.u32s.insert(selector::SUPPORTS_MIXING, 1);
        state.u32s.insert(selector::LATENCY, 10);
        state.u32s.insert(selector::SAFETY_OFFSET, 24);
        state.u32s.insert(selector::DEVICE_IS_RUNNING, 0);
        state.f64s.insert(selector::NOMINAL_SAMPLE_RATE, 44100.0);
        state.f32s.insert(selector::VOLUME_SCALAR, 0.75);
        state.settable.insert(selector::SUPPORTS_MIXING);
        Arc::new(Self {
            state: Mutex::new(state),
            pid: std::process::id() as i32,
        })
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail(&self, op: Op, selector: u32) {
        self.state().failing.insert((op, selector));
    }

    pub fn heal(&self, op: Op, selector: u32) {
        self.state().failing.remove(&(op, selector));
    }

    pub fn writes(&self) -> Vec<(u32, f64)> {
        self.state().writes.clone()
    }

    pub fn writes_to(&self, selector: u32) -> Vec<f64> {
        self.state()
            .writes
            .iter()
            .filter(|(s, _)| *s == selector)
            .map(|&(_, v)| v)
            .collect()
    }

    pub fn u32_value(&self, selector: u32) -> u32 {
        self.state().u32s.get(&selector).copied().unwrap_or(0)
    }

    pub fn sample_rate(&self) -> f64 {
        self.state()
            .f64s
            .get(&selector::NOMINAL_SAMPLE_RATE)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn io_proc_count(&self) -> usize {
        self.state().io_procs.len()
    }

    pub fn started_count(&self) -> usize {
        self.state().started.len()
    }

    /// Run one hardware cycle: every started IOProc, plus any lingering
    /// ones, renders into a fresh stereo `f32` buffer of 256 frames.
    pub fn tick(&self) -> usize {
        let contexts: Vec<Arc<RenderContext>> = {
            let state = self.state();
            state
                .io_procs
                .iter()
                .filter(|(token, _)| state.started.contains(token))
                .map(|(_, ctx)| Arc::clone(ctx))
                .chain(state.lingering.iter().cloned())
                .collect()
        };
        for ctx in &contexts {
            let mut samples = vec![0.0f32; 512];
            let mut list = [AudioBuffer {
                number_channels: 2,
                data_byte_size: (samples.len() * std::mem::size_of::<f32>()) as u32,
                data: samples.as_mut_ptr() as *mut c_void,
            }];
            let time = TimeHint {
                sample_time: 0.0,
                host_time: 0,
            };
            ctx.dispatch(Some(&time), &mut list);
        }
        contexts.len()
    }

    pub fn notify(&self, changed: &[PropertyAddress]) {
        let listeners: Vec<_> = self.state().listeners.values().cloned().collect();
        for listener in listeners {
            listener.properties_changed(DEVICE, changed);
        }
    }

    fn guard(&self, device: DeviceId, op: Op, selector: u32) -> HalResult<MutexGuard<'_, State>> {
        if device != DEVICE {
            return Err(ERR_BAD_DEVICE);
        }
        let state = self.state();
        if state.failing.contains(&(op, selector)) {
            return Err(ERR_ILLEGAL_OPERATION);
        }
        Ok(state)
    }
}

impl AudioHardware for FakeHal {
    fn get_u32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<u32> {
        let state = self.guard(device, Op::Get, address.selector)?;
        state
            .u32s
            .get(&address.selector)
            .copied()
            .ok_or(ERR_UNKNOWN_PROPERTY)
    }

    fn set_u32(&self, device: DeviceId, address: PropertyAddress, value: u32) -> HalResult<()> {
        let mut state = self.guard(device, Op::Set, address.selector)?;
        state.writes.push((address.selector, value as f64));
        let value = match (address.selector, state.max_buffer_frames) {
            (selector::BUFFER_FRAME_SIZE, Some(max)) => value.min(max),
            _ => value,
        };
        state.u32s.insert(address.selector, value);
        Ok(())
    }

    fn get_i32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<i32> {
        let state = self.guard(device, Op::Get, address.selector)?;
        match address.selector {
            selector::HOG_MODE => Ok(state.hog_owner),
            _ => Err(ERR_UNKNOWN_PROPERTY),
        }
    }

    fn set_i32(&self, device: DeviceId, address: PropertyAddress, value: i32) -> HalResult<()> {
        let mut state = self.guard(device, Op::Set, address.selector)?;
        if address.selector != selector::HOG_MODE {
            return Err(ERR_UNKNOWN_PROPERTY);
        }
        state.writes.push((address.selector, value as f64));
        // Writing hog mode toggles ownership for the calling process.
        if state.hog_owner == NO_HOG_OWNER {
            state.hog_owner = self.pid;
        } else if state.hog_owner == self.pid && !state.refuse_hog_release {
            state.hog_owner = NO_HOG_OWNER;
        }
        Ok(())
    }

    fn get_f32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<f32> {
        let state = self.guard(device, Op::Get, address.selector)?;
        state
            .f32s
            .get(&address.selector)
            .copied()
            .ok_or(ERR_UNKNOWN_PROPERTY)
    }

    fn set_f32(&self, device: DeviceId, address: PropertyAddress, value: f32) -> HalResult<()> {
        let mut state = self.guard(device, Op::Set, address.selector)?;
        state.writes.push((address.selector, value as f64));
        state.f32s.insert(address.selector, value);
        Ok(())
    }

    fn get_f64(&self, device: DeviceId, address: PropertyAddress) -> HalResult<f64> {
        let state = self.guard(device, Op::Get, address.selector)?;
        state
            .f64s
            .get(&address.selector)
            .copied()
            .ok_or(ERR_UNKNOWN_PROPERTY)
    }

    fn set_f64(&self, device: DeviceId, address: PropertyAddress, value: f64) -> HalResult<()> {
        let mut state = self.guard(device, Op::Set, address.selector)?;
        state.writes.push((address.selector, value));
        state.f64s.insert(address.selector, value);
        Ok(())
    }

    fn is_settable(&self, device: DeviceId, address: PropertyAddress) -> HalResult<bool> {
        let state = self.guard(device, Op::Get, address.selector)?;
        Ok(state.settable.contains(&address.selector))
    }

    fn get_string(&self, device: DeviceId, address: PropertyAddress) -> HalResult<String> {
        let state = self.guard(device, Op::Get, address.selector)?;
        state.name.clone().ok_or(ERR_UNKNOWN_PROPERTY)
    }

    fn get_u32_list(&self, device: DeviceId, address: PropertyAddress) -> HalResult<Vec<u32>> {
        let state = self.guard(device, Op::Get, address.selector)?;
        match address.selector {
            selector::STREAMS => Ok(state.streams.clone()),
            selector::DATA_SOURCES => Ok(state.data_sources.clone()),
            _ => Err(ERR_UNKNOWN_PROPERTY),
        }
    }

    fn get_buffer_channels(
        &self,
        device: DeviceId,
        address: PropertyAddress,
    ) -> HalResult<Vec<u32>> {
        let state = self.guard(device, Op::Get, address.selector)?;
        Ok(state.buffer_channels.clone())
    }

    fn get_bytes(&self, device: DeviceId, address: PropertyAddress) -> HalResult<Vec<u8>> {
        let state = self.guard(device, Op::Get, address.selector)?;
        if state.layout.is_empty() {
            return Err(ERR_UNKNOWN_PROPERTY);
        }
        Ok(state.layout.clone())
    }

    fn create_io_proc(
        &self,
        device: DeviceId,
        context: Arc<RenderContext>,
    ) -> HalResult<IoProcToken> {
        let mut state = self.guard(device, Op::CreateIoProc, WHOLE_DEVICE)?;
        state.next_token += 1;
        let token = state.next_token;
        state.io_procs.insert(token, context);
        Ok(IoProcToken(token))
    }

    fn destroy_io_proc(&self, device: DeviceId, proc_id: IoProcToken) -> HalResult<()> {
        let mut state = self.guard(device, Op::DestroyIoProc, WHOLE_DEVICE)?;
        let context = state
            .io_procs
            .remove(&proc_id.0)
            .ok_or(ERR_ILLEGAL_OPERATION)?;
        state.started.remove(&proc_id.0);
        state.lingering.push(context);
        Ok(())
    }

    fn start(&self, device: DeviceId, proc_id: Option<IoProcToken>) -> HalResult<()> {
        let mut state = self.guard(device, Op::Start, WHOLE_DEVICE)?;
        let token = proc_id.ok_or(ERR_ILLEGAL_OPERATION)?;
        if !state.io_procs.contains_key(&token.0) {
            return Err(ERR_ILLEGAL_OPERATION);
        }
        state.started.insert(token.0);
        state.u32s.insert(selector::DEVICE_IS_RUNNING, 1);
        Ok(())
    }

    fn stop(&self, device: DeviceId, proc_id: Option<IoProcToken>) -> HalResult<()> {
        let mut state = self.guard(device, Op::Stop, WHOLE_DEVICE)?;
        if let Some(token) = proc_id {
            state.started.remove(&token.0);
        }
        if state.started.is_empty() {
            state.u32s.insert(selector::DEVICE_IS_RUNNING, 0);
        }
        Ok(())
    }

    fn add_property_listener(
        &self,
        device: DeviceId,
        address: PropertyAddress,
        listener: Arc<dyn PropertyListener>,
    ) -> HalResult<ListenerToken> {
        let mut state = self.guard(device, Op::Set, address.selector)?;
        state.next_token += 1;
        let token = state.next_token;
        state.listeners.insert(token, listener);
        Ok(ListenerToken(token))
    }

    fn remove_property_listener(
        &self,
        device: DeviceId,
        _address: PropertyAddress,
        token: ListenerToken,
    ) -> HalResult<()> {
        let mut state = self.guard(device, Op::Set, selector::WILDCARD)?;
        state
            .listeners
            .remove(&token.0)
            .map(|_| ())
            .ok_or(ERR_ILLEGAL_OPERATION)
    }
}

#[derive(Default)]
pub struct FakeSystem {
    pub auto_hog: Mutex<Vec<bool>>,
    /// Also record calls in this HAL's write log, as writes to the system
    /// object's hog-mode-allowed property.
    log: Option<Arc<FakeHal>>,
}

impl FakeSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logging_to(hal: &Arc<FakeHal>) -> Arc<Self> {
        Arc::new(Self {
            log: Some(Arc::clone(hal)),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<bool> {
        self.auto_hog.lock().unwrap().clone()
    }
}

impl AudioSystem for FakeSystem {
    fn set_auto_hog_mode(&self, enabled: bool) -> HalResult<()> {
        self.auto_hog.lock().unwrap().push(enabled);
        if let Some(hal) = &self.log {
            hal.state()
                .writes
                .push((selector::HOG_MODE_IS_ALLOWED, f64::from(u8::from(enabled))));
        }
        Ok(())
    }
}

/// Render source that counts its calls and writes a constant.
#[derive(Default)]
pub struct CountingSource {
    pub calls: AtomicU32,
    pub last_frames: AtomicU32,
}

impl CountingSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RenderSource for CountingSource {
    fn render(
        &self,
        _input_time: Option<&TimeHint>,
        frames: u32,
        output: &mut [AudioBuffer],
    ) -> i32 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_frames.store(frames, Ordering::SeqCst);
        if let Some(buffer) = output.first_mut() {
            unsafe { buffer.as_f32_mut() }.fill(0.25);
        }
        0
    }
}
