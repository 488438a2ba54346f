#![cfg(target_os = "macos")]

//! `AudioHardware` and `AudioSystem` over the CoreAudio HAL.
//!
//! IOProc and listener registrations keep their client data alive in this
//! struct until the HAL has been told to drop them, so the trampolines can
//! dereference the client-data pointer for as long as CoreAudio may call.

use super::address::{DeviceId, PropertyAddress, SYSTEM_OBJECT, selector};
use super::hal::{
    AudioHardware, AudioSystem, HalResult, IoProcToken, ListenerToken, PropertyListener,
};
use super::ioproc::{AudioBuffer, RenderContext, TimeHint};
use coreaudio_sys::{
    AudioBufferList, AudioDeviceCreateIOProcID, AudioDeviceDestroyIOProcID, AudioDeviceID,
    AudioDeviceIOProcID, AudioDeviceStart, AudioDeviceStop, AudioObjectAddPropertyListener,
    AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize, AudioObjectID,
    AudioObjectIsPropertySettable, AudioObjectPropertyAddress, AudioObjectRemovePropertyListener,
    AudioObjectSetPropertyData, AudioTimeStamp, Boolean, OSStatus, UInt32, kAudioHardwareNoError,
};
use std::mem;
use std::os::raw::c_void;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

unsafe extern "C" fn io_proc(
    _device: AudioObjectID,
    _now: *const AudioTimeStamp,
    _input_data: *const AudioBufferList,
    input_time: *const AudioTimeStamp,
    output_data: *mut AudioBufferList,
    _output_time: *const AudioTimeStamp,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() || output_data.is_null() {
        return 0;
    }
    let context = unsafe { &*(client_data as *const RenderContext) };

    let time = if input_time.is_null() {
        None
    } else {
        let ts = unsafe { &*input_time };
        Some(TimeHint {
            sample_time: ts.mSampleTime,
            host_time: ts.mHostTime,
        })
    };

    let abl = unsafe { &mut *output_data };
    let buffers = unsafe {
        std::slice::from_raw_parts_mut(
            abl.mBuffers.as_mut_ptr() as *mut AudioBuffer,
            abl.mNumberBuffers as usize,
        )
    };
    context.dispatch(time.as_ref(), buffers)
}

unsafe extern "C" fn property_listener(
    object: AudioObjectID,
    count: UInt32,
    addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() {
        return 0;
    }
    let listener = unsafe { &*(client_data as *const Arc<dyn PropertyListener>) };
    let changed: Vec<PropertyAddress> = if addresses.is_null() || count == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(addresses, count as usize) }
            .iter()
            .map(|a| PropertyAddress::new(a.mSelector, a.mScope, a.mElement))
            .collect()
    };
    listener.properties_changed(object, &changed);
    0
}

fn ca_address(address: PropertyAddress) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: address.selector,
        mScope: address.scope,
        mElement: address.element,
    }
}

fn check(status: OSStatus) -> HalResult<()> {
    if status == kAudioHardwareNoError as OSStatus {
        Ok(())
    } else {
        Err(status)
    }
}

struct IoProcEntry {
    token: u64,
    device: AudioDeviceID,
    proc_id: AudioDeviceIOProcID,
    _context: Arc<RenderContext>,
}

struct ListenerEntry {
    token: u64,
    listener: Box<Arc<dyn PropertyListener>>,
}

#[derive(Default)]
pub struct CoreAudioHal {
    next_token: AtomicU64,
    io_procs: Mutex<Vec<IoProcEntry>>,
    listeners: Mutex<Vec<ListenerEntry>>,
}

impl CoreAudioHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn io_procs(&self) -> MutexGuard<'_, Vec<IoProcEntry>> {
        self.io_procs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<ListenerEntry>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn proc_id(&self, token: Option<IoProcToken>) -> AudioDeviceIOProcID {
        let token = token?;
        self.io_procs()
            .iter()
            .find(|e| e.token == token.0)
            .and_then(|e| e.proc_id)
    }

    fn get_pod<T: Copy + Default>(
        &self,
        device: DeviceId,
        address: PropertyAddress,
    ) -> HalResult<T> {
        let address = ca_address(address);
        let mut value = T::default();
        let mut size = mem::size_of::<T>() as UInt32;
        let status = unsafe {
            AudioObjectGetPropertyData(
                device,
                &address,
                0,
                ptr::null(),
                &mut size,
                &mut value as *mut T as *mut c_void,
            )
        };
        check(status)?;
        Ok(value)
    }

    fn set_pod<T: Copy>(
        &self,
        device: DeviceId,
        address: PropertyAddress,
        value: T,
    ) -> HalResult<()> {
        let address = ca_address(address);
        let status = unsafe {
            AudioObjectSetPropertyData(
                device,
                &address,
                0,
                ptr::null(),
                mem::size_of::<T>() as UInt32,
                &value as *const T as *const c_void,
            )
        };
        check(status)
    }

    fn data_size(&self, device: DeviceId, address: &AudioObjectPropertyAddress) -> HalResult<u32> {
        let mut size: UInt32 = 0;
        let status = unsafe {
            AudioObjectGetPropertyDataSize(device, address, 0, ptr::null(), &mut size)
        };
        check(status)?;
        Ok(size)
    }

    /// Read a variable-size property into `u64` words so the result is
    /// aligned for any HAL struct. Returns the words and the byte count.
    fn get_words(&self, device: DeviceId, address: PropertyAddress) -> HalResult<(Vec<u64>, usize)> {
        let address = ca_address(address);
        let mut size = self.data_size(device, &address)?;
        if size == 0 {
            return Ok((Vec::new(), 0));
        }
        let mut words = vec![0u64; (size as usize).div_ceil(mem::size_of::<u64>())];
        let status = unsafe {
            AudioObjectGetPropertyData(
                device,
                &address,
                0,
                ptr::null(),
                &mut size,
                words.as_mut_ptr() as *mut c_void,
            )
        };
        check(status)?;
        Ok((words, size as usize))
    }
}

impl AudioHardware for CoreAudioHal {
    fn get_u32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<u32> {
        self.get_pod::<u32>(device, address)
    }

    fn set_u32(&self, device: DeviceId, address: PropertyAddress, value: u32) -> HalResult<()> {
        self.set_pod(device, address, value)
    }

    fn get_i32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<i32> {
        self.get_pod::<i32>(device, address)
    }

    fn set_i32(&self, device: DeviceId, address: PropertyAddress, value: i32) -> HalResult<()> {
        self.set_pod(device, address, value)
    }

    fn get_f32(&self, device: DeviceId, address: PropertyAddress) -> HalResult<f32> {
        self.get_pod::<f32>(device, address)
    }

    fn set_f32(&self, device: DeviceId, address: PropertyAddress, value: f32) -> HalResult<()> {
        self.set_pod(device, address, value)
    }

    fn get_f64(&self, device: DeviceId, address: PropertyAddress) -> HalResult<f64> {
        self.get_pod::<f64>(device, address)
    }

    fn set_f64(&self, device: DeviceId, address: PropertyAddress, value: f64) -> HalResult<()> {
        self.set_pod(device, address, value)
    }

    fn is_settable(&self, device: DeviceId, address: PropertyAddress) -> HalResult<bool> {
        let address = ca_address(address);
        let mut writable: Boolean = 0;
        let status = unsafe { AudioObjectIsPropertySettable(device, &address, &mut writable) };
        check(status)?;
        Ok(writable != 0)
    }

    fn get_string(&self, device: DeviceId, address: PropertyAddress) -> HalResult<String> {
        let bytes = self.get_bytes(device, address)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    fn get_u32_list(&self, device: DeviceId, address: PropertyAddress) -> HalResult<Vec<u32>> {
        let bytes = self.get_bytes(device, address)?;
        Ok(bytes
            .chunks_exact(mem::size_of::<u32>())
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn get_buffer_channels(
        &self,
        device: DeviceId,
        address: PropertyAddress,
    ) -> HalResult<Vec<u32>> {
        let (words, size) = self.get_words(device, address)?;
        if size < mem::size_of::<UInt32>() {
            return Ok(Vec::new());
        }
        let list = words.as_ptr() as *const AudioBufferList;
        let n_buffers = unsafe { (*list).mNumberBuffers } as usize;
        let buffers_ptr = unsafe { (*list).mBuffers.as_ptr() };
        let header = buffers_ptr as usize - list as usize;
        let fits = (size.saturating_sub(header)) / mem::size_of::<coreaudio_sys::AudioBuffer>();
        Ok((0..n_buffers.min(fits))
            .map(|i| unsafe { (*buffers_ptr.add(i)).mNumberChannels })
            .collect())
    }

    fn get_bytes(&self, device: DeviceId, address: PropertyAddress) -> HalResult<Vec<u8>> {
        let (words, size) = self.get_words(device, address)?;
        let bytes = unsafe { std::slice::from_raw_parts(words.as_ptr() as *const u8, size) };
        Ok(bytes.to_vec())
    }

    fn create_io_proc(
        &self,
        device: DeviceId,
        context: Arc<RenderContext>,
    ) -> HalResult<IoProcToken> {
        let client_ptr = Arc::as_ptr(&context) as *mut c_void;
        let mut proc_id: AudioDeviceIOProcID = None;
        let status = unsafe {
            AudioDeviceCreateIOProcID(device, Some(io_proc), client_ptr, &mut proc_id)
        };
        check(status)?;

        let token = self.token();
        self.io_procs().push(IoProcEntry {
            token,
            device,
            proc_id,
            _context: context,
        });
        Ok(IoProcToken(token))
    }

    fn destroy_io_proc(&self, device: DeviceId, proc_id: IoProcToken) -> HalResult<()> {
        let mut entries = self.io_procs();
        let Some(pos) = entries
            .iter()
            .position(|e| e.token == proc_id.0 && e.device == device)
        else {
            return Err(coreaudio_sys::kAudioHardwareBadObjectError as OSStatus);
        };
        let status = unsafe { AudioDeviceDestroyIOProcID(device, entries[pos].proc_id) };
        check(status)?;
        entries.remove(pos);
        Ok(())
    }

    fn start(&self, device: DeviceId, proc_id: Option<IoProcToken>) -> HalResult<()> {
        let proc_id = self.proc_id(proc_id);
        check(unsafe { AudioDeviceStart(device, proc_id) })
    }

    fn stop(&self, device: DeviceId, proc_id: Option<IoProcToken>) -> HalResult<()> {
        let proc_id = self.proc_id(proc_id);
        check(unsafe { AudioDeviceStop(device, proc_id) })
    }

    fn add_property_listener(
        &self,
        device: DeviceId,
        address: PropertyAddress,
        listener: Arc<dyn PropertyListener>,
    ) -> HalResult<ListenerToken> {
        let address = ca_address(address);
        let listener = Box::new(listener);
        let client_ptr = &*listener as *const Arc<dyn PropertyListener> as *mut c_void;
        let status = unsafe {
            AudioObjectAddPropertyListener(device, &address, Some(property_listener), client_ptr)
        };
        check(status)?;

        let token = self.token();
        self.listeners().push(ListenerEntry { token, listener });
        Ok(ListenerToken(token))
    }

    fn remove_property_listener(
        &self,
        device: DeviceId,
        address: PropertyAddress,
        token: ListenerToken,
    ) -> HalResult<()> {
        let mut entries = self.listeners();
        let Some(pos) = entries.iter().position(|e| e.token == token.0) else {
            return Err(coreaudio_sys::kAudioHardwareBadObjectError as OSStatus);
        };
        let address = ca_address(address);
        let client_ptr = &*entries[pos].listener as *const Arc<dyn PropertyListener> as *mut c_void;
        let status = unsafe {
            AudioObjectRemovePropertyListener(device, &address, Some(property_listener), client_ptr)
        };
        check(status)?;
        entries.remove(pos);
        Ok(())
    }
}

impl AudioSystem for CoreAudioHal {
    fn set_auto_hog_mode(&self, enabled: bool) -> HalResult<()> {
        self.set_pod(
            SYSTEM_OBJECT,
            PropertyAddress::global(selector::HOG_MODE_IS_ALLOWED),
            u32::from(enabled),
        )
    }
}
