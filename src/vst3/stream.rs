use std::cell::UnsafeCell;
use std::ffi::c_void;
use vst3::Steinberg::{IBStream, IBStreamTrait, kResultFalse, kResultOk, tresult};
use vst3::{Class, ComWrapper};

const SEEK_SET: i32 = 0;
const SEEK_CUR: i32 = 1;
const SEEK_END: i32 = 2;

/// Growable in-memory `IBStream` for plugin state I/O.
///
/// The plugin only ever calls it from the thread that handed it over, so
/// interior mutability through `UnsafeCell` is enough.
pub struct MemoryStream {
    data: UnsafeCell<Vec<u8>>,
    position: UnsafeCell<usize>,
}

impl Class for MemoryStream {
    type Interfaces = (IBStream,);
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStream {
    pub fn new() -> Self {
        Self {
            data: UnsafeCell::new(Vec::new()),
            position: UnsafeCell::new(0),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: UnsafeCell::new(data.to_vec()),
            position: UnsafeCell::new(0),
        }
    }

    /// Moves the written bytes out, leaving the stream empty.
    pub fn take_bytes(&self) -> Vec<u8> {
        // SAFETY: no plugin call is in progress while the host reads back.
        unsafe {
            *self.position.get() = 0;
            std::mem::take(&mut *self.data.get())
        }
    }

    pub fn len(&self) -> usize {
        // SAFETY: shared read outside any plugin call.
        unsafe { (*self.data.get()).len() }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IBStreamTrait for MemoryStream {
    unsafe fn read(&self, buffer: *mut c_void, num_bytes: i32, num_bytes_read: *mut i32) -> tresult {
        if buffer.is_null() || num_bytes < 0 {
            return kResultFalse;
        }
        // SAFETY: single-threaded access for the duration of the call.
        let (data, position) = unsafe { (&*self.data.get(), &mut *self.position.get()) };
        let available = data.len().saturating_sub(*position);
        let count = (num_bytes as usize).min(available);
        if count > 0 {
            // SAFETY: the plugin provides at least `num_bytes` of storage.
            let dst = unsafe { std::slice::from_raw_parts_mut(buffer as *mut u8, count) };
            dst.copy_from_slice(&data[*position..*position + count]);
            *position += count;
        }
        if !num_bytes_read.is_null() {
            // SAFETY: caller-provided out pointer.
            unsafe { *num_bytes_read = count as i32 };
        }
        if count == 0 && num_bytes > 0 {
            return kResultFalse;
        }
        kResultOk
    }

    unsafe fn write(
        &self,
        buffer: *mut c_void,
        num_bytes: i32,
        num_bytes_written: *mut i32,
    ) -> tresult {
        if buffer.is_null() || num_bytes < 0 {
            return kResultFalse;
        }
        let count = num_bytes as usize;
        // SAFETY: the plugin provides `num_bytes` readable bytes.
        let src = unsafe { std::slice::from_raw_parts(buffer as *const u8, count) };
        // SAFETY: single-threaded access for the duration of the call.
        let (data, position) = unsafe { (&mut *self.data.get(), &mut *self.position.get()) };
        let end = *position + count;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[*position..end].copy_from_slice(src);
        *position = end;
        if !num_bytes_written.is_null() {
            // SAFETY: caller-provided out pointer.
            unsafe { *num_bytes_written = count as i32 };
        }
        kResultOk
    }

    unsafe fn seek(&self, pos: i64, mode: i32, result: *mut i64) -> tresult {
        // SAFETY: single-threaded access for the duration of the call.
        let (len, position) = unsafe { ((*self.data.get()).len() as i64, &mut *self.position.get()) };
        let target = match mode {
            SEEK_SET => pos,
            SEEK_CUR => *position as i64 + pos,
            SEEK_END => len + pos,
            _ => return kResultFalse,
        };
        if target < 0 {
            return kResultFalse;
        }
        *position = target as usize;
        if !result.is_null() {
            // SAFETY: caller-provided out pointer.
            unsafe { *result = target };
        }
        kResultOk
    }

    unsafe fn tell(&self, pos: *mut i64) -> tresult {
        if pos.is_null() {
            return kResultFalse;
        }
        // SAFETY: caller-provided out pointer; single-threaded access.
        unsafe { *pos = *self.position.get() as i64 };
        kResultOk
    }
}

/// Lets the plugin write into a fresh stream and appends what it wrote to
/// `out`. False when the call fails.
pub(crate) fn capture(out: &mut Vec<u8>, call: impl FnOnce(*mut IBStream) -> tresult) -> bool {
    let stream = ComWrapper::new(MemoryStream::new());
    let Some(ptr) = stream.to_com_ptr::<IBStream>() else {
        return false;
    };
    if call(ptr.as_ptr()) != kResultOk {
        return false;
    }
    out.extend_from_slice(&stream.take_bytes());
    true
}

/// Hands `data` to the plugin as a readable stream.
pub(crate) fn replay(data: &[u8], call: impl FnOnce(*mut IBStream) -> tresult) -> bool {
    let stream = ComWrapper::new(MemoryStream::from_bytes(data));
    let Some(ptr) = stream.to_com_ptr::<IBStream>() else {
        return false;
    };
    call(ptr.as_ptr()) == kResultOk
}
