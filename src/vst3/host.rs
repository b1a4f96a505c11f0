//! Host-side COM objects handed to the plugin.

use super::context::{IContextInfoProvider, IContextInfoProviderTrait};
use super::{copy_string128, read_tchar_string};
use crate::host::{ComponentHandler, ContextInfo, ContextValue, HostContext, PlugFrame, UnitHandler};
use crate::plugin::RestartFlags;
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::{Arc, Mutex};
use vst3::Steinberg::Vst::{
    IAttributeList, IAttributeListTrait, IComponentHandler, IComponentHandlerTrait,
    IHostApplication, IHostApplicationTrait, IMessage, IMessageTrait, IUnitHandler,
    IUnitHandlerTrait, ParamID, ParamValue, ProgramListID, String128, TChar, UnitID,
};
use vst3::Steinberg::{
    FIDString, IPlugFrame, IPlugFrameTrait, IPlugView, TUID, ViewRect, int32, int64,
    kInvalidArgument, kNotImplemented, kResultFalse, kResultOk, tresult, uint32,
};
use vst3::{Class, ComWrapper, Interface};

pub(crate) const HOST_NAME: &str = "Maolan";

fn result(ok: bool) -> tresult {
    if ok { kResultOk } else { kResultFalse }
}

fn iid_ptr_matches(iid_ptr: *const TUID, guid: &[u8; 16]) -> bool {
    if iid_ptr.is_null() {
        return false;
    }
    // SAFETY: caller provides valid IID pointer for the duration of call.
    let iid = unsafe { &*iid_ptr };
    iid.iter()
        .zip(guid.iter())
        .all(|(lhs, rhs)| (*lhs as u8) == *rhs)
}

/// The host context passed to `initialize`.
pub(crate) struct HostApplication;

impl Class for HostApplication {
    type Interfaces = (IHostApplication,);
}

impl IHostApplicationTrait for HostApplication {
    unsafe fn getName(&self, name: *mut String128) -> tresult {
        if name.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: `name` points to writable `String128`.
        unsafe { copy_string128(HOST_NAME, &mut *name) };
        kResultOk
    }

    unsafe fn createInstance(
        &self,
        cid: *mut TUID,
        iid: *mut TUID,
        obj: *mut *mut c_void,
    ) -> tresult {
        if obj.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: caller provided out pointer.
        unsafe { *obj = std::ptr::null_mut() };

        let raw = if iid_ptr_matches(cid, &IMessage::IID) || iid_ptr_matches(iid, &IMessage::IID)
        {
            ComWrapper::new(HostMessage::new())
                .to_com_ptr::<IMessage>()
                .map(|p| p.into_raw() as *mut c_void)
        } else if iid_ptr_matches(cid, &IAttributeList::IID)
            || iid_ptr_matches(iid, &IAttributeList::IID)
        {
            ComWrapper::new(HostAttributeList::default())
                .to_com_ptr::<IAttributeList>()
                .map(|p| p.into_raw() as *mut c_void)
        } else {
            return kNotImplemented;
        };

        match raw {
            Some(raw) => {
                // SAFETY: caller provided out pointer; ownership of one reference moves out.
                unsafe { *obj = raw };
                kResultOk
            }
            None => kResultFalse,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    Int(i64),
    Float(f64),
    Str(Vec<u16>),
    Binary(Vec<u8>),
}

/// Attribute storage for messages exchanged between component and controller.
#[derive(Default)]
pub(crate) struct HostAttributeList {
    values: Mutex<HashMap<String, AttrValue>>,
}

impl Class for HostAttributeList {
    type Interfaces = (IAttributeList,);
}

impl HostAttributeList {
    fn key(id: FIDString) -> Option<String> {
        if id.is_null() {
            return None;
        }
        // SAFETY: attribute ids are NUL-terminated C strings.
        Some(unsafe { CStr::from_ptr(id) }.to_string_lossy().into_owned())
    }

    fn set(&self, id: FIDString, value: AttrValue) -> tresult {
        let Some(key) = Self::key(id) else {
            return kInvalidArgument;
        };
        match self.values.lock() {
            Ok(mut values) => {
                values.insert(key, value);
                kResultOk
            }
            Err(_) => kResultFalse,
        }
    }

    fn with<R>(&self, id: FIDString, read: impl FnOnce(&AttrValue) -> Option<R>) -> Option<R> {
        let key = Self::key(id)?;
        let values = self.values.lock().ok()?;
        values.get(&key).and_then(read)
    }
}

impl IAttributeListTrait for HostAttributeList {
    unsafe fn setInt(&self, id: FIDString, value: int64) -> tresult {
        self.set(id, AttrValue::Int(value))
    }

    unsafe fn getInt(&self, id: FIDString, value: *mut int64) -> tresult {
        if value.is_null() {
            return kInvalidArgument;
        }
        match self.with(id, |v| match v {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }) {
            Some(v) => {
                // SAFETY: caller provides writable pointer.
                unsafe { *value = v };
                kResultOk
            }
            None => kResultFalse,
        }
    }

    unsafe fn setFloat(&self, id: FIDString, value: f64) -> tresult {
        self.set(id, AttrValue::Float(value))
    }

    unsafe fn getFloat(&self, id: FIDString, value: *mut f64) -> tresult {
        if value.is_null() {
            return kInvalidArgument;
        }
        match self.with(id, |v| match v {
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }) {
            Some(v) => {
                // SAFETY: caller provides writable pointer.
                unsafe { *value = v };
                kResultOk
            }
            None => kResultFalse,
        }
    }

    unsafe fn setString(&self, id: FIDString, string: *const TChar) -> tresult {
        if string.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: plugin strings are NUL-terminated UTF-16.
        let text = unsafe { read_tchar_string(string as *const u16) };
        self.set(id, AttrValue::Str(text.encode_utf16().collect()))
    }

    unsafe fn getString(&self, id: FIDString, string: *mut TChar, size_in_bytes: uint32) -> tresult {
        let cells = size_in_bytes as usize / std::mem::size_of::<TChar>();
        if string.is_null() || cells == 0 {
            return kInvalidArgument;
        }
        let found = self.with(id, |v| match v {
            AttrValue::Str(s) => {
                let n = s.len().min(cells - 1);
                // SAFETY: the buffer holds `cells` TChar cells.
                unsafe {
                    std::ptr::copy_nonoverlapping(s.as_ptr(), string as *mut u16, n);
                    *string.add(n) = 0;
                }
                Some(())
            }
            _ => None,
        });
        if found.is_none() {
            // SAFETY: buffer has at least one TChar cell.
            unsafe { *string = 0 };
            return kResultFalse;
        }
        kResultOk
    }

    unsafe fn setBinary(&self, id: FIDString, data: *const c_void, size_in_bytes: uint32) -> tresult {
        let bytes = if data.is_null() || size_in_bytes == 0 {
            Vec::new()
        } else {
            // SAFETY: the plugin provides `size_in_bytes` readable bytes.
            unsafe { std::slice::from_raw_parts(data as *const u8, size_in_bytes as usize) }
                .to_vec()
        };
        self.set(id, AttrValue::Binary(bytes))
    }

    unsafe fn getBinary(
        &self,
        id: FIDString,
        data: *mut *const c_void,
        size_in_bytes: *mut uint32,
    ) -> tresult {
        if data.is_null() || size_in_bytes.is_null() {
            return kInvalidArgument;
        }
        // The heap buffer stays put until the attribute is overwritten or the
        // list is released, which is as long as the plugin may use it.
        let found = self.with(id, |v| match v {
            AttrValue::Binary(b) => Some((b.as_ptr() as *const c_void, b.len() as uint32)),
            _ => None,
        });
        // SAFETY: caller provides writable pointers.
        unsafe {
            match found {
                Some((ptr, len)) => {
                    *data = ptr;
                    *size_in_bytes = len;
                    kResultOk
                }
                None => {
                    *data = std::ptr::null();
                    *size_in_bytes = 0;
                    kResultFalse
                }
            }
        }
    }
}

pub(crate) struct HostMessage {
    id: Mutex<CString>,
    attributes: ComWrapper<HostAttributeList>,
}

impl Class for HostMessage {
    type Interfaces = (IMessage,);
}

impl HostMessage {
    fn new() -> Self {
        Self {
            id: Mutex::new(CString::default()),
            attributes: ComWrapper::new(HostAttributeList::default()),
        }
    }
}

impl IMessageTrait for HostMessage {
    unsafe fn getMessageID(&self) -> FIDString {
        match self.id.lock() {
            // The CString's buffer outlives the guard until the next setMessageID.
            Ok(id) => id.as_ptr(),
            Err(_) => c"".as_ptr(),
        }
    }

    unsafe fn setMessageID(&self, id: FIDString) {
        let value = if id.is_null() {
            CString::default()
        } else {
            // SAFETY: message ids are NUL-terminated C strings.
            unsafe { CStr::from_ptr(id as *const c_char) }.to_owned()
        };
        if let Ok(mut slot) = self.id.lock() {
            *slot = value;
        }
    }

    unsafe fn getAttributes(&self) -> *mut IAttributeList {
        self.attributes
            .as_com_ref::<IAttributeList>()
            .map_or(std::ptr::null_mut(), |r| r.as_ptr())
    }
}

/// Receives edits, restarts and unit notifications from the controller and
/// forwards them to the instance's `HostContext`.
pub(crate) struct HostCallbacks {
    host: Arc<HostContext>,
}

impl Class for HostCallbacks {
    type Interfaces = (IComponentHandler, IUnitHandler, IContextInfoProvider);
}

impl HostCallbacks {
    pub(crate) fn new(host: Arc<HostContext>) -> Self {
        Self { host }
    }

    fn context_key(id: FIDString) -> Option<String> {
        if id.is_null() {
            return None;
        }
        // SAFETY: context ids are NUL-terminated C strings.
        Some(unsafe { CStr::from_ptr(id) }.to_string_lossy().into_owned())
    }

    fn store_context(&self, id: FIDString, value: ContextValue) -> tresult {
        match Self::context_key(id) {
            Some(key) => result(self.host.set_context_value(&key, value)),
            None => kInvalidArgument,
        }
    }
}

impl IComponentHandlerTrait for HostCallbacks {
    unsafe fn beginEdit(&self, id: ParamID) -> tresult {
        result(self.host.begin_edit(id))
    }

    unsafe fn performEdit(&self, id: ParamID, value_normalized: ParamValue) -> tresult {
        result(self.host.perform_edit(id, value_normalized))
    }

    unsafe fn endEdit(&self, id: ParamID) -> tresult {
        result(self.host.end_edit(id))
    }

    unsafe fn restartComponent(&self, flags: int32) -> tresult {
        tracing::debug!("VST3 plugin requested restart (flags={flags:#x})");
        result(self.host.restart_component(RestartFlags(flags)))
    }
}

impl IUnitHandlerTrait for HostCallbacks {
    unsafe fn notifyUnitSelection(&self, _unit_id: UnitID) -> tresult {
        result(self.host.notify_unit_selection())
    }

    unsafe fn notifyProgramListChange(&self, list_id: ProgramListID, program_index: int32) -> tresult {
        result(self.host.notify_program_list_change(list_id, program_index))
    }
}

impl IContextInfoProviderTrait for HostCallbacks {
    unsafe fn getContextInfoValue(&self, value: *mut int32, id: FIDString) -> tresult {
        let Some(key) = Self::context_key(id) else {
            return kInvalidArgument;
        };
        if value.is_null() {
            return kInvalidArgument;
        }
        match self.host.context_value(&key) {
            Some(ContextValue::Int(v)) => {
                // SAFETY: caller provides writable pointer.
                unsafe { *value = v.clamp(int32::MIN as i64, int32::MAX as i64) as int32 };
                kResultOk
            }
            _ => kResultFalse,
        }
    }

    unsafe fn getContextInfoString(&self, string: *mut TChar, max_chars: int32, id: FIDString) -> tresult {
        let Some(key) = Self::context_key(id) else {
            return kInvalidArgument;
        };
        if string.is_null() || max_chars <= 0 {
            return kInvalidArgument;
        }
        let text: Vec<u16> = match self.host.context_value(&key) {
            Some(ContextValue::Str(s)) => s.encode_utf16().collect(),
            _ => {
                // SAFETY: buffer has at least one cell.
                unsafe { *string = 0 };
                return kResultFalse;
            }
        };
        let n = text.len().min(max_chars as usize - 1);
        // SAFETY: the buffer holds `max_chars` TChar cells.
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr(), string as *mut u16, n);
            *string.add(n) = 0;
        }
        kResultOk
    }

    unsafe fn getContextInfoValueFloat(&self, value: *mut f64, id: FIDString) -> tresult {
        let Some(key) = Self::context_key(id) else {
            return kInvalidArgument;
        };
        if value.is_null() {
            return kInvalidArgument;
        }
        let found = match self.host.context_value(&key) {
            Some(ContextValue::Float(v)) => v,
            Some(ContextValue::Int(v)) => v as f64,
            _ => return kResultFalse,
        };
        // SAFETY: caller provides writable pointer.
        unsafe { *value = found };
        kResultOk
    }

    unsafe fn setContextInfoValueFloat(&self, id: FIDString, value: f64) -> tresult {
        self.store_context(id, ContextValue::Float(value))
    }

    unsafe fn setContextInfoValueInt(&self, id: FIDString, value: int32) -> tresult {
        self.store_context(id, ContextValue::Int(value as i64))
    }

    unsafe fn setContextInfoString(&self, id: FIDString, string: *mut TChar) -> tresult {
        if string.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: plugin strings are NUL-terminated UTF-16.
        let text = unsafe { read_tchar_string(string as *const u16) };
        self.store_context(id, ContextValue::Str(text))
    }

    unsafe fn beginEditContextInfoValue(&self, id: FIDString) -> tresult {
        match Self::context_key(id) {
            Some(key) => result(self.host.begin_context_edit(&key)),
            None => kInvalidArgument,
        }
    }

    unsafe fn endEditContextInfoValue(&self, id: FIDString) -> tresult {
        match Self::context_key(id) {
            Some(key) => result(self.host.end_context_edit(&key)),
            None => kInvalidArgument,
        }
    }
}

/// Frame the editor view asks to resize itself through.
pub(crate) struct PlugFrameCallbacks {
    host: Arc<HostContext>,
}

impl Class for PlugFrameCallbacks {
    type Interfaces = (IPlugFrame,);
}

impl PlugFrameCallbacks {
    pub(crate) fn new(host: Arc<HostContext>) -> Self {
        Self { host }
    }
}

impl IPlugFrameTrait for PlugFrameCallbacks {
    unsafe fn resizeView(&self, _view: *mut IPlugView, new_size: *mut ViewRect) -> tresult {
        if new_size.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: checked non-null; the view owns the rect for the call.
        let rect = unsafe { &*new_size };
        let width = (rect.right - rect.left).max(0) as u32;
        let height = (rect.bottom - rect.top).max(0) as u32;
        result(self.host.resize_view(width, height))
    }
}
