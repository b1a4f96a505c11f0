//! Presonus context-info extension.
//!
//! The `vst3` crate only carries the Steinberg headers, so the vendor
//! interfaces are declared here in the same shape as the generated bindings:
//! an interface struct, its vtable, and a trait the host object implements.

#![allow(non_snake_case)]

use std::ffi::c_void;
use vst3::Steinberg::Vst::TChar;
use vst3::Steinberg::{FIDString, FUnknown, TUID, int32, kResultOk, tresult};
use vst3::com_scrape_types::{Class, Construct, Guid, Header, Inherits, Interface, Unknown, Wrapper};

const fn guid(tuid: TUID) -> Guid {
    let mut out = [0u8; 16];
    let mut i = 0;
    while i < 16 {
        out[i] = tuid[i] as u8;
        i += 1;
    }
    out
}

pub(crate) const PROVIDER_IID: Guid = guid(vst3::uid(0x483E61EA, 0x17994494, 0x8199A35A, 0xEBB35E3C));
const PROVIDER2_IID: Guid = guid(vst3::uid(0x61E45968, 0x3D364F39, 0xB15E1733, 0x4944172B));
const PROVIDER3_IID: Guid = guid(vst3::uid(0x4E31FB46, 0x3C6B4AE3, 0x93A97F0E, 0x7E4A73E8));
const HANDLER_IID: Guid = guid(vst3::uid(0xC3B17BC0, 0x2C174494, 0x80293402, 0xFBC4BBF8));
const HANDLER2_IID: Guid = guid(vst3::uid(0x31E29A7A, 0xE55043AD, 0x8B95B9B8, 0xDA1FBE1E));

macro_rules! funknown_interface {
    ($name:ident, $vtbl:ident, $iid:expr $(, $also:expr)*) => {
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}
        unsafe impl Inherits<FUnknown> for $name {}

        impl Unknown for $name {
            unsafe fn query_interface(this: *mut Self, iid: &Guid) -> Option<*mut c_void> {
                let ptr = this as *mut FUnknown;
                let mut obj = std::ptr::null_mut();
                // SAFETY: every interface here starts with the FUnknown vtable.
                let result = unsafe {
                    ((*(*ptr).vtbl).queryInterface)(ptr, iid.as_ptr() as *const TUID, &mut obj)
                };
                (result == kResultOk).then_some(obj)
            }

            unsafe fn add_ref(this: *mut Self) -> usize {
                let ptr = this as *mut FUnknown;
                // SAFETY: as above.
                unsafe { ((*(*ptr).vtbl).addRef)(ptr) as usize }
            }

            unsafe fn release(this: *mut Self) -> usize {
                let ptr = this as *mut FUnknown;
                // SAFETY: as above.
                unsafe { ((*(*ptr).vtbl).release)(ptr) as usize }
            }
        }

        unsafe impl Interface for $name {
            type Vtbl = $vtbl;
            const IID: Guid = $iid;

            fn inherits(iid: &Guid) -> bool {
                iid == &Self::IID $(|| iid == &$also)* || FUnknown::inherits(iid)
            }
        }
    };
}

/// Host side of the channel, at revision 3. Plugins asking for revision 1
/// or 2 get the same object since the vtable only grows.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct IContextInfoProvider {
    pub vtbl: *const IContextInfoProviderVtbl,
}

funknown_interface!(
    IContextInfoProvider,
    IContextInfoProviderVtbl,
    PROVIDER3_IID,
    PROVIDER_IID,
    PROVIDER2_IID
);

// MSVC lays out overloads declared in one class in reverse order.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct IContextInfoProviderVtbl {
    pub base: vst3::Steinberg::FUnknownVtbl,
    pub getContextInfoValue:
        unsafe extern "system" fn(this: *mut IContextInfoProvider, value: *mut int32, id: FIDString) -> tresult,
    pub getContextInfoString: unsafe extern "system" fn(
        this: *mut IContextInfoProvider,
        string: *mut TChar,
        max_chars: int32,
        id: FIDString,
    ) -> tresult,
    pub getContextInfoValueFloat:
        unsafe extern "system" fn(this: *mut IContextInfoProvider, value: *mut f64, id: FIDString) -> tresult,
    #[cfg(not(target_env = "msvc"))]
    pub setContextInfoValueFloat:
        unsafe extern "system" fn(this: *mut IContextInfoProvider, id: FIDString, value: f64) -> tresult,
    pub setContextInfoValueInt:
        unsafe extern "system" fn(this: *mut IContextInfoProvider, id: FIDString, value: int32) -> tresult,
    #[cfg(target_env = "msvc")]
    pub setContextInfoValueFloat:
        unsafe extern "system" fn(this: *mut IContextInfoProvider, id: FIDString, value: f64) -> tresult,
    pub setContextInfoString: unsafe extern "system" fn(
        this: *mut IContextInfoProvider,
        id: FIDString,
        string: *mut TChar,
    ) -> tresult,
    pub beginEditContextInfoValue:
        unsafe extern "system" fn(this: *mut IContextInfoProvider, id: FIDString) -> tresult,
    pub endEditContextInfoValue:
        unsafe extern "system" fn(this: *mut IContextInfoProvider, id: FIDString) -> tresult,
}

pub trait IContextInfoProviderTrait {
    unsafe fn getContextInfoValue(&self, value: *mut int32, id: FIDString) -> tresult;
    unsafe fn getContextInfoString(&self, string: *mut TChar, max_chars: int32, id: FIDString) -> tresult;
    unsafe fn getContextInfoValueFloat(&self, value: *mut f64, id: FIDString) -> tresult;
    unsafe fn setContextInfoValueFloat(&self, id: FIDString, value: f64) -> tresult;
    unsafe fn setContextInfoValueInt(&self, id: FIDString, value: int32) -> tresult;
    unsafe fn setContextInfoString(&self, id: FIDString, string: *mut TChar) -> tresult;
    unsafe fn beginEditContextInfoValue(&self, id: FIDString) -> tresult;
    unsafe fn endEditContextInfoValue(&self, id: FIDString) -> tresult;
}

/// Resolves the Rust object behind an interface pointer at `OFFSET`.
unsafe fn object<'a, C, W, const OFFSET: isize>(this: *mut IContextInfoProvider) -> &'a C
where
    C: Class,
    W: Wrapper<C>,
{
    // SAFETY: `this` points into the header of a `W`-wrapped `C`.
    unsafe {
        let header = (this as *mut u8).offset(-OFFSET) as *mut Header<C>;
        &*W::data_from_header(header)
    }
}

impl IContextInfoProvider {
    const fn make_vtbl<C, W, const OFFSET: isize>() -> IContextInfoProviderVtbl
    where
        C: IContextInfoProviderTrait + Class,
        W: Wrapper<C>,
    {
        unsafe extern "system" fn get_int<C, W, const OFFSET: isize>(
            this: *mut IContextInfoProvider,
            value: *mut int32,
            id: FIDString,
        ) -> tresult
        where
            C: IContextInfoProviderTrait + Class,
            W: Wrapper<C>,
        {
            unsafe { object::<C, W, OFFSET>(this).getContextInfoValue(value, id) }
        }
        unsafe extern "system" fn get_string<C, W, const OFFSET: isize>(
            this: *mut IContextInfoProvider,
            string: *mut TChar,
            max_chars: int32,
            id: FIDString,
        ) -> tresult
        where
            C: IContextInfoProviderTrait + Class,
            W: Wrapper<C>,
        {
            unsafe { object::<C, W, OFFSET>(this).getContextInfoString(string, max_chars, id) }
        }
        unsafe extern "system" fn get_float<C, W, const OFFSET: isize>(
            this: *mut IContextInfoProvider,
            value: *mut f64,
            id: FIDString,
        ) -> tresult
        where
            C: IContextInfoProviderTrait + Class,
            W: Wrapper<C>,
        {
            unsafe { object::<C, W, OFFSET>(this).getContextInfoValueFloat(value, id) }
        }
        unsafe extern "system" fn set_float<C, W, const OFFSET: isize>(
            this: *mut IContextInfoProvider,
            id: FIDString,
            value: f64,
        ) -> tresult
        where
            C: IContextInfoProviderTrait + Class,
            W: Wrapper<C>,
        {
            unsafe { object::<C, W, OFFSET>(this).setContextInfoValueFloat(id, value) }
        }
        unsafe extern "system" fn set_int<C, W, const OFFSET: isize>(
            this: *mut IContextInfoProvider,
            id: FIDString,
            value: int32,
        ) -> tresult
        where
            C: IContextInfoProviderTrait + Class,
            W: Wrapper<C>,
        {
            unsafe { object::<C, W, OFFSET>(this).setContextInfoValueInt(id, value) }
        }
        unsafe extern "system" fn set_string<C, W, const OFFSET: isize>(
            this: *mut IContextInfoProvider,
            id: FIDString,
            string: *mut TChar,
        ) -> tresult
        where
            C: IContextInfoProviderTrait + Class,
            W: Wrapper<C>,
        {
            unsafe { object::<C, W, OFFSET>(this).setContextInfoString(id, string) }
        }
        unsafe extern "system" fn begin_edit<C, W, const OFFSET: isize>(
            this: *mut IContextInfoProvider,
            id: FIDString,
        ) -> tresult
        where
            C: IContextInfoProviderTrait + Class,
            W: Wrapper<C>,
        {
            unsafe { object::<C, W, OFFSET>(this).beginEditContextInfoValue(id) }
        }
        unsafe extern "system" fn end_edit<C, W, const OFFSET: isize>(
            this: *mut IContextInfoProvider,
            id: FIDString,
        ) -> tresult
        where
            C: IContextInfoProviderTrait + Class,
            W: Wrapper<C>,
        {
            unsafe { object::<C, W, OFFSET>(this).endEditContextInfoValue(id) }
        }

        IContextInfoProviderVtbl {
            base: FUnknown::make_vtbl::<C, W, OFFSET>(),
            getContextInfoValue: get_int::<C, W, OFFSET>,
            getContextInfoString: get_string::<C, W, OFFSET>,
            getContextInfoValueFloat: get_float::<C, W, OFFSET>,
            setContextInfoValueFloat: set_float::<C, W, OFFSET>,
            setContextInfoValueInt: set_int::<C, W, OFFSET>,
            setContextInfoString: set_string::<C, W, OFFSET>,
            beginEditContextInfoValue: begin_edit::<C, W, OFFSET>,
            endEditContextInfoValue: end_edit::<C, W, OFFSET>,
        }
    }
}

unsafe impl<C, W, const OFFSET: isize> Construct<C, W, OFFSET> for IContextInfoProvider
where
    C: IContextInfoProviderTrait + Class,
    W: Wrapper<C>,
{
    const OBJ: Self = IContextInfoProvider {
        vtbl: &Self::make_vtbl::<C, W, OFFSET>(),
    };
}

/// Controller side, first revision: "something changed".
#[repr(C)]
#[derive(Copy, Clone)]
pub struct IContextInfoHandler {
    pub vtbl: *const IContextInfoHandlerVtbl,
}

funknown_interface!(IContextInfoHandler, IContextInfoHandlerVtbl, HANDLER_IID);

#[repr(C)]
#[derive(Copy, Clone)]
pub struct IContextInfoHandlerVtbl {
    pub base: vst3::Steinberg::FUnknownVtbl,
    pub notifyContextInfoChange: unsafe extern "system" fn(this: *mut IContextInfoHandler),
}

/// Controller side, second revision: names the key that changed.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct IContextInfoHandler2 {
    pub vtbl: *const IContextInfoHandler2Vtbl,
}

funknown_interface!(IContextInfoHandler2, IContextInfoHandler2Vtbl, HANDLER2_IID);

#[repr(C)]
#[derive(Copy, Clone)]
pub struct IContextInfoHandler2Vtbl {
    pub base: vst3::Steinberg::FUnknownVtbl,
    pub notifyContextInfoChange: unsafe extern "system" fn(this: *mut IContextInfoHandler2, id: FIDString),
}
