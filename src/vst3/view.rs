use super::host::PlugFrameCallbacks;
use super::module::PluginModule;
use crate::plugin::PluginView;
use std::ffi::c_void;
use std::sync::Arc;
use vst3::Steinberg::{IPlugView, IPlugViewTrait, ViewRect, kResultOk};
use vst3::{ComPtr, ComWrapper};

/// An `IPlugView` with the host frame it was given.
pub(crate) struct Vst3View {
    view: ComPtr<IPlugView>,
    _frame: ComWrapper<PlugFrameCallbacks>,
    closed: bool,
    _module: Arc<PluginModule>,
}

// SAFETY: views are only touched from the control/UI thread under the
// instance's view lock.
unsafe impl Send for Vst3View {}

impl Vst3View {
    pub(crate) fn new(
        view: ComPtr<IPlugView>,
        frame: ComWrapper<PlugFrameCallbacks>,
        module: Arc<PluginModule>,
    ) -> Self {
        Self {
            view,
            _frame: frame,
            closed: false,
            _module: module,
        }
    }
}

impl PluginView for Vst3View {
    fn size(&self) -> Option<(u32, u32)> {
        let mut rect = ViewRect {
            left: 0,
            top: 0,
            right: 0,
            bottom: 0,
        };
        // SAFETY: out rect is a live local.
        if unsafe { self.view.getSize(&mut rect) } != kResultOk {
            return None;
        }
        Some((
            (rect.right - rect.left).max(0) as u32,
            (rect.bottom - rect.top).max(0) as u32,
        ))
    }

    fn on_size(&mut self, width: u32, height: u32) -> bool {
        let mut rect = ViewRect {
            left: 0,
            top: 0,
            right: width.min(i32::MAX as u32) as i32,
            bottom: height.min(i32::MAX as u32) as i32,
        };
        // SAFETY: in rect is a live local.
        unsafe { self.view.onSize(&mut rect) == kResultOk }
    }

    fn native_handle(&self) -> *mut c_void {
        self.view.as_ptr() as *mut c_void
    }

    fn removed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // SAFETY: detach the frame before the view goes away.
        unsafe {
            let _ = self.view.setFrame(std::ptr::null_mut());
            let _ = self.view.removed();
        }
    }
}

impl Drop for Vst3View {
    fn drop(&mut self) {
        self.removed();
    }
}
