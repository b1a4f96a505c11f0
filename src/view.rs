use crate::plugin::{PluginController, PluginView};
use std::ffi::c_void;

/// Owns the plugin's native editor view once it has been asked for.
/// Embedding the view into a window is the widget layer's job.
#[derive(Default)]
pub struct EditorViewProxy {
    view: Option<Box<dyn PluginView>>,
}

impl EditorViewProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports whether the controller can create a view without creating one.
    pub fn has_editor(&self, controller: &dyn PluginController) -> bool {
        self.view.is_some() || controller.has_editor()
    }

    pub fn is_open(&self) -> bool {
        self.view.is_some()
    }

    /// Creates the view on first use and returns its native handle.
    pub fn view(&mut self, controller: &mut dyn PluginController) -> Option<*mut c_void> {
        if self.view.is_none() {
            let view = controller.create_view()?;
            tracing::debug!("Created plugin editor view");
            self.view = Some(view);
        }
        self.view.as_ref().map(|v| v.native_handle())
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.view.as_ref().and_then(|v| v.size())
    }

    /// Tells the view the container now has this size.
    pub fn on_size(&mut self, width: u32, height: u32) -> bool {
        match self.view.as_mut() {
            Some(view) => view.on_size(width, height),
            None => false,
        }
    }

    pub fn close_view(&mut self) {
        if let Some(mut view) = self.view.take() {
            view.removed();
            tracing::debug!("Closed plugin editor view");
        }
    }
}

impl std::fmt::Debug for EditorViewProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorViewProxy")
            .field("open", &self.view.is_some())
            .finish()
    }
}
