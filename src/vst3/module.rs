use super::host::HostApplication;
use super::plugin::{Vst3Component, Vst3Controller, Vst3Link};
use super::{extract_cstring, module_path};
use crate::error::{BridgeError, LoadStage, Result};
use crate::plugin::PluginParts;
use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vst3::Steinberg::Vst::{
    IAudioProcessor, IComponent, IComponentTrait, IConnectionPoint, IEditController,
    IEditControllerTrait,
};
use vst3::Steinberg::{
    FUnknown, IPluginBaseTrait, IPluginFactory, IPluginFactoryTrait, PClassInfo, TUID, kResultOk,
};
use vst3::{ComPtr, ComWrapper, Interface};

pub const AUDIO_MODULE_CLASS: &str = "Audio Module Class";
pub const COMPONENT_CONTROLLER_CLASS: &str = "Component Controller Class";

#[cfg(target_os = "windows")]
const ENTRY_SYMBOLS: (&[u8], &[u8]) = (b"InitDll", b"ExitDll");
#[cfg(target_os = "macos")]
const ENTRY_SYMBOLS: (&[u8], &[u8]) = (b"bundleEntry", b"bundleExit");
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const ENTRY_SYMBOLS: (&[u8], &[u8]) = (b"ModuleEntry", b"ModuleExit");

type EntryFn = unsafe extern "system" fn(*mut c_void) -> bool;
type ExitFn = unsafe extern "system" fn() -> bool;
type GetFactoryFn = unsafe extern "system" fn() -> *mut c_void;

/// One exported plugin class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub category: String,
    pub cid: [i8; 16],
}

impl ClassInfo {
    pub fn is_audio_module(&self) -> bool {
        self.category == AUDIO_MODULE_CLASS
    }

    /// Uppercase hex of the class id, used as the persistent plugin id.
    pub fn plugin_id(&self) -> String {
        self.cid.iter().map(|b| format!("{:02X}", *b as u8)).collect()
    }
}

/// A loaded VST3 module and its factory.
///
/// Every component, controller and view created from it holds an
/// `Arc<PluginModule>` so the library is unloaded only after the last plugin
/// object is released.
pub struct PluginModule {
    factory: ManuallyDrop<ComPtr<IPluginFactory>>,
    path: PathBuf,
    entered: bool,
    library: libloading::Library,
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("path", &self.path)
            .field("factory", &"<COM ptr>")
            .field("entered", &self.entered)
            .finish()
    }
}

fn load_error(path: &Path, stage: LoadStage, reason: impl Into<String>) -> BridgeError {
    BridgeError::ModuleLoad {
        path: path.to_path_buf(),
        stage,
        reason: reason.into(),
    }
}

fn tuid(guid: &[u8; 16]) -> TUID {
    let mut tuid: TUID = [0; 16];
    for (dst, src) in tuid.iter_mut().zip(guid.iter()) {
        *dst = *src as _;
    }
    tuid
}

impl PluginModule {
    /// Opens the bundle's platform library, runs its entry point and fetches
    /// the factory.
    pub fn load(bundle: &Path) -> Result<Arc<Self>> {
        let path = module_path(bundle)
            .filter(|p| p.exists())
            .ok_or_else(|| load_error(bundle, LoadStage::Bundle, "module binary not found"))?;

        // SAFETY: loading a plugin binary runs its static initializers.
        let library = unsafe { libloading::Library::new(&path) }
            .map_err(|e| load_error(&path, LoadStage::Library, e.to_string()))?;

        // SAFETY: symbol signatures follow the VST3 module entry convention.
        let entered = unsafe {
            match library.get::<EntryFn>(ENTRY_SYMBOLS.0) {
                Ok(entry) => {
                    if !entry(std::ptr::null_mut()) {
                        return Err(load_error(
                            &path,
                            LoadStage::Initialization,
                            "module entry returned false",
                        ));
                    }
                    true
                }
                Err(_) => false,
            }
        };

        let factory = Self::factory_from(&library, &path);
        let factory = match factory {
            Ok(factory) => factory,
            Err(e) => {
                if entered {
                    Self::call_exit(&library);
                }
                return Err(e);
            }
        };

        tracing::info!("Loaded VST3 module {}", path.display());
        Ok(Arc::new(Self {
            factory: ManuallyDrop::new(factory),
            path,
            entered,
            library,
        }))
    }

    fn factory_from(library: &libloading::Library, path: &Path) -> Result<ComPtr<IPluginFactory>> {
        // SAFETY: `GetPluginFactory` takes no arguments and returns an owned reference.
        let factory_ptr = unsafe {
            let get_factory = library
                .get::<GetFactoryFn>(b"GetPluginFactory")
                .map_err(|e| load_error(path, LoadStage::Factory, e.to_string()))?;
            get_factory()
        };
        // SAFETY: a non-null return is an IPluginFactory with one reference for us.
        unsafe { ComPtr::from_raw(factory_ptr as *mut IPluginFactory) }
            .ok_or_else(|| load_error(path, LoadStage::Factory, "GetPluginFactory returned null"))
    }

    fn call_exit(library: &libloading::Library) {
        // SAFETY: only called after a successful entry call.
        unsafe {
            if let Ok(exit) = library.get::<ExitFn>(ENTRY_SYMBOLS.1) {
                let _ = exit();
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn class_count(&self) -> usize {
        // SAFETY: the factory is alive for as long as `self`.
        unsafe { self.factory.countClasses() }.max(0) as usize
    }

    pub fn class_info(&self, index: usize) -> Option<ClassInfo> {
        // SAFETY: PClassInfo is plain data; zeroed is a valid initial value.
        let mut info: PClassInfo = unsafe { std::mem::zeroed() };
        // SAFETY: out pointer is a live local.
        if unsafe { self.factory.getClassInfo(index as i32, &mut info) } != kResultOk {
            return None;
        }
        Some(ClassInfo {
            name: extract_cstring(&info.name),
            category: extract_cstring(&info.category),
            cid: info.cid.map(|b| b as i8),
        })
    }

    pub fn classes(&self) -> Vec<ClassInfo> {
        (0..self.class_count())
            .filter_map(|i| self.class_info(i))
            .collect()
    }

    fn create<I: Interface>(&self, cid: &[i8; 16], stage: LoadStage) -> Result<ComPtr<I>> {
        let iid = tuid(&I::IID);
        let mut obj: *mut c_void = std::ptr::null_mut();
        // SAFETY: cid and iid are 16-byte ids; `obj` is a live out pointer.
        let result = unsafe {
            self.factory
                .createInstance(cid.as_ptr() as _, iid.as_ptr(), &mut obj)
        };
        if result != kResultOk || obj.is_null() {
            return Err(load_error(
                &self.path,
                stage,
                format!("createInstance failed (result={result})"),
            ));
        }
        // SAFETY: the factory returned an object implementing `I` with one reference for us.
        unsafe { ComPtr::from_raw(obj as *mut I) }
            .ok_or_else(|| load_error(&self.path, stage, "createInstance returned null"))
    }

    fn resolve_controller(
        &self,
        component: &ComPtr<IComponent>,
        host_unknown: &ComPtr<FUnknown>,
    ) -> Result<(ComPtr<IEditController>, bool)> {
        if let Some(controller) = component.cast::<IEditController>() {
            return Ok((controller, false));
        }
        let mut controller_cid: TUID = [0; 16];
        // SAFETY: out pointer is a live local.
        let result = unsafe { component.getControllerClassId(&mut controller_cid) };
        if result != kResultOk {
            return Err(load_error(
                &self.path,
                LoadStage::Controller,
                format!("no controller class id (result={result})"),
            ));
        }
        let cid = controller_cid.map(|b| b as i8);
        let controller: ComPtr<IEditController> = self.create(&cid, LoadStage::Controller)?;
        // SAFETY: host_unknown outlives the call; the plugin add-refs it if kept.
        let result = unsafe { controller.initialize(host_unknown.as_ptr()) };
        if result != kResultOk {
            return Err(load_error(
                &self.path,
                LoadStage::Initialization,
                format!("IEditController::initialize failed (result={result})"),
            ));
        }
        Ok((controller, true))
    }

    /// Creates and initializes the component and its controller.
    ///
    /// `class_index` of `None` picks the first audio module class.
    pub fn instantiate(self: &Arc<Self>, class_index: Option<usize>) -> Result<PluginParts> {
        let info = match class_index {
            Some(index) => self.class_info(index).ok_or_else(|| {
                BridgeError::Instantiation(format!("no plugin class at index {index}"))
            })?,
            None => self
                .classes()
                .into_iter()
                .find(ClassInfo::is_audio_module)
                .ok_or_else(|| {
                    BridgeError::Instantiation(format!(
                        "{} exports no audio module class",
                        self.path.display()
                    ))
                })?,
        };
        if !info.is_audio_module() {
            return Err(BridgeError::Instantiation(format!(
                "class '{}' is a {}, not an audio module",
                info.name, info.category
            )));
        }

        let host_app = ComWrapper::new(HostApplication);
        let host_unknown: ComPtr<FUnknown> = host_app.to_com_ptr::<FUnknown>().ok_or_else(|| {
            BridgeError::Instantiation("host application has no FUnknown".to_string())
        })?;

        let component: ComPtr<IComponent> = self.create(&info.cid, LoadStage::Component)?;
        // SAFETY: host_unknown outlives the call; the plugin add-refs it if kept.
        let result = unsafe { component.initialize(host_unknown.as_ptr()) };
        if result != kResultOk {
            return Err(load_error(
                &self.path,
                LoadStage::Initialization,
                format!("IComponent::initialize failed (result={result})"),
            ));
        }

        let Some(processor) = component.cast::<IAudioProcessor>() else {
            // SAFETY: balances the successful initialize above.
            unsafe { component.terminate() };
            return Err(BridgeError::Instantiation(format!(
                "'{}' does not implement IAudioProcessor",
                info.name
            )));
        };

        let (controller, separate) = match self.resolve_controller(&component, &host_unknown) {
            Ok(resolved) => resolved,
            Err(e) => {
                // SAFETY: balances the successful initialize above.
                unsafe { component.terminate() };
                return Err(e);
            }
        };
        tracing::info!(
            "VST3: {} controller design for '{}'",
            if separate { "separate" } else { "single-component" },
            info.name
        );

        // SAFETY: plain query on the initialized controller.
        let parameter_count = unsafe { controller.getParameterCount() }.max(0) as usize;
        let audio = Vst3Component::new(
            component.clone(),
            processor,
            parameter_count,
            host_unknown.clone(),
            Arc::clone(self),
        );

        let link = if separate {
            match (
                component.cast::<IConnectionPoint>(),
                controller.cast::<IConnectionPoint>(),
            ) {
                (Some(component_point), Some(controller_point)) => Some(Box::new(Vst3Link::new(
                    component_point,
                    controller_point,
                    Arc::clone(self),
                ))
                    as Box<dyn crate::plugin::ComponentLink>),
                _ => None,
            }
        } else {
            None
        };

        let controller = Vst3Controller::new(controller, separate, host_unknown, Arc::clone(self));

        Ok(PluginParts {
            plugin_id: info.plugin_id(),
            name: info.name,
            component: Box::new(audio),
            controller: Box::new(controller),
            link,
        })
    }
}

impl Drop for PluginModule {
    fn drop(&mut self) {
        // SAFETY: dropped exactly once, before the exit call and the unload.
        unsafe { ManuallyDrop::drop(&mut self.factory) };
        if self.entered {
            Self::call_exit(&self.library);
        }
        tracing::debug!("Unloading VST3 module {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bundle_fails_at_bundle_stage() {
        let err = PluginModule::load(Path::new("/nonexistent/Nothing.vst3")).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ModuleLoad {
                stage: LoadStage::Bundle,
                ..
            }
        ));
    }

    #[test]
    fn plugin_id_is_uppercase_hex() {
        let mut cid = [0i8; 16];
        cid[0] = -1;
        cid[15] = 0x0a;
        let info = ClassInfo {
            name: "Synth".to_string(),
            category: AUDIO_MODULE_CLASS.to_string(),
            cid,
        };
        let id = info.plugin_id();
        assert_eq!(id.len(), 32);
        assert!(id.starts_with("FF00"));
        assert!(id.ends_with("0A"));
        assert!(info.is_audio_module());
    }

    #[test]
    fn tuid_copies_guid_bytes() {
        let guid = [0x80u8; 16];
        assert!(tuid(&guid).iter().all(|&b| b as u8 == 0x80));
    }
}
