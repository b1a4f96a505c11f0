//! VST3 adapter: loads `.vst3` bundles and implements the plugin capability
//! traits on top of the `vst3` crate's COM bindings.

mod context;
mod host;
mod lists;
mod module;
mod plugin;
mod stream;
mod view;

pub use module::{AUDIO_MODULE_CLASS, COMPONENT_CONTROLLER_CLASS, ClassInfo, PluginModule};
pub use stream::MemoryStream;

use crate::config::BridgeOptions;
use crate::error::Result;
use crate::instance::PluginInstance;
use crate::notify::HostNotification;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use vst3::Steinberg::Vst::String128;

pub const VST3_PATH_ENV: &str = "VST3_PATH";

/// Platform search roots followed by any `VST3_PATH` entries.
pub fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    #[cfg(target_os = "windows")]
    {
        roots.push(PathBuf::from(r"C:\Program Files\Common Files\VST3"));
        roots.push(PathBuf::from(r"C:\Program Files (x86)\Common Files\VST3"));
    }

    #[cfg(target_os = "macos")]
    {
        roots.push(PathBuf::from("/Library/Audio/Plug-Ins/VST3"));
        roots.push(PathBuf::from(format!(
            "{}/Library/Audio/Plug-Ins/VST3",
            home_dir()
        )));
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        roots.push(PathBuf::from("/usr/lib/vst3"));
        roots.push(PathBuf::from("/usr/lib64/vst3"));
        roots.push(PathBuf::from("/usr/local/lib/vst3"));
        roots.push(PathBuf::from("/usr/local/lib64/vst3"));
        roots.push(PathBuf::from(format!("{}/.vst3", home_dir())));
        roots.push(PathBuf::from(format!("{}/.local/lib/vst3", home_dir())));
    }

    if let Ok(extra) = std::env::var(VST3_PATH_ENV) {
        roots.extend(std::env::split_paths(&extra).filter(|p| !p.as_os_str().is_empty()));
    }
    roots
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default()
}

/// Every `.vst3` bundle below `root`, sorted. Bundles are not descended into.
pub fn find_bundles(root: &Path) -> Vec<PathBuf> {
    let mut bundles = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                continue;
            }
            if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("vst3"))
            {
                bundles.push(path);
            } else {
                stack.push(path);
            }
        }
    }
    bundles.sort();
    bundles
}

/// Where the loadable module lives inside a bundle on this platform.
pub fn module_path(bundle: &Path) -> Option<PathBuf> {
    let stem = bundle.file_stem().and_then(|s| s.to_str())?;

    #[cfg(target_os = "windows")]
    {
        Some(
            bundle
                .join("Contents")
                .join("x86_64-win")
                .join(format!("{stem}.vst3")),
        )
    }

    #[cfg(target_os = "macos")]
    {
        Some(bundle.join("Contents").join("MacOS").join(stem))
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        Some(
            bundle
                .join("Contents")
                .join(format!("{}-linux", std::env::consts::ARCH))
                .join(format!("{stem}.so")),
        )
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        let _ = stem;
        None
    }
}

/// Loads `bundle`, instantiates a class and wraps it in a `PluginInstance`.
/// `None` picks the first audio module class.
pub fn open(
    bundle: &Path,
    class_index: Option<usize>,
    options: BridgeOptions,
) -> Result<(Arc<PluginInstance>, Receiver<HostNotification>)> {
    let module = PluginModule::load(bundle)?;
    let parts = module.instantiate(class_index)?;
    Ok(PluginInstance::new(parts, options))
}

pub(crate) fn extract_cstring(bytes: &[i8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    let u8_bytes: Vec<u8> = bytes[..len].iter().map(|&b| b as u8).collect();
    String::from_utf8_lossy(&u8_bytes).to_string()
}

pub(crate) fn string128_to_string(s: &String128) -> String {
    let end = s.iter().position(|&c| c == 0).unwrap_or(s.len());
    String::from_utf16_lossy(&s[..end])
}

pub(crate) fn copy_string128(src: &str, dst: &mut String128) {
    dst.fill(0);
    let limit = dst.len() - 1;
    for (slot, ch) in dst.iter_mut().zip(src.encode_utf16().take(limit)) {
        *slot = ch;
    }
}

/// Reads a NUL-terminated UTF-16 string the plugin handed over.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated UTF-16 buffer.
pub(crate) unsafe fn read_tchar_string(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0usize;
    // SAFETY: the caller guarantees NUL termination.
    unsafe {
        while *ptr.add(len) != 0 {
            len += 1;
        }
        String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_path_uses_bundle_stem() {
        let path = module_path(Path::new("/plugins/Reverb.vst3")).unwrap();
        let text = path.to_string_lossy();
        assert!(text.starts_with("/plugins/Reverb.vst3"));
        assert!(text.contains("Contents"));
        assert!(text.contains("Reverb"));
    }

    #[test]
    fn strings_round_trip_through_fixed_buffers() {
        let mut buf: String128 = [0; 128];
        copy_string128("Gain", &mut buf);
        assert_eq!(string128_to_string(&buf), "Gain");

        copy_string128(&"x".repeat(300), &mut buf);
        assert_eq!(string128_to_string(&buf).len(), 127);

        let raw: [i8; 6] = [b'S' as i8, b'y' as i8, b'n' as i8, 0, b'x' as i8, 0];
        assert_eq!(extract_cstring(&raw), "Syn");
    }

    #[test]
    fn tchar_strings_stop_at_nul() {
        let wide: Vec<u16> = "Mode\0junk".encode_utf16().collect();
        assert_eq!(unsafe { read_tchar_string(wide.as_ptr()) }, "Mode");
        assert_eq!(unsafe { read_tchar_string(std::ptr::null()) }, "");
    }

    #[test]
    fn bundles_are_found_below_root() {
        let root = std::env::temp_dir().join(format!("vst3-scan-{}", std::process::id()));
        let nested = root.join("Vendor").join("Delay.vst3").join("Contents");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join("Chorus.VST3")).unwrap();

        let found = find_bundles(&root);
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|p| p.ends_with("Delay.vst3")));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
