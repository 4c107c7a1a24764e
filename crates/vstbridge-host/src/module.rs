//! Plugin module loader.
//!
//! Resolves the plugin binary inside a bundle directory, links it, and owns
//! the factory references together with the module entry points. The hosted
//! ABI fixes the entry-point names: `InitDll` (optional, called exactly once
//! before the factory is requested), `ExitDll` (optional, called on unload)
//! and `GetPluginFactory` (required).

use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::debug;
use vst3::ComPtr;
use vst3::Steinberg::{IPluginFactory, IPluginFactory2};

use crate::error::{HostError, LoadStage, Result};

/// Architecture directory inside a bundle's `Contents/`.
const ABI_TAG: &str = "x86_64-win";

const BINARY_EXTENSIONS: [&str; 2] = ["vst3", "dll"];

/// Resolves a bundle path to the module binary.
///
/// A directory is treated as a bundle: `Contents/x86_64-win/<stem>.vst3` is
/// tried first, then the `.dll` spelling. A regular file with one of the two
/// extensions is used directly.
pub fn resolve_binary(bundle_path: &Path) -> Result<PathBuf> {
    let not_found = |reason: String| HostError::LoadFailed {
        path: bundle_path.to_path_buf(),
        stage: LoadStage::Resolving,
        reason,
    };

    if bundle_path.is_dir() {
        let stem = bundle_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| not_found("bundle directory has no name".into()))?;
        for ext in BINARY_EXTENSIONS {
            let candidate = bundle_path
                .join("Contents")
                .join(ABI_TAG)
                .join(format!("{stem}.{ext}"));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        return Err(not_found(format!(
            "no module binary under Contents/{ABI_TAG}"
        )));
    }

    let ext = bundle_path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some(e) if BINARY_EXTENSIONS.contains(&e) && bundle_path.is_file() => {
            Ok(bundle_path.to_path_buf())
        }
        _ => Err(not_found("not a bundle directory or module binary".into())),
    }
}

type EntryProc = unsafe extern "C" fn() -> bool;
type FactoryProc = unsafe extern "C" fn() -> *mut IPluginFactory;

/// The linked library and its exit hook. Dropping this runs `ExitDll`
/// before the library unmaps.
struct ModuleRuntime {
    exit_fn: Option<libloading::Symbol<'static, EntryProc>>,
    // SAFETY: must stay the last field so the exit symbol is dropped (and
    // called) while the module is still mapped.
    _library: Library,
}

impl Drop for ModuleRuntime {
    fn drop(&mut self) {
        if let Some(exit) = self.exit_fn.take() {
            unsafe {
                exit();
            }
            debug!("ExitDll ok");
        }
    }
}

/// A linked plugin module with its factory references.
///
/// Field order is the release order: both factories drop before the
/// runtime calls `ExitDll` and unmaps the library.
pub struct PluginModule {
    factory: ComPtr<IPluginFactory>,
    factory2: Option<ComPtr<IPluginFactory2>>,
    _runtime: ModuleRuntime,
}

impl PluginModule {
    /// Links the binary, runs `InitDll` once if present, and acquires the
    /// factory (plus the v2 factory when the plugin offers it).
    pub fn load(binary: &Path) -> Result<Self> {
        let fail = |stage: LoadStage, reason: String| HostError::LoadFailed {
            path: binary.to_path_buf(),
            stage,
            reason,
        };

        let library = unsafe { Library::new(binary) }
            .map_err(|e| fail(LoadStage::Linking, e.to_string()))?;

        if let Ok(init) = unsafe { library.get::<EntryProc>(b"InitDll\0") } {
            if !unsafe { init() } {
                return Err(fail(LoadStage::Linking, "InitDll returned false".into()));
            }
            debug!("InitDll ok");
        }

        // SAFETY: the symbol's lifetime is tied to `_library`, which outlives
        // it by field order; the transmute only erases that borrow.
        let exit_fn: Option<libloading::Symbol<'static, EntryProc>> = unsafe {
            library
                .get::<EntryProc>(b"ExitDll\0")
                .ok()
                .map(|s| std::mem::transmute(s))
        };

        let get_factory = unsafe { library.get::<FactoryProc>(b"GetPluginFactory\0") }
            .map_err(|e| fail(LoadStage::Factory, e.to_string()))?;
        let factory_ptr = unsafe { get_factory() };
        let factory = unsafe { ComPtr::from_raw(factory_ptr) }
            .ok_or_else(|| fail(LoadStage::Factory, "GetPluginFactory returned null".into()))?;

        let factory2 = factory.cast::<IPluginFactory2>();

        Ok(Self {
            factory,
            factory2,
            _runtime: ModuleRuntime {
                exit_fn,
                _library: library,
            },
        })
    }

    pub fn factory(&self) -> &ComPtr<IPluginFactory> {
        &self.factory
    }

    pub fn factory2(&self) -> Option<&ComPtr<IPluginFactory2>> {
        self.factory2.as_ref()
    }
}
