//! Plugin session: the component graph and its lifecycle.
//!
//! Exactly zero or one plugin is loaded per host process. Loading builds
//! the processor/controller object graph from the module's factory;
//! unloading (or a superseding load, or connection loss) releases every
//! acquired reference in the inverse order.

use std::ffi::{c_char, c_void};
use std::path::Path;
use std::ptr::null_mut;
use std::sync::Arc;

use tracing::{debug, info, warn};

use vst3::Steinberg::Vst::{
    IAudioProcessor, IComponent, IComponentHandler, IComponentTrait as _, IConnectionPoint,
    IConnectionPointTrait as _, IEditController, IEditControllerTrait as _, ParameterInfo,
};
use vst3::Steinberg::{
    kResultOk, IPluginBaseTrait as _, IPluginFactory2Trait as _, IPluginFactoryTrait as _,
    PClassInfo, PClassInfo2, PFactoryInfo, TUID,
};
use vst3::{ComPtr, ComWrapper};

use vstbridge_protocol::{
    CmdInitAudio, MidiEvent as WireMidiEvent, ParamChange, RespEditorInfo, RespEditorSize,
    RespParamInfo, RespPluginInfo,
};

use crate::audio::SharedAudioRegion;
use crate::editor::EditorSurface;
use crate::engine::AudioEngine;
use crate::error::{HostError, LoadStage, Result};
use crate::module::{resolve_binary, PluginModule};
use crate::params::{narrow_utf16, EditHandler, ParamRing};
use crate::uid;

const AUDIO_MODULE_CATEGORY: &str = "Audio Module Class";

fn char_array_to_string(s: &[c_char]) -> String {
    let end = s.iter().position(|&c| c == 0).unwrap_or(s.len());
    s[..end].iter().map(|&c| c as u8 as char).collect()
}

#[derive(Debug, Clone, Default)]
struct SessionMetadata {
    name: String,
    vendor: String,
    category: String,
    uid_hex: String,
}

struct SelectedClass {
    cid: TUID,
    name: String,
    vendor: String,
    category: String,
}

/// The acquired object graph. Field order doubles as the fallback drop
/// order: connections, controller, processor, component, handler, and the
/// module last so every release goes through a still-mapped vtable.
struct ComponentGraph {
    comp_connection: Option<ComPtr<IConnectionPoint>>,
    ctrl_connection: Option<ComPtr<IConnectionPoint>>,
    controller: Option<ComPtr<IEditController>>,
    separate_controller: bool,
    processor: Option<ComPtr<IAudioProcessor>>,
    component: ComPtr<IComponent>,
    _handler: Option<ComWrapper<EditHandler>>,
    module: PluginModule,
}

impl ComponentGraph {
    /// Releases everything in the inverse acquisition order.
    fn teardown(mut self) {
        if let (Some(cc), Some(tc)) = (&self.comp_connection, &self.ctrl_connection) {
            unsafe {
                cc.disconnect(tc.as_ptr());
                tc.disconnect(cc.as_ptr());
            }
        }
        self.comp_connection = None;
        self.ctrl_connection = None;

        if self.separate_controller {
            if let Some(ctrl) = &self.controller {
                unsafe {
                    ctrl.terminate();
                }
            }
        }
        self.processor = None;
        unsafe {
            self.component.terminate();
        }
        // Remaining references and the module drop in declaration order;
        // the module releases the factories and calls the exit entry point.
    }
}

/// Singleton per host process.
pub struct PluginSession {
    ring: Arc<ParamRing>,
    editor: Option<EditorSurface>,
    engine: Option<AudioEngine>,
    metadata: SessionMetadata,
    graph: Option<ComponentGraph>,
}

impl PluginSession {
    pub fn new() -> Self {
        Self {
            ring: Arc::new(ParamRing::new()),
            editor: None,
            engine: None,
            metadata: SessionMetadata::default(),
            graph: None,
        }
    }

    pub fn loaded(&self) -> bool {
        self.graph.is_some()
    }

    /// Buses activated and the region mapped.
    pub fn initialized(&self) -> bool {
        self.engine.is_some()
    }

    /// Processor started.
    pub fn processing(&self) -> bool {
        self.engine.as_ref().is_some_and(AudioEngine::is_processing)
    }

    /// Loads the n-th audio-module class of the bundle at `bundle_path`.
    /// A loaded plugin is superseded through the full unload sequence first;
    /// a failed load leaves the session unchanged.
    pub fn load(&mut self, bundle_path: &str, class_index: u32) -> Result<()> {
        if self.loaded() {
            info!("plugin already loaded, unloading first");
            self.unload();
        }

        let binary = resolve_binary(Path::new(bundle_path))?;
        debug!(binary = %binary.display(), "module binary resolved");
        let module = PluginModule::load(&binary)?;

        let class = select_audio_class(&module, class_index, bundle_path)?;
        let component = instantiate_component(&module, &class.cid, bundle_path)?;

        let result = unsafe { component.initialize(null_mut()) };
        if result != kResultOk {
            // Never initialised, so release without terminate.
            return Err(HostError::LoadFailed {
                path: bundle_path.into(),
                stage: LoadStage::Initialization,
                reason: format!("IComponent::initialize returned {result:#x}"),
            });
        }

        let processor = component.cast::<IAudioProcessor>();
        if processor.is_none() {
            info!("no audio-processor interface, running in passthrough mode");
        }

        let (controller, separate_controller) = acquire_controller(&module, &component);
        if controller.is_none() {
            info!("no edit controller, parameter surface disabled");
        }

        let mut handler = None;
        if let Some(ctrl) = &controller {
            let wrapper = ComWrapper::new(EditHandler::new(Arc::clone(&self.ring)));
            if let Some(h) = wrapper.to_com_ptr::<IComponentHandler>() {
                unsafe {
                    ctrl.setComponentHandler(h.as_ptr());
                }
            }
            handler = Some(wrapper);
        }

        // Split-object plugins route internal state from processor to
        // controller over this channel; wire it whenever both ends exist.
        let comp_connection = component.cast::<IConnectionPoint>();
        let ctrl_connection = controller
            .as_ref()
            .and_then(|ctrl| ctrl.cast::<IConnectionPoint>());
        if let (Some(cc), Some(tc)) = (&comp_connection, &ctrl_connection) {
            unsafe {
                cc.connect(tc.as_ptr());
                tc.connect(cc.as_ptr());
            }
            debug!("component and controller connected");
        }

        self.metadata = SessionMetadata {
            name: class.name,
            vendor: class.vendor,
            category: class.category,
            uid_hex: uid::tuid_hex(&class.cid),
        };
        self.graph = Some(ComponentGraph {
            comp_connection,
            ctrl_connection,
            controller,
            separate_controller,
            processor,
            component,
            _handler: handler,
            module,
        });

        info!(
            name = %self.metadata.name,
            vendor = %self.metadata.vendor,
            "plugin loaded"
        );
        Ok(())
    }

    /// Full teardown: editor, audio, then the component graph. Idempotent.
    pub fn unload(&mut self) {
        if self.graph.is_none() {
            return;
        }
        info!(name = %self.metadata.name, "unloading plugin");
        self.editor = None;
        self.engine = None;
        if let Some(graph) = self.graph.take() {
            graph.teardown();
        }
        self.metadata = SessionMetadata::default();
    }

    pub fn info(&self) -> Result<RespPluginInfo> {
        let graph = self.graph.as_ref().ok_or(HostError::NotLoaded)?;
        let (num_audio_inputs, num_audio_outputs) = self
            .engine
            .as_ref()
            .map(|e| {
                let header = e.region().header();
                (header.num_inputs, header.num_outputs)
            })
            .unwrap_or((2, 2));
        let num_params = graph
            .controller
            .as_ref()
            .map(|c| unsafe { c.getParameterCount() }.max(0) as u32)
            .unwrap_or(0);
        Ok(RespPluginInfo {
            name: self.metadata.name.clone(),
            vendor: self.metadata.vendor.clone(),
            category: self.metadata.category.clone(),
            uid: self.metadata.uid_hex.clone(),
            num_params,
            num_audio_inputs,
            num_audio_outputs,
            flags: 0,
        })
    }

    /// Maps the client's region and walks the audio half up to Processing.
    /// A previous region is torn down first.
    pub fn init_audio(&mut self, cmd: &CmdInitAudio) -> Result<()> {
        let graph = self.graph.as_ref().ok_or(HostError::NotLoaded)?;
        self.engine = None;
        let region = SharedAudioRegion::open(cmd)?;
        self.engine = Some(AudioEngine::start(
            region,
            Some(graph.component.clone()),
            graph.processor.clone(),
        )?);
        Ok(())
    }

    pub fn process_audio(&mut self, num_samples: u32) -> Result<()> {
        if self.graph.is_none() {
            return Err(HostError::NotLoaded);
        }
        self.engine
            .as_mut()
            .ok_or(HostError::NotInitialized)?
            .process_block(num_samples)
    }

    pub fn send_midi(&mut self, events: &[WireMidiEvent]) -> Result<()> {
        if self.graph.is_none() {
            return Err(HostError::NotLoaded);
        }
        let engine = self.engine.as_ref().ok_or(HostError::NotInitialized)?;
        engine.queue_midi(events);
        Ok(())
    }

    fn controller(&self) -> Result<&ComPtr<IEditController>> {
        self.graph
            .as_ref()
            .ok_or(HostError::NotLoaded)?
            .controller
            .as_ref()
            .ok_or(HostError::InterfaceAbsent("edit controller"))
    }

    pub fn param_count(&self) -> Result<u32> {
        Ok(unsafe { self.controller()?.getParameterCount() }.max(0) as u32)
    }

    pub fn param_info(&self, index: u32) -> Result<RespParamInfo> {
        let controller = self.controller()?;
        let mut info: ParameterInfo = unsafe { std::mem::zeroed() };
        if unsafe { controller.getParameterInfo(index as i32, &mut info) } != kResultOk {
            return Err(HostError::InvalidParam(format!(
                "no parameter at index {index}"
            )));
        }
        Ok(RespParamInfo {
            id: info.id,
            name: narrow_utf16(&info.title),
            units: narrow_utf16(&info.units),
            default_value: info.defaultNormalizedValue,
            min_value: 0.0,
            max_value: 1.0,
            flags: info.flags as u32,
        })
    }

    pub fn get_param(&self, param_id: u32) -> Result<f64> {
        Ok(unsafe { self.controller()?.getParamNormalized(param_id) })
    }

    pub fn set_param(&mut self, param_id: u32, value: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(HostError::InvalidParam(format!(
                "normalized value {value} outside [0, 1]"
            )));
        }
        let result = unsafe { self.controller()?.setParamNormalized(param_id, value) };
        if result != kResultOk {
            return Err(HostError::InvalidParam(format!(
                "setParamNormalized({param_id}) returned {result:#x}"
            )));
        }
        Ok(())
    }

    /// Drains the GUI edit ring; bounded by its content at entry.
    pub fn drain_param_changes(&self) -> Result<Vec<ParamChange>> {
        if self.graph.is_none() {
            return Err(HostError::NotLoaded);
        }
        let mut changes = Vec::new();
        self.ring.drain(&mut changes);
        Ok(changes)
    }

    pub fn open_editor(&mut self) -> Result<RespEditorInfo> {
        if let Some(editor) = &self.editor {
            return Ok(editor.info());
        }
        let controller = self.controller()?.clone();
        let editor = EditorSurface::open(controller, &self.metadata.name)?;
        let info = editor.info();
        self.editor = Some(editor);
        Ok(info)
    }

    /// Idempotent; closing with no editor open is a no-op.
    pub fn close_editor(&mut self) {
        self.editor = None;
    }

    pub fn editor_size(&self) -> Result<RespEditorSize> {
        if self.graph.is_none() {
            return Err(HostError::NotLoaded);
        }
        self.editor
            .as_ref()
            .map(EditorSurface::size)
            .ok_or_else(|| HostError::Editor("no editor open".into()))
    }
}

impl Default for PluginSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        self.unload();
    }
}

/// Picks the `class_index`-th factory class whose category is literally
/// `"Audio Module Class"`, preferring the v2 descriptor for metadata.
fn select_audio_class(
    module: &PluginModule,
    class_index: u32,
    bundle_path: &str,
) -> Result<SelectedClass> {
    let factory = module.factory();
    let count = unsafe { factory.countClasses() };
    let mut seen = 0u32;

    for i in 0..count {
        let mut class_info: PClassInfo = unsafe { std::mem::zeroed() };
        if unsafe { factory.getClassInfo(i, &mut class_info) } != kResultOk {
            continue;
        }
        if char_array_to_string(&class_info.category) != AUDIO_MODULE_CATEGORY {
            continue;
        }
        if seen != class_index {
            seen += 1;
            continue;
        }

        let mut name = char_array_to_string(&class_info.name);
        let mut vendor = String::new();
        let mut category = AUDIO_MODULE_CATEGORY.to_string();

        if let Some(factory2) = module.factory2() {
            let mut info2: PClassInfo2 = unsafe { std::mem::zeroed() };
            if unsafe { factory2.getClassInfo2(i, &mut info2) } == kResultOk {
                name = char_array_to_string(&info2.name);
                category = char_array_to_string(&info2.subCategories);
                vendor = char_array_to_string(&info2.vendor);
            }
        }
        if vendor.is_empty() {
            let mut factory_info: PFactoryInfo = unsafe { std::mem::zeroed() };
            if unsafe { factory.getFactoryInfo(&mut factory_info) } == kResultOk {
                vendor = char_array_to_string(&factory_info.vendor);
            }
        }

        return Ok(SelectedClass {
            cid: class_info.cid,
            name,
            vendor,
            category,
        });
    }

    Err(HostError::LoadFailed {
        path: bundle_path.into(),
        stage: LoadStage::ClassScan,
        reason: format!("no audio-module class at index {class_index} ({count} classes)"),
    })
}

/// Creates the class instance through the base unknown interface and
/// acquires the component interface from it.
fn instantiate_component(
    module: &PluginModule,
    cid: &TUID,
    bundle_path: &str,
) -> Result<ComPtr<IComponent>> {
    let fail = |reason: String| HostError::LoadFailed {
        path: bundle_path.into(),
        stage: LoadStage::Instantiation,
        reason,
    };

    let mut obj: *mut c_void = null_mut();
    let result = unsafe {
        module
            .factory()
            .createInstance(cid.as_ptr(), uid::IUNKNOWN.as_ptr(), &mut obj)
    };
    if result != kResultOk || obj.is_null() {
        return Err(fail(format!("createInstance returned {result:#x}")));
    }
    let unknown = unsafe { ComPtr::from_raw(obj as *mut vst3::Steinberg::FUnknown) }
        .ok_or_else(|| fail("createInstance produced a null object".into()))?;

    match unknown.cast::<IComponent>() {
        // The query took its own reference; dropping `unknown` releases the
        // original one.
        Some(component) => Ok(component),
        // Some plugins hand the component interface back directly instead of
        // answering the query; adopt the original reference without
        // releasing it.
        None => {
            warn!("component query failed, treating created object as the component");
            let raw = unknown.as_ptr();
            std::mem::forget(unknown);
            unsafe { ComPtr::from_raw(raw as *mut IComponent) }
                .ok_or_else(|| fail("created object is unusable as a component".into()))
        }
    }
}

/// Controller acquisition: the single-object cast first, then a separate
/// instance of the class the component names. Absence is non-fatal.
fn acquire_controller(
    module: &PluginModule,
    component: &ComPtr<IComponent>,
) -> (Option<ComPtr<IEditController>>, bool) {
    if let Some(controller) = component.cast::<IEditController>() {
        debug!("single-object plugin, controller on the component");
        return (Some(controller), false);
    }

    let mut controller_cid: TUID = [0; 16];
    if unsafe { component.getControllerClassId(&mut controller_cid) } != kResultOk {
        return (None, false);
    }

    let mut obj: *mut c_void = null_mut();
    let result = unsafe {
        module.factory().createInstance(
            controller_cid.as_ptr(),
            uid::IEDIT_CONTROLLER.as_ptr(),
            &mut obj,
        )
    };
    if result != kResultOk || obj.is_null() {
        warn!(code = result, "controller class instantiation failed");
        return (None, false);
    }
    let Some(controller) = (unsafe { ComPtr::from_raw(obj as *mut IEditController) }) else {
        return (None, false);
    };

    let result = unsafe { controller.initialize(null_mut()) };
    if result != kResultOk {
        warn!(code = result, "controller initialize failed");
        // Dropping the pointer releases the never-initialised instance.
        return (None, false);
    }

    debug!("split-object plugin, separate controller instantiated");
    (Some(controller), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::client_region;

    fn flags(session: &PluginSession) -> (bool, bool, bool) {
        (session.loaded(), session.initialized(), session.processing())
    }

    #[test]
    fn fresh_session_is_cold() {
        let session = PluginSession::new();
        assert_eq!(flags(&session), (false, false, false));
    }

    #[test]
    fn operations_without_a_plugin_report_not_loaded() {
        let mut session = PluginSession::new();
        assert!(matches!(session.info(), Err(HostError::NotLoaded)));
        assert!(matches!(session.param_count(), Err(HostError::NotLoaded)));
        assert!(matches!(session.get_param(0), Err(HostError::NotLoaded)));
        assert!(matches!(
            session.set_param(0, 0.5),
            Err(HostError::NotLoaded)
        ));
        assert!(matches!(
            session.drain_param_changes(),
            Err(HostError::NotLoaded)
        ));
        assert!(matches!(
            session.process_audio(64),
            Err(HostError::NotLoaded)
        ));
        assert!(matches!(
            session.send_midi(&[WireMidiEvent::new(0, 0x90, 60, 100)]),
            Err(HostError::NotLoaded)
        ));
        assert!(matches!(session.open_editor(), Err(HostError::NotLoaded)));
        assert!(matches!(session.editor_size(), Err(HostError::NotLoaded)));

        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 64, 2, 2);
        assert!(matches!(
            session.init_audio(&cmd),
            Err(HostError::NotLoaded)
        ));
    }

    #[test]
    fn failed_load_leaves_the_session_unchanged() {
        let mut session = PluginSession::new();
        let err = session.load("/nonexistent/Missing.vst3", 0).unwrap_err();
        assert!(matches!(
            err,
            HostError::LoadFailed {
                stage: LoadStage::Resolving,
                ..
            }
        ));
        assert_eq!(flags(&session), (false, false, false));
    }

    #[test]
    fn unload_and_close_editor_are_idempotent() {
        let mut session = PluginSession::new();
        session.unload();
        session.unload();
        session.close_editor();
        session.close_editor();
        assert_eq!(flags(&session), (false, false, false));
    }
}
