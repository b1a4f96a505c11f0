use super::context::{IContextInfoHandler, IContextInfoHandler2};
use super::host::{HostCallbacks, PlugFrameCallbacks};
use super::lists::{EventListView, ParameterChangesView, fill_context};
use super::module::PluginModule;
use super::stream::{capture, replay};
use super::view::Vst3View;
use super::string128_to_string;
use crate::host::HostContext;
use crate::params::{ParamId, ParameterInfo};
use crate::plugin::{
    BusDescriptor, BusDirection, BusType, ComponentLink, MediaType, PluginComponent,
    PluginController, PluginView, ProcessData, ProcessMode, ProcessSetup, SpeakerArrangement,
    speaker,
};
use std::ffi::CString;
use std::sync::Arc;
use vst3::Steinberg::Vst::BusDirections_::{kInput, kOutput};
use vst3::Steinberg::Vst::BusInfo_::BusFlags_::kDefaultActive;
use vst3::Steinberg::Vst::BusTypes_::kMain;
use vst3::Steinberg::Vst::MediaTypes_::{kAudio, kEvent};
use vst3::Steinberg::Vst::ProcessModes_::{kOffline, kRealtime};
use vst3::Steinberg::Vst::SymbolicSampleSizes_::kSample32;
use vst3::Steinberg::Vst::{
    AudioBusBuffers, AudioBusBuffers__type0, BusInfo, IAudioProcessor, IAudioProcessorTrait,
    IComponent, IComponentHandler, IComponentTrait, IConnectionPoint, IConnectionPointTrait,
    IEditController, IEditControllerTrait, IEventList, IMidiMapping, IMidiMappingTrait,
    IParameterChanges, IUnitInfo, IUnitInfoTrait, ParameterInfo as Vst3ParameterInfo,
    ProcessContext as Vst3ProcessContext, ProcessData as Vst3ProcessData,
    ProcessSetup as Vst3ProcessSetup, ProgramListInfo, String128, ViewType,
};
use vst3::Steinberg::{
    FUnknown, IPlugFrame, IPlugView, IPlugViewTrait, IPluginBaseTrait, kNotImplemented,
    kResultOk,
};
use vst3::{ComPtr, ComWrapper};

fn media(media: MediaType) -> i32 {
    match media {
        MediaType::Audio => kAudio as i32,
        MediaType::Event => kEvent as i32,
    }
}

fn direction(direction: BusDirection) -> i32 {
    match direction {
        BusDirection::Input => kInput as i32,
        BusDirection::Output => kOutput as i32,
    }
}

/// Channel pointer storage for one direction. Grows only outside `process`.
#[derive(Default)]
struct BusPointers {
    channels: Vec<Vec<*mut f32>>,
    limits: Vec<usize>,
    buses: Vec<AudioBusBuffers>,
}

impl BusPointers {
    fn reserve(&mut self, channel_counts: impl Iterator<Item = usize>) {
        for (bus, count) in channel_counts.enumerate() {
            if self.channels.len() <= bus {
                self.channels.push(Vec::new());
                self.limits.push(0);
            }
            if self.limits[bus] < count {
                let channels = &mut self.channels[bus];
                channels.reserve_exact(count.saturating_sub(channels.len()));
                self.limits[bus] = count;
            }
        }
        self.buses
            .reserve_exact(self.channels.len().saturating_sub(self.buses.len()));
    }

    /// Points the plugin at `buffers`. Buses or channels beyond what was
    /// reserved are left out rather than allocated.
    fn bind<C>(&mut self, buffers: impl Iterator<Item = (u64, C)>)
    where
        C: Iterator<Item = *mut f32>,
    {
        self.buses.clear();
        for (index, (silence_flags, source)) in buffers.enumerate() {
            let (Some(ptrs), Some(&limit)) = (self.channels.get_mut(index), self.limits.get(index))
            else {
                break;
            };
            ptrs.clear();
            for channel in source.take(limit) {
                ptrs.push(channel);
            }
            self.buses.push(AudioBusBuffers {
                numChannels: ptrs.len() as i32,
                silenceFlags: silence_flags,
                __field0: AudioBusBuffers__type0 {
                    channelBuffers32: ptrs.as_mut_ptr(),
                },
            });
        }
    }

    fn as_mut_ptr(&mut self) -> *mut AudioBusBuffers {
        if self.buses.is_empty() {
            std::ptr::null_mut()
        } else {
            self.buses.as_mut_ptr()
        }
    }
}

/// `IComponent` + `IAudioProcessor` behind the `PluginComponent` trait.
pub(crate) struct Vst3Component {
    processor: ComPtr<IAudioProcessor>,
    component: ComPtr<IComponent>,
    input_changes: ComWrapper<ParameterChangesView>,
    output_changes: ComWrapper<ParameterChangesView>,
    input_events: ComWrapper<EventListView>,
    output_events: ComWrapper<EventListView>,
    inputs: BusPointers,
    outputs: BusPointers,
    context: Vst3ProcessContext,
    process_mode: i32,
    _host_app: ComPtr<FUnknown>,
    _module: Arc<PluginModule>,
}

// SAFETY: the bridge serializes every call into the component behind its
// process lock, and VST3 components may be driven from any single thread at a
// time. The list views are only bound for the duration of one `process` call.
unsafe impl Send for Vst3Component {}

impl Vst3Component {
    pub(crate) fn new(
        component: ComPtr<IComponent>,
        processor: ComPtr<IAudioProcessor>,
        parameter_count: usize,
        host_app: ComPtr<FUnknown>,
        module: Arc<PluginModule>,
    ) -> Self {
        let mut this = Self {
            processor,
            component,
            input_changes: ComWrapper::new(ParameterChangesView::new(parameter_count)),
            output_changes: ComWrapper::new(ParameterChangesView::new(parameter_count)),
            input_events: ComWrapper::new(EventListView::new()),
            output_events: ComWrapper::new(EventListView::new()),
            inputs: BusPointers::default(),
            outputs: BusPointers::default(),
            // SAFETY: ProcessContext is plain data; zeroed is a valid value.
            context: unsafe { std::mem::zeroed() },
            process_mode: kRealtime as i32,
            _host_app: host_app,
            _module: module,
        };
        this.reserve_from_bus_info();
        this
    }

    fn reserve_from_bus_info(&mut self) {
        for dir in [BusDirection::Input, BusDirection::Output] {
            let counts: Vec<usize> = (0..self.bus_count(MediaType::Audio, dir))
                .map(|i| {
                    self.bus_info(MediaType::Audio, dir, i)
                        .map_or(0, |b| b.channel_count as usize)
                })
                .collect();
            match dir {
                BusDirection::Input => self.inputs.reserve(counts.into_iter()),
                BusDirection::Output => self.outputs.reserve(counts.into_iter()),
            }
        }
    }
}

impl PluginComponent for Vst3Component {
    fn bus_count(&self, media_type: MediaType, dir: BusDirection) -> usize {
        // SAFETY: plain query on a live component.
        unsafe { self.component.getBusCount(media(media_type), direction(dir)) }.max(0) as usize
    }

    fn bus_info(&self, media_type: MediaType, dir: BusDirection, index: usize) -> Option<BusDescriptor> {
        // SAFETY: BusInfo is plain data; zeroed is a valid initial value.
        let mut info: BusInfo = unsafe { std::mem::zeroed() };
        // SAFETY: out pointer is a live local.
        let result = unsafe {
            self.component
                .getBusInfo(media(media_type), direction(dir), index as i32, &mut info)
        };
        if result != kResultOk {
            return None;
        }
        Some(BusDescriptor {
            name: string128_to_string(&info.name),
            bus_type: if info.busType == kMain as i32 {
                BusType::Main
            } else {
                BusType::Aux
            },
            channel_count: info.channelCount.max(0) as u32,
            default_active: info.flags & kDefaultActive as u32 != 0,
        })
    }

    fn activate_bus(&mut self, media_type: MediaType, dir: BusDirection, index: usize, active: bool) -> bool {
        // SAFETY: plain call on a live component.
        let result = unsafe {
            self.component
                .activateBus(media(media_type), direction(dir), index as i32, active as u8)
        };
        result == kResultOk
    }

    fn set_bus_arrangements(&mut self, inputs: &[SpeakerArrangement], outputs: &[SpeakerArrangement]) -> bool {
        let mut ins = inputs.to_vec();
        let mut outs = outputs.to_vec();
        // SAFETY: both arrays are live for the call and sized as passed.
        let result = unsafe {
            self.processor.setBusArrangements(
                ins.as_mut_ptr(),
                ins.len() as i32,
                outs.as_mut_ptr(),
                outs.len() as i32,
            )
        };
        self.inputs
            .reserve(inputs.iter().map(|&a| speaker::channel_count(a) as usize));
        self.outputs
            .reserve(outputs.iter().map(|&a| speaker::channel_count(a) as usize));
        result == kResultOk
    }

    fn setup_processing(&mut self, setup: &ProcessSetup) -> bool {
        // SAFETY: plain query on a live processor.
        if unsafe { self.processor.canProcessSampleSize(kSample32 as i32) } != kResultOk {
            tracing::warn!("VST3 plugin cannot process 32-bit samples");
            return false;
        }
        self.reserve_from_bus_info();
        let process_mode = match setup.mode {
            ProcessMode::Realtime => kRealtime as i32,
            ProcessMode::Offline => kOffline as i32,
        };
        let mut vst_setup = Vst3ProcessSetup {
            processMode: process_mode,
            symbolicSampleSize: kSample32 as i32,
            maxSamplesPerBlock: setup.max_block_size as i32,
            sampleRate: setup.sample_rate,
        };
        // SAFETY: out struct is a live local.
        let accepted = unsafe { self.processor.setupProcessing(&mut vst_setup) == kResultOk };
        if accepted {
            self.process_mode = process_mode;
        }
        accepted
    }

    fn set_active(&mut self, active: bool) -> bool {
        // SAFETY: plain call on a live component.
        unsafe { self.component.setActive(active as u8) == kResultOk }
    }

    fn set_processing(&mut self, processing: bool) -> bool {
        // SAFETY: plain call on a live processor.
        let result = unsafe { self.processor.setProcessing(processing as u8) };
        result == kResultOk || result == kNotImplemented
    }

    fn process(&mut self, data: &mut ProcessData<'_>) -> bool {
        // Plugins must not write to inputs; the pointer type is the SDK's.
        self.inputs.bind(data.inputs.iter().map(|b| {
            (
                b.silence_flags,
                b.channels().iter().map(|c| c.as_ptr() as *mut f32),
            )
        }));
        self.outputs.bind(data.outputs.iter_mut().map(|b| {
            (
                b.silence_flags,
                b.channels_mut().iter_mut().map(|c| c.as_mut_ptr()),
            )
        }));
        self.input_changes.bind_input(data.input_parameter_changes);
        self.output_changes.bind_output(data.output_parameter_changes);
        self.input_events.bind_input(data.input_events);
        self.output_events.bind_output(data.output_events);
        fill_context(&mut self.context, data.context);

        let null_changes = std::ptr::null_mut::<IParameterChanges>();
        let null_events = std::ptr::null_mut::<IEventList>();
        let mut vst_data = Vst3ProcessData {
            processMode: self.process_mode,
            symbolicSampleSize: kSample32 as i32,
            numSamples: data.num_samples as i32,
            numInputs: self.inputs.buses.len() as i32,
            numOutputs: self.outputs.buses.len() as i32,
            inputs: self.inputs.as_mut_ptr(),
            outputs: self.outputs.as_mut_ptr(),
            inputParameterChanges: self
                .input_changes
                .as_com_ref::<IParameterChanges>()
                .map_or(null_changes, |r| r.as_ptr()),
            outputParameterChanges: self
                .output_changes
                .as_com_ref::<IParameterChanges>()
                .map_or(null_changes, |r| r.as_ptr()),
            inputEvents: self
                .input_events
                .as_com_ref::<IEventList>()
                .map_or(null_events, |r| r.as_ptr()),
            outputEvents: self
                .output_events
                .as_com_ref::<IEventList>()
                .map_or(null_events, |r| r.as_ptr()),
            processContext: &mut self.context,
        };
        // SAFETY: every pointer in `vst_data` refers to storage that outlives
        // the call; channel pointers cover `num_samples` frames.
        let result = unsafe { self.processor.process(&mut vst_data) };

        self.input_changes.unbind();
        self.output_changes.unbind();
        self.input_events.unbind();
        self.output_events.unbind();
        for (buffer, bus) in data.outputs.iter_mut().zip(self.outputs.buses.iter()) {
            buffer.silence_flags = bus.silenceFlags;
        }
        result == kResultOk
    }

    fn latency_samples(&self) -> u32 {
        // SAFETY: plain query on a live processor.
        unsafe { self.processor.getLatencySamples() }
    }

    fn tail_samples(&self) -> u32 {
        // SAFETY: plain query on a live processor.
        unsafe { self.processor.getTailSamples() }
    }

    fn get_state(&mut self, out: &mut Vec<u8>) -> bool {
        // SAFETY: the stream pointer is live for the call.
        capture(out, |stream| unsafe { self.component.getState(stream) })
    }

    fn set_state(&mut self, data: &[u8]) -> bool {
        // SAFETY: the stream pointer is live for the call.
        replay(data, |stream| unsafe { self.component.setState(stream) })
    }
}

impl Drop for Vst3Component {
    fn drop(&mut self) {
        // SAFETY: balances the initialize done at instantiation.
        unsafe {
            self.component.terminate();
        }
    }
}

/// `IEditController` and its optional companions behind `PluginController`.
pub(crate) struct Vst3Controller {
    controller: ComPtr<IEditController>,
    midi_mapping: Option<ComPtr<IMidiMapping>>,
    unit_info: Option<ComPtr<IUnitInfo>>,
    context_handler: Option<ComPtr<IContextInfoHandler>>,
    context_handler2: Option<ComPtr<IContextInfoHandler2>>,
    callbacks: Option<ComWrapper<HostCallbacks>>,
    host: Option<Arc<HostContext>>,
    has_editor: bool,
    separate: bool,
    _host_app: ComPtr<FUnknown>,
    module: Arc<PluginModule>,
}

// SAFETY: controller calls happen on the control thread behind the
// instance's controller lock.
unsafe impl Send for Vst3Controller {}

impl Vst3Controller {
    pub(crate) fn new(
        controller: ComPtr<IEditController>,
        separate: bool,
        host_app: ComPtr<FUnknown>,
        module: Arc<PluginModule>,
    ) -> Self {
        // VST3 has no capability query for editors; create one at load and
        // release it straight away.
        // SAFETY: a returned view carries one reference, released by ComPtr.
        let has_editor =
            unsafe { ComPtr::from_raw(controller.createView(ViewType::kEditor)) }.is_some();
        Self {
            midi_mapping: controller.cast::<IMidiMapping>(),
            unit_info: controller.cast::<IUnitInfo>(),
            context_handler: controller.cast::<IContextInfoHandler>(),
            context_handler2: controller.cast::<IContextInfoHandler2>(),
            controller,
            callbacks: None,
            host: None,
            has_editor,
            separate,
            _host_app: host_app,
            module,
        }
    }

    fn program_names_of(unit_info: &ComPtr<IUnitInfo>) -> Vec<String> {
        let mut names = Vec::new();
        // SAFETY: plain queries on a live interface with local out structs.
        unsafe {
            for list in 0..unit_info.getProgramListCount() {
                let mut info: ProgramListInfo = std::mem::zeroed();
                if unit_info.getProgramListInfo(list, &mut info) != kResultOk {
                    continue;
                }
                for program in 0..info.programCount {
                    let mut name: String128 = [0; 128];
                    if unit_info.getProgramName(info.id, program, &mut name) == kResultOk {
                        names.push(string128_to_string(&name));
                    }
                }
            }
        }
        names
    }
}

impl PluginController for Vst3Controller {
    fn set_component_handler(&mut self, host: Arc<HostContext>) {
        let callbacks = ComWrapper::new(HostCallbacks::new(Arc::clone(&host)));
        if let Some(handler) = callbacks.as_com_ref::<IComponentHandler>() {
            // SAFETY: the wrapper is kept alive in `self.callbacks`.
            let result = unsafe { self.controller.setComponentHandler(handler.as_ptr()) };
            if result != kResultOk {
                tracing::warn!("VST3 controller rejected component handler (result={result})");
            }
        }
        self.callbacks = Some(callbacks);
        self.host = Some(host);
    }

    fn parameter_count(&self) -> usize {
        // SAFETY: plain query on a live controller.
        unsafe { self.controller.getParameterCount() }.max(0) as usize
    }

    fn parameter_info(&self, index: usize) -> Option<ParameterInfo> {
        // SAFETY: ParameterInfo is plain data; zeroed is a valid initial value.
        let mut info: Vst3ParameterInfo = unsafe { std::mem::zeroed() };
        // SAFETY: out pointer is a live local.
        if unsafe { self.controller.getParameterInfo(index as i32, &mut info) } != kResultOk {
            return None;
        }
        Some(ParameterInfo {
            id: info.id,
            title: string128_to_string(&info.title),
            short_title: string128_to_string(&info.shortTitle),
            units: string128_to_string(&info.units),
            step_count: info.stepCount,
            default_value: info.defaultNormalizedValue,
            flags: info.flags,
        })
    }

    fn param_normalized(&self, id: ParamId) -> f64 {
        // SAFETY: plain query on a live controller.
        unsafe { self.controller.getParamNormalized(id) }
    }

    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> bool {
        // SAFETY: plain call on a live controller.
        unsafe { self.controller.setParamNormalized(id, value) == kResultOk }
    }

    fn param_to_string(&self, id: ParamId, value: f64) -> Option<String> {
        let mut text: String128 = [0; 128];
        // SAFETY: out buffer is a live local.
        let result = unsafe { self.controller.getParamStringByValue(id, value, &mut text) };
        (result == kResultOk).then(|| string128_to_string(&text))
    }

    fn set_component_state(&mut self, data: &[u8]) -> bool {
        // SAFETY: the stream pointer is live for the call.
        replay(data, |stream| unsafe { self.controller.setComponentState(stream) })
    }

    fn get_state(&mut self, out: &mut Vec<u8>) -> bool {
        // SAFETY: the stream pointer is live for the call.
        capture(out, |stream| unsafe { self.controller.getState(stream) })
    }

    fn set_state(&mut self, data: &[u8]) -> bool {
        // SAFETY: the stream pointer is live for the call.
        replay(data, |stream| unsafe { self.controller.setState(stream) })
    }

    fn midi_controller_assignment(&self, bus: u16, channel: u8, controller: u8) -> Option<ParamId> {
        let mapping = self.midi_mapping.as_ref()?;
        let mut id: ParamId = 0;
        // SAFETY: out pointer is a live local.
        let result = unsafe {
            mapping.getMidiControllerAssignment(
                i32::from(bus),
                i16::from(channel),
                i16::from(controller),
                &mut id,
            )
        };
        (result == kResultOk).then_some(id)
    }

    fn program_names(&self) -> Vec<String> {
        self.unit_info
            .as_ref()
            .map(Self::program_names_of)
            .unwrap_or_default()
    }

    fn has_editor(&self) -> bool {
        self.has_editor
    }

    fn create_view(&mut self) -> Option<Box<dyn PluginView>> {
        let host = self.host.clone()?;
        // SAFETY: a returned view carries one reference owned by the ComPtr.
        let view: ComPtr<IPlugView> =
            unsafe { ComPtr::from_raw(self.controller.createView(ViewType::kEditor)) }?;
        let frame = ComWrapper::new(PlugFrameCallbacks::new(host));
        if let Some(frame_ref) = frame.as_com_ref::<IPlugFrame>() {
            // SAFETY: the frame wrapper lives as long as the view wrapper.
            unsafe {
                view.setFrame(frame_ref.as_ptr());
            }
        }
        Some(Box::new(Vst3View::new(view, frame, Arc::clone(&self.module))))
    }

    /// Prefers the keyed notification and falls back to the bare one.
    fn context_info_changed(&mut self, key: &str) {
        if let Some(handler) = &self.context_handler2 {
            let Ok(id) = CString::new(key) else {
                tracing::warn!("Context key {key:?} contains NUL, not forwarded");
                return;
            };
            let ptr = handler.as_ptr();
            // SAFETY: live interface; `id` outlives the call.
            unsafe { ((*(*ptr).vtbl).notifyContextInfoChange)(ptr, id.as_ptr()) };
        } else if let Some(handler) = &self.context_handler {
            let ptr = handler.as_ptr();
            // SAFETY: live interface.
            unsafe { ((*(*ptr).vtbl).notifyContextInfoChange)(ptr) };
        }
    }
}

impl Drop for Vst3Controller {
    fn drop(&mut self) {
        // SAFETY: detaching the handler and terminating a separate controller
        // are the last calls made on it.
        unsafe {
            self.controller.setComponentHandler(std::ptr::null_mut());
            if self.separate {
                self.controller.terminate();
            }
        }
    }
}

/// Connects a separate component and controller through `IConnectionPoint`.
pub(crate) struct Vst3Link {
    component: ComPtr<IConnectionPoint>,
    controller: ComPtr<IConnectionPoint>,
    connected: bool,
    _module: Arc<PluginModule>,
}

// SAFETY: connect and disconnect run on the control thread under the
// instance's link lock.
unsafe impl Send for Vst3Link {}

impl Vst3Link {
    pub(crate) fn new(
        component: ComPtr<IConnectionPoint>,
        controller: ComPtr<IConnectionPoint>,
        module: Arc<PluginModule>,
    ) -> Self {
        Self {
            component,
            controller,
            connected: false,
            _module: module,
        }
    }
}

impl ComponentLink for Vst3Link {
    fn connect(&mut self) -> bool {
        if self.connected {
            return true;
        }
        // SAFETY: both points are live; each keeps a reference to the other
        // until disconnect.
        let ok = unsafe {
            self.component.connect(self.controller.as_ptr()) == kResultOk
                && self.controller.connect(self.component.as_ptr()) == kResultOk
        };
        if !ok {
            tracing::warn!("VST3 component and controller refused to connect");
            self.disconnect_points();
            return false;
        }
        self.connected = true;
        true
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.disconnect_points();
            self.connected = false;
        }
    }
}

impl Vst3Link {
    fn disconnect_points(&self) {
        // SAFETY: disconnecting an unconnected point is a harmless failure.
        unsafe {
            self.component.disconnect(self.controller.as_ptr());
            self.controller.disconnect(self.component.as_ptr());
        }
    }
}

impl Drop for Vst3Link {
    fn drop(&mut self) {
        self.disconnect();
    }
}
