#![allow(dead_code)]

//! In-process plugin that records every call the bridge makes into it.

use maolan_vst3_bridge::params::flags;
use maolan_vst3_bridge::{
    BridgeOptions, BusDescriptor, BusDirection, BusType, ComponentLink, HostContext, HostNotification,
    MediaType, MidiBuffer, NativeEvent, ParamId, ParameterInfo, PluginComponent, PluginController,
    PluginInstance, PluginParts, PluginView, ProcessData, ProcessSetup, RestartFlags,
    TransportInfo,
};
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

pub const GAIN: ParamId = 100;
pub const MIX: ParamId = 101;
pub const BYPASS: ParamId = 102;
pub const PROGRAM: ParamId = 103;

pub const BLOCK: usize = 64;

pub struct MockState {
    pub calls: Vec<String>,
    pub values: HashMap<ParamId, f64>,
    pub controller_blob: Vec<u8>,
    pub reject_component_state: bool,
    pub arrangements: (Vec<u64>, Vec<u64>),
    pub setup: Option<ProcessSetup>,
    pub max_block_size: usize,
    pub latency: u32,
    pub seen_changes: Vec<Vec<(ParamId, i32, f64)>>,
    pub seen_events: Vec<Vec<NativeEvent>>,
    pub seen_tempo: Vec<f64>,
    pub emit_changes: Vec<(ParamId, i32, f64)>,
    pub emit_events: Vec<NativeEvent>,
    pub restart_in_process: Option<RestartFlags>,
    pub fail_process: bool,
    pub host: Option<Arc<HostContext>>,
    pub program_names: Vec<String>,
    pub cc_map: HashMap<(u16, u8, u8), ParamId>,
    pub has_editor: bool,
    pub view_size: (u32, u32),
    pub state_gate: Option<Arc<Barrier>>,
    /// Edit the controller reports through the host while restoring.
    pub edit_on_restore: Option<(ParamId, f64)>,
    /// Runs once inside the next `process`, after outputs are written.
    pub during_process: Option<Box<dyn FnOnce() + Send>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            values: HashMap::from([(GAIN, 0.5), (MIX, 1.0), (BYPASS, 0.0), (PROGRAM, 0.0)]),
            controller_blob: Vec::new(),
            reject_component_state: false,
            arrangements: (Vec::new(), Vec::new()),
            setup: None,
            max_block_size: 4096,
            latency: 0,
            seen_changes: Vec::new(),
            seen_events: Vec::new(),
            seen_tempo: Vec::new(),
            emit_changes: Vec::new(),
            emit_events: Vec::new(),
            restart_in_process: None,
            fail_process: false,
            host: None,
            program_names: vec!["Init".into(), "Warm".into(), "Bright".into()],
            cc_map: HashMap::new(),
            has_editor: true,
            view_size: (640, 480),
            state_gate: None,
            edit_on_restore: None,
            during_process: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct Mock(Arc<Mutex<MockState>>);

impl Mock {
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    fn record(&self, call: impl Into<String>) {
        self.state().calls.push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls whose name starts with `prefix`, in order.
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn value(&self, id: ParamId) -> f64 {
        self.state().values.get(&id).copied().unwrap_or(0.0)
    }

    pub fn host(&self) -> Arc<HostContext> {
        self.state().host.clone().unwrap()
    }

    pub fn parts(&self, with_link: bool) -> PluginParts {
        PluginParts {
            plugin_id: "5A3F0C11D2E34B7A9C1D00FFEE123456".into(),
            name: "Mock Gain".into(),
            component: Box::new(MockComponent(self.clone())),
            controller: Box::new(MockController(self.clone())),
            link: with_link.then(|| Box::new(MockLink(self.clone())) as Box<dyn ComponentLink>),
        }
    }
}

pub struct MockComponent(Mock);

fn audio_buses(direction: BusDirection) -> Vec<BusDescriptor> {
    match direction {
        BusDirection::Input => vec![
            BusDescriptor {
                name: "Input".into(),
                bus_type: BusType::Main,
                channel_count: 2,
                default_active: true,
            },
            BusDescriptor {
                name: "Sidechain".into(),
                bus_type: BusType::Aux,
                channel_count: 2,
                default_active: false,
            },
        ],
        BusDirection::Output => vec![BusDescriptor {
            name: "Output".into(),
            bus_type: BusType::Main,
            channel_count: 2,
            default_active: true,
        }],
    }
}

fn event_bus() -> BusDescriptor {
    BusDescriptor {
        name: "MIDI".into(),
        bus_type: BusType::Main,
        channel_count: 16,
        default_active: true,
    }
}

impl PluginComponent for MockComponent {
    fn bus_count(&self, media: MediaType, direction: BusDirection) -> usize {
        match media {
            MediaType::Audio => audio_buses(direction).len(),
            MediaType::Event => 1,
        }
    }

    fn bus_info(&self, media: MediaType, direction: BusDirection, index: usize) -> Option<BusDescriptor> {
        match media {
            MediaType::Audio => audio_buses(direction).get(index).cloned(),
            MediaType::Event => (index == 0).then(event_bus),
        }
    }

    fn activate_bus(&mut self, media: MediaType, direction: BusDirection, index: usize, active: bool) -> bool {
        self.0
            .record(format!("activate_bus {media:?} {direction:?} {index} {active}"));
        true
    }

    /// Main buses take mono or stereo; the sidechain is stereo only.
    fn set_bus_arrangements(&mut self, inputs: &[u64], outputs: &[u64]) -> bool {
        let channels = |a: &u64| a.count_ones();
        let ok = inputs.len() == 2
            && outputs.len() == 1
            && (1..=2).contains(&channels(&inputs[0]))
            && channels(&inputs[1]) == 2
            && (1..=2).contains(&channels(&outputs[0]));
        if ok {
            self.0.state().arrangements = (inputs.to_vec(), outputs.to_vec());
        }
        ok
    }

    fn setup_processing(&mut self, setup: &ProcessSetup) -> bool {
        self.0.record(format!("setup_processing {}", setup.max_block_size));
        let mut state = self.0.state();
        if setup.max_block_size > state.max_block_size {
            return false;
        }
        state.setup = Some(*setup);
        true
    }

    fn set_active(&mut self, active: bool) -> bool {
        self.0.record(format!("set_active {active}"));
        true
    }

    fn set_processing(&mut self, processing: bool) -> bool {
        self.0.record(format!("set_processing {processing}"));
        true
    }

    fn process(&mut self, data: &mut ProcessData<'_>) -> bool {
        let mut state = self.0.state();
        state.seen_changes.push(
            data.input_parameter_changes
                .iter()
                .flat_map(|q| (0..q.point_count()).filter_map(move |i| q.point(i).map(|(o, v)| (q.id(), o, v))))
                .collect(),
        );
        state.seen_events.push(data.input_events.iter().copied().collect());
        state.seen_tempo.push(data.context.tempo);

        if state.fail_process {
            return false;
        }

        let n = data.num_samples;
        for (input, output) in data.inputs[0]
            .channels()
            .iter()
            .zip(data.outputs[0].channels_mut().iter_mut())
        {
            output[..n].copy_from_slice(&input[..n]);
        }
        for (id, offset, value) in std::mem::take(&mut state.emit_changes) {
            data.output_parameter_changes.add_point(id, offset, value);
        }
        for event in std::mem::take(&mut state.emit_events) {
            data.output_events.push(event);
        }

        let restart = state.restart_in_process.take();
        let during = state.during_process.take();
        let host = state.host.clone();
        drop(state);
        if let Some(during) = during {
            during();
        }
        if let (Some(flags), Some(host)) = (restart, host) {
            use maolan_vst3_bridge::ComponentHandler;
            host.restart_component(flags);
        }
        true
    }

    fn latency_samples(&self) -> u32 {
        self.0.state().latency
    }

    /// Parks on `state_gate` twice when one is set, so a test can hold the
    /// process lock from another thread.
    fn get_state(&mut self, out: &mut Vec<u8>) -> bool {
        let gate = self.0.state().state_gate.clone();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        out.extend_from_slice(&self.0.value(GAIN).to_le_bytes());
        true
    }

    fn set_state(&mut self, data: &[u8]) -> bool {
        self.0.record("component.set_state");
        let mut state = self.0.state();
        if state.reject_component_state {
            return false;
        }
        let Ok(bytes) = <[u8; 8]>::try_from(data) else {
            return false;
        };
        state.values.insert(GAIN, f64::from_le_bytes(bytes));
        true
    }
}

pub struct MockController(Mock);

fn infos() -> Vec<ParameterInfo> {
    let info = |id, title: &str, step_count, default_value, flags| ParameterInfo {
        id,
        title: title.into(),
        short_title: title[..3].into(),
        units: String::new(),
        step_count,
        default_value,
        flags,
    };
    vec![
        info(GAIN, "Gain", 0, 0.5, flags::CAN_AUTOMATE),
        info(MIX, "Mix", 0, 1.0, flags::CAN_AUTOMATE),
        info(BYPASS, "Bypass", 1, 0.0, flags::CAN_AUTOMATE | flags::IS_BYPASS),
        info(PROGRAM, "Program", 2, 0.0, flags::IS_LIST | flags::IS_PROGRAM_CHANGE),
    ]
}

impl PluginController for MockController {
    fn set_component_handler(&mut self, host: Arc<HostContext>) {
        self.0.record("set_component_handler");
        self.0.state().host = Some(host);
    }

    fn parameter_count(&self) -> usize {
        infos().len()
    }

    fn parameter_info(&self, index: usize) -> Option<ParameterInfo> {
        infos().into_iter().nth(index)
    }

    fn param_normalized(&self, id: ParamId) -> f64 {
        self.0.value(id)
    }

    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> bool {
        self.0.record(format!("set_param_normalized {id} {value}"));
        self.0.state().values.insert(id, value);
        true
    }

    fn param_to_string(&self, id: ParamId, value: f64) -> Option<String> {
        (id == GAIN).then(|| format!("{:.1} dB", (value - 0.5) * 48.0))
    }

    fn set_component_state(&mut self, data: &[u8]) -> bool {
        self.0.record("set_component_state");
        let Ok(bytes) = <[u8; 8]>::try_from(data) else {
            return false;
        };
        let mut state = self.0.state();
        state.values.insert(GAIN, f64::from_le_bytes(bytes));
        let edit = state.edit_on_restore.take();
        if let Some((id, value)) = edit {
            state.values.insert(id, value);
        }
        let host = state.host.clone();
        drop(state);
        if let (Some((id, value)), Some(host)) = (edit, host) {
            use maolan_vst3_bridge::ComponentHandler;
            host.begin_edit(id);
            host.perform_edit(id, value);
            host.end_edit(id);
        }
        true
    }

    fn get_state(&mut self, out: &mut Vec<u8>) -> bool {
        out.extend_from_slice(&self.0.state().controller_blob);
        true
    }

    fn set_state(&mut self, data: &[u8]) -> bool {
        self.0.record("controller.set_state");
        self.0.state().controller_blob = data.to_vec();
        true
    }

    fn midi_controller_assignment(&self, bus: u16, channel: u8, controller: u8) -> Option<ParamId> {
        self.0.state().cc_map.get(&(bus, channel, controller)).copied()
    }

    fn program_names(&self) -> Vec<String> {
        self.0.state().program_names.clone()
    }

    fn has_editor(&self) -> bool {
        self.0.state().has_editor
    }

    fn create_view(&mut self) -> Option<Box<dyn PluginView>> {
        self.0.record("create_view");
        let size = {
            let state = self.0.state();
            if !state.has_editor {
                return None;
            }
            state.view_size
        };
        Some(Box::new(MockView {
            mock: self.0.clone(),
            size,
            handle: Box::new(0u8),
        }))
    }

    fn context_info_changed(&mut self, key: &str) {
        self.0.record(format!("context_info_changed {key}"));
    }
}

pub struct MockView {
    mock: Mock,
    size: (u32, u32),
    handle: Box<u8>,
}

impl PluginView for MockView {
    fn size(&self) -> Option<(u32, u32)> {
        Some(self.size)
    }

    fn on_size(&mut self, width: u32, height: u32) -> bool {
        self.mock.record(format!("on_size {width}x{height}"));
        self.size = (width, height);
        true
    }

    fn native_handle(&self) -> *mut c_void {
        &*self.handle as *const u8 as *mut c_void
    }

    fn removed(&mut self) {
        self.mock.record("view.removed");
    }
}

pub struct MockLink(Mock);

impl ComponentLink for MockLink {
    fn connect(&mut self) -> bool {
        self.0.record("link.connect");
        true
    }

    fn disconnect(&mut self) {
        self.0.record("link.disconnect");
    }
}

pub fn options() -> BridgeOptions {
    BridgeOptions {
        block_size: BLOCK,
        ..BridgeOptions::default()
    }
}

/// Sends bridge logging to the test harness's captured output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn host_instance(mock: &Mock, options: BridgeOptions) -> (Arc<PluginInstance>, Receiver<HostNotification>) {
    init_tracing();
    PluginInstance::new(mock.parts(true), options)
}

/// An activated instance over a fresh mock.
pub fn active_instance() -> (Mock, Arc<PluginInstance>, Receiver<HostNotification>) {
    let mock = Mock::default();
    let (instance, rx) = host_instance(&mock, options());
    assert!(instance.activate());
    (mock, instance, rx)
}

/// Runs one silent stereo cycle of `frames` samples.
pub fn run_cycle(instance: &PluginInstance, frames: usize) -> bool {
    run_cycle_with_midi(instance, frames, &[], &mut MidiBuffer::with_capacity(64))
}

pub fn run_cycle_with_midi(
    instance: &PluginInstance,
    frames: usize,
    midi_in: &[maolan_vst3_bridge::MidiEvent],
    midi_out: &mut MidiBuffer,
) -> bool {
    let left = vec![0.0f32; frames];
    let right = vec![0.0f32; frames];
    let mut out_l = vec![0.0f32; frames];
    let mut out_r = vec![0.0f32; frames];
    let mut outputs = [out_l.as_mut_slice(), out_r.as_mut_slice()];
    instance.process(
        &[left.as_slice(), right.as_slice()],
        &mut outputs,
        midi_in,
        midi_out,
        &TransportInfo::default(),
        frames,
    )
}

pub fn drain(rx: &Receiver<HostNotification>) -> Vec<HostNotification> {
    rx.try_iter().collect()
}
