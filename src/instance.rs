use crate::bus::{AudioBusBuffer, AudioBusInfo, BusMapper};
use crate::config::BridgeOptions;
use crate::edits::{EditOrigin, ParameterChanges, PendingEdit};
use crate::error::{BridgeError, Result, StateSegment};
use crate::events::{EventList, EventTranscoder, MidiBuffer, MidiEvent};
use crate::host::{ContextValue, HostContext};
use crate::notify::{HostNotification, RouteProcessorChange};
use crate::params::{AutomationListId, ParamId, ParameterChange, ParameterDescriptor};
use crate::plugin::{
    BusDirection, BusType, ComponentLink, MediaType, PluginComponent, PluginController,
    PluginParts, ProcessData, ProcessMode, ProcessSetup, RestartFlags,
};
use crate::presets::PresetCatalog;
use crate::state::{LoadingGuard, PluginStateBlob};
use crate::transport::{ProcessContext, TransportInfo};
use crate::view::EditorViewProxy;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Everything `process` touches, guarded by the process lock.
struct ProcessorSlot {
    component: Box<dyn PluginComponent>,
    buses: BusMapper,
    transcoder: EventTranscoder,
    inputs: Vec<AudioBusBuffer>,
    outputs: Vec<AudioBusBuffer>,
    input_changes: ParameterChanges,
    output_changes: ParameterChanges,
    input_events: EventList,
    output_events: EventList,
    context: ProcessContext,
    active: bool,
    sample_rate: f64,
    block_size: usize,
    mode: ProcessMode,
    continuous_samples: i64,
}

impl ProcessorSlot {
    fn setup(&self) -> ProcessSetup {
        ProcessSetup {
            sample_rate: self.sample_rate,
            max_block_size: self.block_size,
            mode: self.mode,
        }
    }

    fn allocate_buffers(&mut self) {
        self.inputs = self.buses.allocate_buffers(BusDirection::Input, self.block_size);
        self.outputs = self.buses.allocate_buffers(BusDirection::Output, self.block_size);
    }
}

/// A hosted plugin: one component, one controller and the state the host
/// keeps on their behalf.
///
/// `process` is the only real-time entry point. Every other method belongs to
/// the control thread and may block on the process lock.
pub struct PluginInstance {
    plugin_id: String,
    name: String,
    options: BridgeOptions,
    host: Arc<HostContext>,
    view: Mutex<EditorViewProxy>,
    link: Mutex<Option<Box<dyn ComponentLink>>>,
    connected: AtomicBool,
    controller: Mutex<Box<dyn PluginController>>,
    processor: Mutex<ProcessorSlot>,
    presets: Mutex<PresetCatalog>,
    latency: AtomicU32,
    tail: AtomicU32,
    skipped_cycles: AtomicUsize,
    failed_cycles: AtomicUsize,
    dropped_events: AtomicUsize,
    torn_down: AtomicBool,
}

fn recover<T>(result: std::sync::LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PluginInstance {
    /// Wraps freshly instantiated plugin objects. Returns the instance and the
    /// receiving end of its notification channel.
    pub fn new(parts: PluginParts, options: BridgeOptions) -> (Arc<Self>, Receiver<HostNotification>) {
        let PluginParts {
            plugin_id,
            name,
            mut component,
            mut controller,
            link,
        } = parts;
        let (tx, rx) = channel();

        let mut component_state = Vec::new();
        if component.get_state(&mut component_state)
            && !controller.set_component_state(&component_state)
        {
            debug!("{name}: controller ignored initial component state");
        }

        let shadow = crate::params::ParameterShadow::from_controller(controller.as_ref());
        let host = Arc::new(HostContext::new(shadow, &options, tx));
        controller.set_component_handler(Arc::clone(&host));

        let buses = BusMapper::negotiate(component.as_mut(), options.compat.single_channel_main_bus);
        let mut transcoder = EventTranscoder::new(options.live_midi_cc);
        transcoder.rebuild_cc_map(
            controller.as_ref(),
            buses.event_buses(BusDirection::Input).len(),
        );

        let count = host.shadow.len();
        let latency = component.latency_samples();
        let tail = component.tail_samples();
        let mut slot = ProcessorSlot {
            component,
            buses,
            transcoder,
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_changes: ParameterChanges::with_capacity(count, options.max_points_per_parameter),
            output_changes: ParameterChanges::with_capacity(count, options.max_points_per_parameter),
            input_events: EventList::with_capacity(options.max_events_per_cycle),
            output_events: EventList::with_capacity(options.max_events_per_cycle),
            context: ProcessContext::default(),
            active: false,
            sample_rate: options.sample_rate,
            block_size: options.block_size.max(1),
            mode: ProcessMode::default(),
            continuous_samples: 0,
        };
        slot.allocate_buffers();

        let mut presets = PresetCatalog::default();
        presets.set_factory(controller.program_names());

        info!("Hosting {name} ({plugin_id}) with {count} parameters");

        let instance = Arc::new(Self {
            plugin_id,
            name,
            options,
            host: Arc::clone(&host),
            view: Mutex::new(EditorViewProxy::new()),
            link: Mutex::new(link),
            connected: AtomicBool::new(false),
            controller: Mutex::new(controller),
            processor: Mutex::new(slot),
            presets: Mutex::new(presets),
            latency: AtomicU32::new(latency),
            tail: AtomicU32::new(tail),
            skipped_cycles: AtomicUsize::new(0),
            failed_cycles: AtomicUsize::new(0),
            dropped_events: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
        });
        host.attach(Arc::downgrade(&instance));
        (instance, rx)
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    pub fn host(&self) -> &Arc<HostContext> {
        &self.host
    }

    fn lock_processor(&self) -> MutexGuard<'_, ProcessorSlot> {
        recover(self.processor.lock())
    }

    fn lock_controller(&self) -> MutexGuard<'_, Box<dyn PluginController>> {
        recover(self.controller.lock())
    }

    // ---- activation -------------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.lock_processor().active
    }

    pub fn activate(&self) -> bool {
        let mut slot = self.lock_processor();
        self.activate_slot(&mut slot)
    }

    pub fn deactivate(&self) -> bool {
        let mut slot = self.lock_processor();
        self.deactivate_slot(&mut slot)
    }

    fn activate_slot(&self, slot: &mut ProcessorSlot) -> bool {
        if slot.active {
            return true;
        }
        let setup = slot.setup();
        if !slot.component.setup_processing(&setup) {
            warn!("{}: rejected process setup {:?}", self.name, setup);
            return false;
        }
        if !slot.component.set_active(true) {
            warn!("{}: refused activation", self.name);
            return false;
        }
        if !slot.component.set_processing(true) {
            warn!("{}: refused to start processing", self.name);
            slot.component.set_active(false);
            return false;
        }
        slot.active = true;
        self.refresh_latency(slot);
        debug!("{}: activated at {} Hz, {} frames", self.name, setup.sample_rate, setup.max_block_size);
        true
    }

    fn deactivate_slot(&self, slot: &mut ProcessorSlot) -> bool {
        if !slot.active {
            return true;
        }
        slot.component.set_processing(false);
        if !slot.component.set_active(false) {
            warn!("{}: refused deactivation", self.name);
            slot.component.set_processing(true);
            return false;
        }
        slot.active = false;
        debug!("{}: deactivated", self.name);
        true
    }

    fn refresh_latency(&self, slot: &ProcessorSlot) {
        let latency = slot.component.latency_samples();
        self.tail.store(slot.component.tail_samples(), Ordering::Release);
        let previous = self.latency.swap(latency, Ordering::AcqRel);
        if previous != latency {
            info!("{}: latency {previous} -> {latency} samples", self.name);
            self.host.batcher.notify(RouteProcessorChange::LATENCY);
            self.host.post(HostNotification::LatencyChanged { samples: latency });
        }
    }

    pub fn latency(&self) -> u32 {
        self.latency.load(Ordering::Acquire)
    }

    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Acquire)
    }

    pub fn block_size(&self) -> usize {
        self.lock_processor().block_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.lock_processor().sample_rate
    }

    /// Only allowed while deactivated. A size the plugin rejects leaves the
    /// previous one in place.
    pub fn set_block_size(&self, block_size: usize) -> bool {
        let mut slot = self.lock_processor();
        if slot.active {
            warn!("{}: block size change to {block_size} while active", self.name);
            return false;
        }
        if block_size == 0 {
            return false;
        }
        let setup = ProcessSetup {
            max_block_size: block_size,
            ..slot.setup()
        };
        if !slot.component.setup_processing(&setup) {
            warn!("{}: rejected block size {block_size}", self.name);
            return false;
        }
        slot.block_size = block_size;
        slot.allocate_buffers();
        true
    }

    pub fn set_sample_rate(&self, sample_rate: f64) -> bool {
        let mut slot = self.lock_processor();
        if slot.active {
            warn!("{}: sample rate change to {sample_rate} while active", self.name);
            return false;
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return false;
        }
        let setup = ProcessSetup {
            sample_rate,
            ..slot.setup()
        };
        if !slot.component.setup_processing(&setup) {
            warn!("{}: rejected sample rate {sample_rate}", self.name);
            return false;
        }
        slot.sample_rate = sample_rate;
        true
    }

    pub fn is_non_realtime(&self) -> bool {
        self.lock_processor().mode == ProcessMode::Offline
    }

    /// Switches between real-time and offline rendering. Only allowed while
    /// deactivated; the mode reaches the plugin with the next setup.
    pub fn set_non_realtime(&self, non_realtime: bool) -> bool {
        let mut slot = self.lock_processor();
        let mode = if non_realtime {
            ProcessMode::Offline
        } else {
            ProcessMode::Realtime
        };
        if slot.mode == mode {
            return true;
        }
        if slot.active {
            warn!("{}: process mode change to {mode:?} while active", self.name);
            return false;
        }
        let setup = ProcessSetup { mode, ..slot.setup() };
        if !slot.component.setup_processing(&setup) {
            warn!("{}: rejected process mode {mode:?}", self.name);
            return false;
        }
        slot.mode = mode;
        debug!("{}: process mode {mode:?}", self.name);
        true
    }

    // ---- component wiring -------------------------------------------------

    pub fn connect_components(&self) -> bool {
        let mut link = recover(self.link.lock());
        if self.connected.load(Ordering::Acquire) {
            return true;
        }
        let ok = link.as_mut().is_none_or(|link| link.connect());
        if ok {
            self.connected.store(true, Ordering::Release);
        } else {
            warn!("{}: component and controller refused to connect", self.name);
        }
        ok
    }

    pub fn disconnect_components(&self) {
        let mut link = recover(self.link.lock());
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(link) = link.as_mut() {
            link.disconnect();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    // ---- real-time --------------------------------------------------------

    /// Runs one cycle. Never blocks: if the process lock is busy, the
    /// instance is inactive or the block is too large, outputs are silenced
    /// and the cycle is skipped.
    pub fn process(
        &self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        midi_in: &[MidiEvent],
        midi_out: &mut MidiBuffer,
        transport: &TransportInfo,
        num_samples: usize,
    ) -> bool {
        let Ok(mut guard) = self.processor.try_lock() else {
            self.skip_cycle(outputs, num_samples);
            return false;
        };
        if !guard.active || num_samples == 0 || num_samples > guard.block_size {
            self.skip_cycle(outputs, num_samples);
            return false;
        }

        let host = &*self.host;
        host.in_process.store(true, Ordering::Release);

        let ProcessorSlot {
            component,
            buses,
            transcoder,
            inputs: in_buffers,
            outputs: out_buffers,
            input_changes,
            output_changes,
            input_events,
            output_events,
            context,
            sample_rate,
            continuous_samples,
            ..
        } = &mut *guard;

        input_changes.clear();
        output_changes.clear();
        input_events.clear();
        output_events.clear();

        host.edits.drain_into(
            num_samples,
            input_changes,
            |index| host.shadow.id_of(index),
            |edit| {
                if edit.origin == EditOrigin::Host {
                    host.publish(ParameterChange::ValueChange {
                        index: edit.index,
                        value: edit.value,
                        recorded: edit.to_list,
                    });
                }
            },
        );

        transcoder.transcode_input(midi_in, num_samples, input_events, |control| {
            let Some(index) = host.shadow.index_of(control.id) else {
                return;
            };
            if !input_changes.add_point(control.id, control.frame as i32, control.value) {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let previous = host.shadow.swap(index, control.value);
            let value = host.shadow.get(index).unwrap_or(control.value);
            if previous != Some(value) {
                host.mark_controller_stale(index);
                if !host.automation.is_subscribed(index) {
                    host.publish(ParameterChange::ValueChange {
                        index,
                        value,
                        recorded: true,
                    });
                }
            }
        });

        context.update(transport, *sample_rate, *continuous_samples);
        buses.scatter_inputs(inputs, in_buffers, num_samples);

        let ok = {
            let mut data = ProcessData {
                num_samples,
                inputs: in_buffers.as_slice(),
                outputs: out_buffers.as_mut_slice(),
                input_parameter_changes: &*input_changes,
                output_parameter_changes: &mut *output_changes,
                input_events: &*input_events,
                output_events: &mut *output_events,
                context: &*context,
            };
            component.process(&mut data)
        };
        if !ok {
            self.failed_cycles.fetch_add(1, Ordering::Relaxed);
            for buffer in out_buffers.iter_mut() {
                buffer.silence(num_samples);
            }
            output_changes.clear();
            output_events.clear();
        }
        buses.gather_outputs(out_buffers, outputs, num_samples);

        for queue in output_changes.iter() {
            let Some(index) = host.shadow.index_of(queue.id()) else {
                continue;
            };
            let Some(value) = queue.last_value() else {
                continue;
            };
            // A host edit still in flight wins over the plugin's echo.
            if host.edits.is_dirty(index) {
                continue;
            }
            let previous = host.shadow.swap(index, value);
            if previous == Some(value) {
                continue;
            }
            host.mark_controller_stale(index);
            if !host.is_loading() && !host.automation.is_subscribed(index) {
                host.publish(ParameterChange::ValueChange {
                    index,
                    value,
                    recorded: false,
                });
            }
        }

        transcoder.transcode_output(output_events, midi_out);

        let overflow = input_events.overflowed() + output_events.overflowed();
        if overflow > 0 {
            self.dropped_events.fetch_add(overflow, Ordering::Relaxed);
        }
        *continuous_samples += num_samples as i64;
        host.in_process.store(false, Ordering::Release);
        ok
    }

    fn skip_cycle(&self, outputs: &mut [&mut [f32]], num_samples: usize) {
        self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
        for channel in outputs.iter_mut() {
            let n = num_samples.min(channel.len());
            channel[..n].fill(0.0);
        }
    }

    pub fn skipped_cycles(&self) -> usize {
        self.skipped_cycles.load(Ordering::Relaxed)
    }

    /// Cycles in which the plugin reported a processing failure.
    pub fn failed_cycles(&self) -> usize {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed) + self.host.edits.dropped()
    }

    // ---- parameters -------------------------------------------------------

    pub fn parameter_count(&self) -> usize {
        self.host.shadow.len()
    }

    pub fn parameter_descriptor(&self, index: usize) -> Option<ParameterDescriptor> {
        self.host.shadow.descriptor(index)
    }

    pub fn parameters(&self) -> Vec<ParameterDescriptor> {
        self.host.shadow.descriptors()
    }

    pub fn parameter_index(&self, id: ParamId) -> Option<usize> {
        self.host.shadow.index_of(id)
    }

    /// Reads the shadow table; never calls into the plugin.
    pub fn get_parameter(&self, index: usize) -> Option<f64> {
        self.host.shadow.get(index)
    }

    /// Writes the shadow value and queues the edit for the next cycle that
    /// reaches `sample_offset`. Unchanged values are not queued unless
    /// `force` is set. `to_list` false keeps the change off automation lists.
    pub fn set_parameter(
        &self,
        index: usize,
        value: f64,
        sample_offset: u32,
        to_list: bool,
        force: bool,
    ) -> bool {
        let Some(id) = self.host.shadow.id_of(index) else {
            debug!("{}: set_parameter on unknown index {index}", self.name);
            return false;
        };
        let value = value.clamp(0.0, 1.0);
        if !force && self.host.shadow.get(index) == Some(value) {
            return true;
        }
        // Queue before touching the shadow so a cycle running in between
        // already sees the edit in flight and keeps the plugin's echo out.
        let queued = self.host.edits.push(PendingEdit {
            index,
            value,
            sample_offset,
            to_list,
            origin: EditOrigin::Host,
        });
        if !queued {
            warn!("{}: edit queue full, dropped edit for parameter {index}", self.name);
        }
        self.host.shadow.swap(index, value);
        self.lock_controller().set_param_normalized(id, value);
        queued
    }

    pub fn try_set_parameter_by_id(&self, id: ParamId, value: f64) -> bool {
        self.host.try_set_parameter_by_id(id, value)
    }

    pub fn parameter_text(&self, index: usize, value: f64) -> Option<String> {
        let id = self.host.shadow.id_of(index)?;
        self.lock_controller().param_to_string(id, value)
    }

    pub fn bypass_parameter(&self) -> Option<usize> {
        self.host.shadow.find(|d| d.is_bypass)
    }

    pub fn program_change_parameter(&self) -> Option<usize> {
        self.host.shadow.find(|d| d.is_program_change)
    }

    /// Drains everything published since the last poll.
    pub fn poll_parameter_changes(&self) -> Vec<ParameterChange> {
        std::iter::from_fn(|| self.host.poll_parameter_change()).collect()
    }

    pub fn subscribe_automation(&self, index: usize) -> bool {
        self.host.automation.subscribe(index)
    }

    pub fn unsubscribe_automation(&self, index: usize) -> bool {
        self.host.automation.unsubscribe(index)
    }

    pub fn is_automation_subscribed(&self, index: usize) -> bool {
        self.host.automation.is_subscribed(index)
    }

    pub fn bind_automation_list(&self, index: usize, list: AutomationListId) -> bool {
        self.host.automation.bind_list(index, list)
    }

    pub fn automation_list(&self, index: usize) -> Option<AutomationListId> {
        self.host.automation.list_for(index)
    }

    // ---- buses ------------------------------------------------------------

    pub fn count_channels(
        &self,
        media: MediaType,
        direction: BusDirection,
        bus_type: Option<BusType>,
    ) -> u32 {
        self.lock_processor()
            .buses
            .count_channels(media, direction, bus_type)
    }

    pub fn n_audio_aux_in(&self) -> usize {
        self.lock_processor().buses.n_audio_aux_in()
    }

    pub fn n_audio_aux_out(&self) -> usize {
        self.lock_processor().buses.n_audio_aux_out()
    }

    pub fn audio_buses(&self, direction: BusDirection) -> Vec<AudioBusInfo> {
        self.lock_processor().buses.buses(direction).to_vec()
    }

    /// Selects active channels. An active instance is deactivated around the
    /// change and reactivated afterwards.
    pub fn enable_io(&self, in_mask: u64, out_mask: u64) -> bool {
        let mut guard = self.lock_processor();
        let slot = &mut *guard;
        let was_active = slot.active;
        if was_active && !self.deactivate_slot(slot) {
            return false;
        }
        let accepted = slot.buses.enable_io(slot.component.as_mut(), in_mask, out_mask);
        slot.buses.configure_buffers(BusDirection::Input, &mut slot.inputs);
        slot.buses.configure_buffers(BusDirection::Output, &mut slot.outputs);
        if was_active && !self.activate_slot(slot) {
            warn!("{}: failed to reactivate after I/O change", self.name);
        }
        if accepted {
            self.host.batcher.notify(RouteProcessorChange::CONFIGURATION);
        }
        accepted
    }

    pub fn midi_controller(&self, bus: u16, channel: u8, controller: u8) -> Option<ParamId> {
        self.lock_processor()
            .transcoder
            .midi_controller(bus, channel, controller)
    }

    pub fn set_live_midi_cc(&self, enabled: bool) {
        self.lock_processor().transcoder.set_live_midi_cc(enabled);
    }

    // ---- notifications and restarts ----------------------------------------

    pub fn block_notifications(&self) {
        self.host.batcher.block();
    }

    pub fn resume_notifications(&self) {
        self.host.batcher.resume();
    }

    /// Services deferred work on the control thread: controller sync for
    /// values the processor changed, restart requests and preset refreshes.
    pub fn idle(&self) {
        let stale = self.host.take_controller_stale();
        if !stale.is_empty() {
            let mut controller = self.lock_controller();
            for index in stale {
                if let (Some(id), Some(value)) = (self.host.shadow.id_of(index), self.host.shadow.get(index)) {
                    controller.set_param_normalized(id, value);
                }
            }
        }

        let flags = self.host.take_restart();
        if !flags.is_empty() {
            let mut controller = self.lock_controller();
            let mut slot = self.lock_processor();
            self.service_restart(flags, controller.as_mut(), &mut slot);
        }

        if self.host.take_presets_stale() {
            let names = self.lock_controller().program_names();
            recover(self.presets.lock()).set_factory(names);
        }
    }

    /// Services pending restarts now if neither lock is held; otherwise they
    /// wait for the next `idle`.
    pub(crate) fn try_service_restart(&self) {
        let Ok(mut controller) = self.controller.try_lock() else {
            return;
        };
        let Ok(mut slot) = self.processor.try_lock() else {
            return;
        };
        let flags = self.host.take_restart();
        if !flags.is_empty() {
            self.service_restart(flags, controller.as_mut(), &mut slot);
        }
    }

    fn service_restart(
        &self,
        flags: RestartFlags,
        controller: &mut dyn PluginController,
        slot: &mut ProcessorSlot,
    ) {
        let _batch = self.host.batcher.blocked();
        let reload = flags.contains(RestartFlags::RELOAD_COMPONENT);
        let io = reload || flags.contains(RestartFlags::IO_CHANGED);

        if io || flags.contains(RestartFlags::LATENCY_CHANGED) {
            let was_active = slot.active;
            if was_active && !self.deactivate_slot(slot) {
                warn!("{}: could not deactivate to service restart", self.name);
            }
            if io {
                slot.buses = BusMapper::negotiate(
                    slot.component.as_mut(),
                    self.options.compat.single_channel_main_bus,
                );
                slot.allocate_buffers();
                slot.transcoder
                    .rebuild_cc_map(controller, slot.buses.event_buses(BusDirection::Input).len());
            }
            if was_active {
                if !self.activate_slot(slot) {
                    warn!("{}: failed to reactivate after restart", self.name);
                }
            } else {
                self.refresh_latency(slot);
            }
        } else if flags.contains(RestartFlags::IO_TITLES_CHANGED) {
            slot.buses.refresh_names(slot.component.as_ref());
        }

        if reload || flags.contains(RestartFlags::PARAM_VALUES_CHANGED) {
            for index in self.host.shadow.resync(controller) {
                if let Some(value) = self.host.shadow.get(index) {
                    self.host.publish(ParameterChange::ValueChange {
                        index,
                        value,
                        recorded: false,
                    });
                }
            }
        }
        if flags.contains(RestartFlags::PARAM_TITLES_CHANGED) {
            self.host.shadow.refresh_titles(controller);
        }
        if !io && flags.contains(RestartFlags::MIDI_CC_ASSIGNMENT_CHANGED) {
            slot.transcoder
                .rebuild_cc_map(controller, slot.buses.event_buses(BusDirection::Input).len());
        }

        info!("{}: serviced restart {:#x}", self.name, flags.0);
        self.host.batcher.notify(RouteProcessorChange::from_restart(flags));
        self.host.post(HostNotification::RestartServiced(flags));
    }

    // ---- presets ------------------------------------------------------------

    pub fn factory_preset_count(&self) -> usize {
        recover(self.presets.lock()).factory_count()
    }

    pub fn factory_preset_names(&self) -> Vec<String> {
        recover(self.presets.lock()).factory_names().to_vec()
    }

    /// Drives the program-change parameter; never recorded on automation.
    pub fn select_factory_preset(&self, n: usize) -> bool {
        let Some(index) = self.program_change_parameter() else {
            debug!("{}: no program-change parameter", self.name);
            return false;
        };
        let step_count = self
            .host
            .shadow
            .descriptor(index)
            .map_or(0, |d| d.step_count);
        let Some(value) = recover(self.presets.lock()).program_value(n, step_count) else {
            return false;
        };
        self.set_parameter(index, value, 0, false, true)
    }

    pub fn user_presets(&self) -> BTreeMap<String, String> {
        recover(self.presets.lock()).user_presets().clone()
    }

    pub fn register_user_preset(&self, name: impl Into<String>, uri: impl Into<String>) {
        recover(self.presets.lock()).register_user(name, uri);
        self.host.post(HostNotification::PresetsChanged);
    }

    // ---- context info -------------------------------------------------------

    pub fn context_value(&self, key: &str) -> Option<ContextValue> {
        use crate::host::ContextInfo;
        self.host.context_value(key)
    }

    /// Host-side write; the controller is told which key changed.
    pub fn set_context_value(&self, key: &str, value: ContextValue) {
        self.host.store_context_value(key, value);
        self.lock_controller().context_info_changed(key);
    }

    // ---- editor view --------------------------------------------------------

    pub fn has_editor(&self) -> bool {
        let controller = self.lock_controller();
        recover(self.view.lock()).has_editor(controller.as_ref())
    }

    /// Native handle of the editor view, created on first call.
    pub fn view(&self) -> Option<*mut c_void> {
        let mut controller = self.lock_controller();
        recover(self.view.lock()).view(controller.as_mut())
    }

    pub fn view_size(&self) -> Option<(u32, u32)> {
        recover(self.view.lock()).size()
    }

    /// Confirms a container resize to the view.
    pub fn resize_view(&self, width: u32, height: u32) -> bool {
        recover(self.view.lock()).on_size(width, height)
    }

    pub fn close_view(&self) {
        recover(self.view.lock()).close_view();
    }

    // ---- state ----------------------------------------------------------------

    /// Writes component then controller state, each length-prefixed.
    pub fn save_state<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut component_state = Vec::new();
        if !self.lock_processor().component.get_state(&mut component_state) {
            return Err(BridgeError::StateUnavailable(StateSegment::Component));
        }
        let mut controller_state = Vec::new();
        if !self.lock_controller().get_state(&mut controller_state) {
            warn!("{}: controller state unavailable, saving component state only", self.name);
            controller_state.clear();
        }
        PluginStateBlob {
            plugin_id: self.plugin_id.clone(),
            component_state,
            controller_state,
        }
        .write_to(out)
    }

    /// Restores state written by `save_state`. On error the plugin may be
    /// half-restored; the instance should be discarded.
    pub fn load_state<R: Read>(&self, input: &mut R) -> Result<()> {
        let blob = PluginStateBlob::read_from(&self.plugin_id, input)?;
        // Edits the plugin reports while restoring land in the shadow
        // silently, so listeners are told by diffing against this.
        let before = self.host.shadow.snapshot();
        let _loading = LoadingGuard::enter(&self.host.loading);
        let _batch = self.host.batcher.blocked();

        let mut controller = self.lock_controller();
        {
            let mut slot = self.lock_processor();
            if !slot.component.set_state(&blob.component_state) {
                warn!("{}: component rejected state", self.name);
                return Err(BridgeError::StateRejected(StateSegment::Component));
            }
        }
        if !controller.set_component_state(&blob.component_state) {
            debug!("{}: controller ignored component state", self.name);
        }
        if !blob.controller_state.is_empty() && !controller.set_state(&blob.controller_state) {
            warn!("{}: controller rejected state", self.name);
            return Err(BridgeError::StateRejected(StateSegment::Controller));
        }

        self.host.shadow.resync(controller.as_ref());
        for (index, old) in before.into_iter().enumerate() {
            let Some(value) = self.host.shadow.get(index) else {
                continue;
            };
            if value != old {
                self.host.publish(ParameterChange::ValueChange {
                    index,
                    value,
                    recorded: false,
                });
            }
        }
        self.host.batcher.notify(RouteProcessorChange::PARAMETER_VALUES);
        debug!("{}: state restored", self.name);
        Ok(())
    }

    // ---- teardown -------------------------------------------------------------

    /// Deactivates, disconnects and closes the view. Safe to call repeatedly;
    /// the plugin objects are released when the instance is dropped.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.deactivate() {
            warn!("{}: deactivation failed during teardown", self.name);
        }
        self.disconnect_components();
        self.close_view();
        debug!("{}: torn down", self.name);
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("plugin_id", &self.plugin_id)
            .field("name", &self.name)
            .field("parameters", &self.host.shadow.len())
            .finish()
    }
}
