//! Process-time COM objects.
//!
//! Each view borrows a bridge-owned list for the duration of one `process`
//! call and never owns or allocates anything itself. All views are created
//! up front, sized from the controller's parameter count.

use crate::edits::ParameterChanges;
use crate::events::{EventList, NativeEvent, NativeEventKind};
use crate::transport::ProcessContext;
use std::cell::Cell;
use vst3::Steinberg::Vst::Event_::EventTypes_::{
    kLegacyMIDICCOutEvent, kNoteOffEvent, kNoteOnEvent, kPolyPressureEvent,
};
use vst3::Steinberg::Vst::{
    Event, Event__type0, IEventList, IEventListTrait, IParamValueQueue, IParamValueQueueTrait,
    IParameterChanges, IParameterChangesTrait, LegacyMIDICCOutEvent, NoteOffEvent, NoteOnEvent,
    ParamID, ParamValue, PolyPressureEvent, ProcessContext as Vst3ProcessContext,
};
use vst3::Steinberg::{int32, kInvalidArgument, kResultFalse, kResultOk, tresult};
use vst3::{Class, ComWrapper};

pub(crate) struct ValueQueueView {
    changes: Cell<*mut ParameterChanges>,
    index: Cell<usize>,
    writable: Cell<bool>,
}

impl Class for ValueQueueView {
    type Interfaces = (IParamValueQueue,);
}

impl ValueQueueView {
    fn new() -> Self {
        Self {
            changes: Cell::new(std::ptr::null_mut()),
            index: Cell::new(0),
            writable: Cell::new(false),
        }
    }

    fn changes(&self) -> Option<&ParameterChanges> {
        // SAFETY: the pointer is only non-null while the owning list is bound
        // to a live `ParameterChanges` for the current process call.
        unsafe { self.changes.get().as_ref() }
    }
}

impl IParamValueQueueTrait for ValueQueueView {
    unsafe fn getParameterId(&self) -> ParamID {
        self.changes()
            .and_then(|c| c.queue(self.index.get()))
            .map_or(0, |q| q.id())
    }

    unsafe fn getPointCount(&self) -> int32 {
        self.changes()
            .and_then(|c| c.queue(self.index.get()))
            .map_or(0, |q| q.point_count() as int32)
    }

    unsafe fn getPoint(
        &self,
        index: int32,
        sample_offset: *mut int32,
        value: *mut ParamValue,
    ) -> tresult {
        if index < 0 || sample_offset.is_null() || value.is_null() {
            return kInvalidArgument;
        }
        let Some((offset, v)) = self
            .changes()
            .and_then(|c| c.queue(self.index.get()))
            .and_then(|q| q.point(index as usize))
        else {
            return kResultFalse;
        };
        // SAFETY: out pointers checked above.
        unsafe {
            *sample_offset = offset;
            *value = v;
        }
        kResultOk
    }

    unsafe fn addPoint(&self, sample_offset: int32, value: ParamValue, index: *mut int32) -> tresult {
        if !self.writable.get() {
            return kResultFalse;
        }
        // SAFETY: writable views are bound to the cycle's output list, which
        // nothing else touches while the plugin runs.
        let Some(changes) = (unsafe { self.changes.get().as_mut() }) else {
            return kResultFalse;
        };
        let queue = self.index.get();
        if !changes.add_point_to(queue, sample_offset, value) {
            return kResultFalse;
        }
        if !index.is_null() {
            let position = changes.queue(queue).and_then(|q| {
                (0..q.point_count()).find(|&i| q.point(i).is_some_and(|(o, _)| o == sample_offset))
            });
            // SAFETY: caller-provided out pointer.
            unsafe { *index = position.map_or(0, |p| p as int32) };
        }
        kResultOk
    }
}

/// `IParameterChanges` over a bridge `ParameterChanges`.
pub(crate) struct ParameterChangesView {
    changes: Cell<*mut ParameterChanges>,
    writable: Cell<bool>,
    queues: Vec<ComWrapper<ValueQueueView>>,
}

impl Class for ParameterChangesView {
    type Interfaces = (IParameterChanges,);
}

impl ParameterChangesView {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            changes: Cell::new(std::ptr::null_mut()),
            writable: Cell::new(false),
            queues: (0..capacity.max(1))
                .map(|_| ComWrapper::new(ValueQueueView::new()))
                .collect(),
        }
    }

    pub(crate) fn bind_input(&self, changes: &ParameterChanges) {
        self.changes.set(changes as *const ParameterChanges as *mut ParameterChanges);
        self.writable.set(false);
    }

    pub(crate) fn bind_output(&self, changes: &mut ParameterChanges) {
        self.changes.set(changes as *mut ParameterChanges);
        self.writable.set(true);
    }

    pub(crate) fn unbind(&self) {
        self.changes.set(std::ptr::null_mut());
        self.writable.set(false);
        for queue in &self.queues {
            queue.changes.set(std::ptr::null_mut());
        }
    }

    fn view(&self, index: usize) -> *mut IParamValueQueue {
        let Some(queue) = self.queues.get(index) else {
            return std::ptr::null_mut();
        };
        queue.changes.set(self.changes.get());
        queue.index.set(index);
        queue.writable.set(self.writable.get());
        queue
            .as_com_ref::<IParamValueQueue>()
            .map_or(std::ptr::null_mut(), |r| r.as_ptr())
    }
}

impl IParameterChangesTrait for ParameterChangesView {
    unsafe fn getParameterCount(&self) -> int32 {
        // SAFETY: see `ValueQueueView::changes`.
        let used = unsafe { self.changes.get().as_ref() }.map_or(0, |c| c.queue_count());
        used.min(self.queues.len()) as int32
    }

    unsafe fn getParameterData(&self, index: int32) -> *mut IParamValueQueue {
        // SAFETY: see `ValueQueueView::changes`.
        let used = unsafe { self.changes.get().as_ref() }.map_or(0, |c| c.queue_count());
        if index < 0 || index as usize >= used {
            return std::ptr::null_mut();
        }
        self.view(index as usize)
    }

    unsafe fn addParameterData(&self, id: *const ParamID, index: *mut int32) -> *mut IParamValueQueue {
        if id.is_null() || !self.writable.get() {
            return std::ptr::null_mut();
        }
        // SAFETY: writable means bound to the exclusive output list.
        let Some(changes) = (unsafe { self.changes.get().as_mut() }) else {
            return std::ptr::null_mut();
        };
        // SAFETY: checked non-null above.
        let Some(slot) = changes.claim(unsafe { *id }) else {
            return std::ptr::null_mut();
        };
        if !index.is_null() {
            // SAFETY: caller-provided out pointer.
            unsafe { *index = slot as int32 };
        }
        self.view(slot)
    }
}

/// `IEventList` over a bridge `EventList`.
pub(crate) struct EventListView {
    list: Cell<*mut EventList>,
    writable: Cell<bool>,
}

impl Class for EventListView {
    type Interfaces = (IEventList,);
}

impl EventListView {
    pub(crate) fn new() -> Self {
        Self {
            list: Cell::new(std::ptr::null_mut()),
            writable: Cell::new(false),
        }
    }

    pub(crate) fn bind_input(&self, list: &EventList) {
        self.list.set(list as *const EventList as *mut EventList);
        self.writable.set(false);
    }

    pub(crate) fn bind_output(&self, list: &mut EventList) {
        self.list.set(list as *mut EventList);
        self.writable.set(true);
    }

    pub(crate) fn unbind(&self) {
        self.list.set(std::ptr::null_mut());
        self.writable.set(false);
    }
}

impl IEventListTrait for EventListView {
    unsafe fn getEventCount(&self) -> int32 {
        // SAFETY: non-null only while bound for the current process call.
        unsafe { self.list.get().as_ref() }.map_or(0, |l| l.len() as int32)
    }

    unsafe fn getEvent(&self, index: int32, e: *mut Event) -> tresult {
        if index < 0 || e.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: non-null only while bound for the current process call.
        let Some(event) = unsafe { self.list.get().as_ref() }.and_then(|l| l.get(index as usize))
        else {
            return kResultFalse;
        };
        // SAFETY: out pointer checked above.
        unsafe { *e = to_vst3_event(event) };
        kResultOk
    }

    unsafe fn addEvent(&self, e: *mut Event) -> tresult {
        if e.is_null() || !self.writable.get() {
            return kResultFalse;
        }
        // SAFETY: writable means bound to the exclusive output list.
        let Some(list) = (unsafe { self.list.get().as_mut() }) else {
            return kResultFalse;
        };
        // SAFETY: checked non-null above; the plugin owns the event for the call.
        match from_vst3_event(unsafe { &*e }) {
            Some(event) if list.push(event) => kResultOk,
            _ => kResultFalse,
        }
    }
}

pub(crate) fn to_vst3_event(event: &NativeEvent) -> Event {
    let (kind, body) = match event.kind {
        NativeEventKind::NoteOn {
            channel,
            pitch,
            velocity,
            note_id,
        } => (
            kNoteOnEvent,
            Event__type0 {
                noteOn: NoteOnEvent {
                    channel: channel as i16,
                    pitch: pitch as i16,
                    tuning: 0.0,
                    velocity,
                    length: 0,
                    noteId: note_id,
                },
            },
        ),
        NativeEventKind::NoteOff {
            channel,
            pitch,
            velocity,
            note_id,
        } => (
            kNoteOffEvent,
            Event__type0 {
                noteOff: NoteOffEvent {
                    channel: channel as i16,
                    pitch: pitch as i16,
                    velocity,
                    noteId: note_id,
                    tuning: 0.0,
                },
            },
        ),
        NativeEventKind::PolyPressure {
            channel,
            pitch,
            pressure,
            note_id,
        } => (
            kPolyPressureEvent,
            Event__type0 {
                polyPressure: PolyPressureEvent {
                    channel: channel as i16,
                    pitch: pitch as i16,
                    pressure,
                    noteId: note_id,
                },
            },
        ),
        NativeEventKind::LegacyMidiCc {
            channel,
            controller,
            value,
            value2,
        } => (
            kLegacyMIDICCOutEvent,
            Event__type0 {
                midiCCOut: LegacyMIDICCOutEvent {
                    controlNumber: controller,
                    channel: channel as i8,
                    value: value as i8,
                    value2: value2 as i8,
                },
            },
        ),
    };
    Event {
        busIndex: i32::from(event.bus),
        sampleOffset: event.sample_offset,
        ppqPosition: 0.0,
        flags: 0,
        r#type: kind as u16,
        __field0: body,
    }
}

/// Event types the bridge does not carry yield `None`.
pub(crate) fn from_vst3_event(event: &Event) -> Option<NativeEvent> {
    let bus = u16::try_from(event.busIndex).ok()?;
    let kind = u32::from(event.r#type);
    // SAFETY: each arm reads the union member selected by the type tag.
    let kind = unsafe {
        if kind == kNoteOnEvent as u32 {
            let e = &event.__field0.noteOn;
            NativeEventKind::NoteOn {
                channel: e.channel as u8,
                pitch: e.pitch as u8,
                velocity: e.velocity,
                note_id: e.noteId,
            }
        } else if kind == kNoteOffEvent as u32 {
            let e = &event.__field0.noteOff;
            NativeEventKind::NoteOff {
                channel: e.channel as u8,
                pitch: e.pitch as u8,
                velocity: e.velocity,
                note_id: e.noteId,
            }
        } else if kind == kPolyPressureEvent as u32 {
            let e = &event.__field0.polyPressure;
            NativeEventKind::PolyPressure {
                channel: e.channel as u8,
                pitch: e.pitch as u8,
                pressure: e.pressure,
                note_id: e.noteId,
            }
        } else if kind == kLegacyMIDICCOutEvent as u32 {
            let e = &event.__field0.midiCCOut;
            NativeEventKind::LegacyMidiCc {
                channel: e.channel as u8,
                controller: e.controlNumber,
                value: e.value as u8,
                value2: e.value2 as u8,
            }
        } else {
            return None;
        }
    };
    Some(NativeEvent {
        bus,
        sample_offset: event.sampleOffset,
        kind,
    })
}

pub(crate) fn fill_context(dst: &mut Vst3ProcessContext, src: &ProcessContext) {
    dst.state = src.state;
    dst.sampleRate = src.sample_rate;
    dst.projectTimeSamples = src.project_time_samples;
    dst.continousTimeSamples = src.continuous_time_samples;
    dst.projectTimeMusic = src.project_time_music;
    dst.barPositionMusic = src.bar_position_music;
    dst.cycleStartMusic = src.cycle_start_music;
    dst.cycleEndMusic = src.cycle_end_music;
    dst.tempo = src.tempo;
    dst.timeSigNumerator = src.time_sig_numerator;
    dst.timeSigDenominator = src.time_sig_denominator;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(offset: i32) -> NativeEvent {
        NativeEvent {
            bus: 1,
            sample_offset: offset,
            kind: NativeEventKind::NoteOn {
                channel: 3,
                pitch: 60,
                velocity: 0.5,
                note_id: -1,
            },
        }
    }

    #[test]
    fn events_convert_both_ways() {
        let cc = NativeEvent {
            bus: 0,
            sample_offset: 12,
            kind: NativeEventKind::LegacyMidiCc {
                channel: 2,
                controller: 129,
                value: 0x10,
                value2: 0x40,
            },
        };
        for event in [note_on(7), cc] {
            let raw = to_vst3_event(&event);
            assert_eq!(from_vst3_event(&raw), Some(event));
        }
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let mut raw = to_vst3_event(&note_on(0));
        raw.r#type = 2;
        assert_eq!(from_vst3_event(&raw), None);
    }

    #[test]
    fn input_list_is_read_only() {
        let mut list = EventList::with_capacity(4);
        list.push(note_on(5));
        let view = EventListView::new();
        view.bind_input(&list);
        unsafe {
            assert_eq!(view.getEventCount(), 1);
            let mut raw = to_vst3_event(&note_on(0));
            assert_eq!(view.getEvent(0, &mut raw), kResultOk);
            assert_eq!(raw.sampleOffset, 5);
            assert_eq!(view.addEvent(&mut raw), kResultFalse);
            assert_eq!(view.getEvent(1, &mut raw), kResultFalse);
        }
        view.unbind();
        assert_eq!(unsafe { view.getEventCount() }, 0);
    }

    #[test]
    fn output_list_collects_plugin_events() {
        let mut list = EventList::with_capacity(4);
        let view = EventListView::new();
        view.bind_output(&mut list);
        let mut raw = to_vst3_event(&note_on(9));
        assert_eq!(unsafe { view.addEvent(&mut raw) }, kResultOk);
        view.unbind();
        assert_eq!(list.get(0), Some(&note_on(9)));
    }

    #[test]
    fn output_changes_record_points_by_queue() {
        let mut changes = ParameterChanges::with_capacity(2, 4);
        let view = ParameterChangesView::new(2);
        view.bind_output(&mut changes);
        unsafe {
            let id: ParamID = 42;
            let mut index = -1;
            let queue = view.addParameterData(&id, &mut index);
            assert!(!queue.is_null());
            assert_eq!(index, 0);
            let vtbl = &*(*queue).vtbl;
            let mut point = -1;
            assert_eq!((vtbl.addPoint)(queue, 16, 0.25, &mut point), kResultOk);
            assert_eq!(point, 0);
            assert_eq!((vtbl.getParameterId)(queue), 42);
            assert_eq!(view.getParameterCount(), 1);
        }
        view.unbind();
        assert_eq!(changes.queue(0).unwrap().point(0), Some((16, 0.25)));
    }

    #[test]
    fn input_changes_expose_points() {
        let mut changes = ParameterChanges::with_capacity(2, 4);
        changes.add_point(5, 0, 0.1);
        changes.add_point(5, 32, 0.9);
        let view = ParameterChangesView::new(2);
        view.bind_input(&changes);
        unsafe {
            assert_eq!(view.getParameterCount(), 1);
            let queue = view.getParameterData(0);
            assert!(!queue.is_null());
            let vtbl = &*(*queue).vtbl;
            assert_eq!((vtbl.getPointCount)(queue), 2);
            let (mut offset, mut value) = (0, 0.0);
            assert_eq!((vtbl.getPoint)(queue, 1, &mut offset, &mut value), kResultOk);
            assert_eq!((offset, value), (32, 0.9));
            assert_eq!(
                (vtbl.addPoint)(queue, 0, 0.3, std::ptr::null_mut()),
                kResultFalse
            );
            assert!(view.getParameterData(1).is_null());
        }
    }
}
