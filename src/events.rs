//! Conversion between host MIDI and the plugin's native event list.

use crate::params::ParamId;
use crate::plugin::PluginController;
use midly::MidiMessage;
use midly::PitchBend;
use midly::live::LiveEvent;
use midly::num::{u4, u7, u14};
use std::collections::HashMap;
use std::io::Cursor;

pub const MIDI_CHANNELS: u8 = 16;

/// Pseudo controller numbers shared with the binary interface's
/// `ControllerNumbers`.
pub const CTRL_AFTER_TOUCH: u8 = 128;
pub const CTRL_PITCH_BEND: u8 = 129;
pub const CTRL_PROGRAM_CHANGE: u8 = 130;

/// One short host MIDI message at a frame offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub frame: u32,
    pub bus: u16,
    data: [u8; 3],
    len: u8,
}

impl MidiEvent {
    /// Keeps at most the first three bytes; longer messages are not carried.
    pub fn new(frame: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            frame,
            bus: 0,
            data,
            len: len as u8,
        }
    }

    pub fn on_bus(mut self, bus: u16) -> Self {
        self.bus = bus;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeEventKind {
    NoteOn {
        channel: u8,
        pitch: u8,
        velocity: f32,
        note_id: i32,
    },
    NoteOff {
        channel: u8,
        pitch: u8,
        velocity: f32,
        note_id: i32,
    },
    PolyPressure {
        channel: u8,
        pitch: u8,
        pressure: f32,
        note_id: i32,
    },
    /// Raw controller traffic. `controller` follows the pseudo numbering
    /// above for channel pressure, pitch bend and program change.
    LegacyMidiCc {
        channel: u8,
        controller: u8,
        value: u8,
        value2: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeEvent {
    pub bus: u16,
    pub sample_offset: i32,
    pub kind: NativeEventKind,
}

/// Fixed-capacity event list, kept sorted by sample offset. Events sharing
/// an offset keep their insertion order.
#[derive(Debug, Clone)]
pub struct EventList {
    events: Vec<NativeEvent>,
    overflowed: usize,
}

impl EventList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity.max(1)),
            overflowed: 0,
        }
    }

    pub fn push(&mut self, event: NativeEvent) -> bool {
        if self.events.len() == self.events.capacity() {
            self.overflowed += 1;
            return false;
        }
        let pos = self
            .events
            .partition_point(|e| e.sample_offset <= event.sample_offset);
        self.events.insert(pos, event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.overflowed = 0;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NativeEvent> {
        self.events.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeEvent> {
        self.events.iter()
    }

    /// Events rejected since the last `clear`.
    pub fn overflowed(&self) -> usize {
        self.overflowed
    }
}

/// Fixed-capacity host MIDI output buffer.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    overflowed: usize,
}

impl MidiBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity.max(1)),
            overflowed: 0,
        }
    }

    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() == self.events.capacity() {
            self.overflowed += 1;
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.overflowed = 0;
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn overflowed(&self) -> usize {
        self.overflowed
    }
}

/// A controller message the host wants applied as a parameter edit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedControl {
    pub id: ParamId,
    pub value: f64,
    pub frame: u32,
}

#[derive(Debug, Clone, Default)]
pub struct EventTranscoder {
    live_midi_cc: bool,
    cc_map: HashMap<(u16, u8, u8), ParamId>,
}

impl EventTranscoder {
    pub fn new(live_midi_cc: bool) -> Self {
        Self {
            live_midi_cc,
            cc_map: HashMap::new(),
        }
    }

    pub fn live_midi_cc(&self) -> bool {
        self.live_midi_cc
    }

    pub fn set_live_midi_cc(&mut self, enabled: bool) {
        self.live_midi_cc = enabled;
    }

    /// Asks the controller for every (bus, channel, controller) assignment.
    pub fn rebuild_cc_map(&mut self, controller: &dyn PluginController, event_buses: usize) {
        self.cc_map.clear();
        for bus in 0..event_buses.min(u16::MAX as usize) as u16 {
            for channel in 0..MIDI_CHANNELS {
                for cc in 0..=CTRL_PITCH_BEND {
                    if let Some(id) = controller.midi_controller_assignment(bus, channel, cc) {
                        self.cc_map.insert((bus, channel, cc), id);
                    }
                }
            }
        }
        tracing::debug!("MIDI CC map has {} assignments", self.cc_map.len());
    }

    /// Resolves which parameter, if any, a controller drives.
    pub fn midi_controller(&self, bus: u16, channel: u8, controller: u8) -> Option<ParamId> {
        self.cc_map.get(&(bus, channel, controller)).copied()
    }

    /// Converts host events into `list` in host order. In live CC mode a
    /// mapped controller is handed to `on_control` instead of being queued,
    /// so each controller reaches the plugin exactly once.
    ///
    /// Frames at or past `num_samples` are pinned to the last frame of the
    /// block.
    pub fn transcode_input(
        &self,
        events: &[MidiEvent],
        num_samples: usize,
        list: &mut EventList,
        mut on_control: impl FnMut(MappedControl),
    ) {
        let last_frame = u32::try_from(num_samples.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .min(i32::MAX as u32);
        for event in events {
            let frame = event.frame.min(last_frame);
            let Ok(LiveEvent::Midi { channel, message }) = LiveEvent::parse(event.bytes()) else {
                continue;
            };
            let channel = channel.as_int();
            let kind = match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => NativeEventKind::NoteOff {
                    channel,
                    pitch: key.as_int(),
                    velocity: 0.0,
                    note_id: -1,
                },
                MidiMessage::NoteOn { key, vel } => NativeEventKind::NoteOn {
                    channel,
                    pitch: key.as_int(),
                    velocity: f32::from(vel.as_int()) / 127.0,
                    note_id: -1,
                },
                MidiMessage::NoteOff { key, vel } => NativeEventKind::NoteOff {
                    channel,
                    pitch: key.as_int(),
                    velocity: f32::from(vel.as_int()) / 127.0,
                    note_id: -1,
                },
                MidiMessage::Aftertouch { key, vel } => NativeEventKind::PolyPressure {
                    channel,
                    pitch: key.as_int(),
                    pressure: f32::from(vel.as_int()) / 127.0,
                    note_id: -1,
                },
                MidiMessage::Controller { controller, value } => NativeEventKind::LegacyMidiCc {
                    channel,
                    controller: controller.as_int(),
                    value: value.as_int(),
                    value2: 0,
                },
                MidiMessage::ChannelAftertouch { vel } => NativeEventKind::LegacyMidiCc {
                    channel,
                    controller: CTRL_AFTER_TOUCH,
                    value: vel.as_int(),
                    value2: 0,
                },
                MidiMessage::PitchBend { bend } => {
                    let raw = bend.0.as_int();
                    NativeEventKind::LegacyMidiCc {
                        channel,
                        controller: CTRL_PITCH_BEND,
                        value: (raw & 0x7f) as u8,
                        value2: (raw >> 7) as u8,
                    }
                }
                MidiMessage::ProgramChange { program } => NativeEventKind::LegacyMidiCc {
                    channel,
                    controller: CTRL_PROGRAM_CHANGE,
                    value: program.as_int(),
                    value2: 0,
                },
            };

            if self.live_midi_cc
                && let NativeEventKind::LegacyMidiCc {
                    controller,
                    value,
                    value2,
                    ..
                } = kind
                && let Some(id) = self.midi_controller(event.bus, channel, controller)
            {
                on_control(MappedControl {
                    id,
                    value: controller_value(controller, value, value2),
                    frame,
                });
                continue;
            }

            list.push(NativeEvent {
                bus: event.bus,
                sample_offset: frame as i32,
                kind,
            });
        }
    }

    /// Converts plugin output events back into host MIDI.
    pub fn transcode_output(&self, list: &EventList, out: &mut MidiBuffer) {
        for event in list.iter() {
            let Some(live) = live_event(&event.kind) else {
                continue;
            };
            let mut bytes = [0u8; 3];
            let mut cursor = Cursor::new(&mut bytes[..]);
            if live.write_std(&mut cursor).is_err() {
                continue;
            }
            let len = cursor.position() as usize;
            out.push(
                MidiEvent::new(event.sample_offset.max(0) as u32, &bytes[..len]).on_bus(event.bus),
            );
        }
    }
}

fn controller_value(controller: u8, value: u8, value2: u8) -> f64 {
    match controller {
        CTRL_PITCH_BEND => {
            f64::from((u16::from(value2 & 0x7f) << 7) | u16::from(value & 0x7f)) / 16383.0
        }
        _ => f64::from(value & 0x7f) / 127.0,
    }
}

fn velocity_7bit(v: f32) -> u7 {
    u7::from_int_lossy((v.clamp(0.0, 1.0) * 127.0).round() as u8)
}

fn live_event(kind: &NativeEventKind) -> Option<LiveEvent<'static>> {
    let (channel, message) = match *kind {
        NativeEventKind::NoteOn {
            channel,
            pitch,
            velocity,
            ..
        } => (
            channel,
            MidiMessage::NoteOn {
                key: u7::from_int_lossy(pitch),
                vel: velocity_7bit(velocity),
            },
        ),
        NativeEventKind::NoteOff {
            channel,
            pitch,
            velocity,
            ..
        } => (
            channel,
            MidiMessage::NoteOff {
                key: u7::from_int_lossy(pitch),
                vel: velocity_7bit(velocity),
            },
        ),
        NativeEventKind::PolyPressure {
            channel,
            pitch,
            pressure,
            ..
        } => (
            channel,
            MidiMessage::Aftertouch {
                key: u7::from_int_lossy(pitch),
                vel: velocity_7bit(pressure),
            },
        ),
        NativeEventKind::LegacyMidiCc {
            channel,
            controller,
            value,
            value2,
        } => {
            let message = match controller {
                0..=127 => MidiMessage::Controller {
                    controller: u7::from_int_lossy(controller),
                    value: u7::from_int_lossy(value),
                },
                CTRL_AFTER_TOUCH => MidiMessage::ChannelAftertouch {
                    vel: u7::from_int_lossy(value),
                },
                CTRL_PITCH_BEND => MidiMessage::PitchBend {
                    bend: PitchBend(u14::from_int_lossy(
                        (u16::from(value2 & 0x7f) << 7) | u16::from(value & 0x7f),
                    )),
                },
                CTRL_PROGRAM_CHANGE => MidiMessage::ProgramChange {
                    program: u7::from_int_lossy(value),
                },
                _ => return None,
            };
            (channel, message)
        }
    };
    Some(LiveEvent::Midi {
        channel: u4::from_int_lossy(channel),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(offset: i32, pitch: u8) -> NativeEvent {
        NativeEvent {
            bus: 0,
            sample_offset: offset,
            kind: NativeEventKind::NoteOn {
                channel: 0,
                pitch,
                velocity: 1.0,
                note_id: -1,
            },
        }
    }

    #[test]
    fn same_offset_events_keep_submission_order() {
        let mut list = EventList::with_capacity(8);
        list.push(note(20, 1));
        list.push(note(10, 2));
        list.push(note(10, 3));
        let pitches: Vec<u8> = list
            .iter()
            .map(|e| match e.kind {
                NativeEventKind::NoteOn { pitch, .. } => pitch,
                _ => 0,
            })
            .collect();
        assert_eq!(pitches, vec![2, 3, 1]);
    }

    #[test]
    fn full_list_counts_overflow() {
        let mut list = EventList::with_capacity(1);
        assert!(list.push(note(0, 1)));
        assert!(!list.push(note(0, 2)));
        assert_eq!(list.overflowed(), 1);
        list.clear();
        assert_eq!(list.overflowed(), 0);
    }

    #[test]
    fn note_on_then_cc_at_same_frame_stay_ordered() {
        let transcoder = EventTranscoder::new(false);
        let mut list = EventList::with_capacity(8);
        let events = [
            MidiEvent::new(10, &[0x91, 60, 100]),
            MidiEvent::new(10, &[0xB1, 7, 64]),
        ];
        transcoder.transcode_input(&events, 64, &mut list, |_| panic!("not live"));
        assert_eq!(list.len(), 2);
        assert!(matches!(
            list.get(0).unwrap().kind,
            NativeEventKind::NoteOn { channel: 1, pitch: 60, .. }
        ));
        assert!(matches!(
            list.get(1).unwrap().kind,
            NativeEventKind::LegacyMidiCc { channel: 1, controller: 7, value: 64, .. }
        ));
    }

    #[test]
    fn live_cc_goes_to_parameter_not_event_list() {
        let mut transcoder = EventTranscoder::new(true);
        transcoder.cc_map.insert((0, 0, 1), 55);
        let mut list = EventList::with_capacity(8);
        let mut mapped = Vec::new();
        let events = [MidiEvent::new(3, &[0xB0, 1, 127]), MidiEvent::new(4, &[0xB0, 2, 1])];
        transcoder.transcode_input(&events, 64, &mut list, |c| mapped.push(c));
        assert_eq!(
            mapped,
            vec![MappedControl {
                id: 55,
                value: 1.0,
                frame: 3
            }]
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn late_frames_are_pinned_inside_the_block() {
        let mut transcoder = EventTranscoder::new(true);
        transcoder.cc_map.insert((0, 0, 1), 55);
        let mut list = EventList::with_capacity(4);
        let mut mapped = Vec::new();
        let events = [
            MidiEvent::new(1000, &[0x90, 60, 100]),
            MidiEvent::new(u32::MAX, &[0x80, 60, 0]),
            MidiEvent::new(70, &[0xB0, 1, 127]),
        ];
        transcoder.transcode_input(&events, 64, &mut list, |c| mapped.push(c));
        let offsets: Vec<i32> = list.iter().map(|e| e.sample_offset).collect();
        assert_eq!(offsets, vec![63, 63]);
        assert_eq!(mapped[0].frame, 63);
    }

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        let transcoder = EventTranscoder::new(false);
        let mut list = EventList::with_capacity(2);
        transcoder.transcode_input(&[MidiEvent::new(0, &[0x90, 64, 0])], 64, &mut list, |_| {});
        assert!(matches!(list.get(0).unwrap().kind, NativeEventKind::NoteOff { pitch: 64, .. }));
    }

    #[test]
    fn output_events_become_host_midi() {
        let transcoder = EventTranscoder::new(false);
        let mut list = EventList::with_capacity(4);
        list.push(note(5, 62));
        list.push(NativeEvent {
            bus: 0,
            sample_offset: 6,
            kind: NativeEventKind::LegacyMidiCc {
                channel: 2,
                controller: CTRL_PITCH_BEND,
                value: 0,
                value2: 0x40,
            },
        });
        let mut out = MidiBuffer::with_capacity(4);
        transcoder.transcode_output(&list, &mut out);
        assert_eq!(out.events()[0].bytes(), &[0x90, 62, 127]);
        assert_eq!(out.events()[0].frame, 5);
        assert_eq!(out.events()[1].bytes(), &[0xE2, 0x00, 0x40]);
    }
}
