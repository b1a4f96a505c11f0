//! Capability traits describing the plugin side of the binary contract.
//!
//! The bridge only talks to a plugin through these traits. `crate::vst3`
//! implements them over the VST3 COM interfaces; tests implement them with an
//! in-process mock.

use crate::bus::AudioBusBuffer;
use crate::edits::ParameterChanges;
use crate::events::EventList;
use crate::host::HostContext;
use crate::params::{ParamId, ParameterInfo};
use crate::transport::ProcessContext;
use std::ffi::c_void;
use std::ops::BitOr;
use std::sync::Arc;

pub type SpeakerArrangement = u64;

pub mod speaker {
    use super::SpeakerArrangement;

    pub const EMPTY: SpeakerArrangement = 0;
    pub const MONO: SpeakerArrangement = 1 << 19;
    pub const STEREO: SpeakerArrangement = 0b11;

    pub fn for_channels(channels: u32) -> SpeakerArrangement {
        match channels {
            0 => EMPTY,
            1 => MONO,
            2 => STEREO,
            n if n >= 64 => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }

    pub fn channel_count(arrangement: SpeakerArrangement) -> u32 {
        arrangement.count_ones()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusType {
    Main,
    Aux,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusDescriptor {
    pub name: String,
    pub bus_type: BusType,
    pub channel_count: u32,
    pub default_active: bool,
}

/// Whether the plugin runs against a real-time deadline or is rendering
/// offline, where it may take as long as it needs per block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessMode {
    #[default]
    Realtime,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSetup {
    pub sample_rate: f64,
    pub max_block_size: usize,
    pub mode: ProcessMode,
}

/// Everything the plugin sees during one process cycle.
pub struct ProcessData<'a> {
    pub num_samples: usize,
    pub inputs: &'a [AudioBusBuffer],
    pub outputs: &'a mut [AudioBusBuffer],
    pub input_parameter_changes: &'a ParameterChanges,
    pub output_parameter_changes: &'a mut ParameterChanges,
    pub input_events: &'a EventList,
    pub output_events: &'a mut EventList,
    pub context: &'a ProcessContext,
}

/// Bit values follow the VST3 `RestartFlags` enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartFlags(pub i32);

impl RestartFlags {
    pub const RELOAD_COMPONENT: Self = Self(1);
    pub const IO_CHANGED: Self = Self(1 << 1);
    pub const PARAM_VALUES_CHANGED: Self = Self(1 << 2);
    pub const LATENCY_CHANGED: Self = Self(1 << 3);
    pub const PARAM_TITLES_CHANGED: Self = Self(1 << 4);
    pub const MIDI_CC_ASSIGNMENT_CHANGED: Self = Self(1 << 5);
    pub const IO_TITLES_CHANGED: Self = Self(1 << 7);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RestartFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The audio-processing half of a plugin.
pub trait PluginComponent: Send {
    fn bus_count(&self, media: MediaType, direction: BusDirection) -> usize;

    fn bus_info(&self, media: MediaType, direction: BusDirection, index: usize)
    -> Option<BusDescriptor>;

    fn activate_bus(
        &mut self,
        media: MediaType,
        direction: BusDirection,
        index: usize,
        active: bool,
    ) -> bool;

    /// Returns false when the plugin does not accept this exact layout.
    fn set_bus_arrangements(
        &mut self,
        inputs: &[SpeakerArrangement],
        outputs: &[SpeakerArrangement],
    ) -> bool;

    fn setup_processing(&mut self, setup: &ProcessSetup) -> bool;

    fn set_active(&mut self, active: bool) -> bool;

    fn set_processing(&mut self, processing: bool) -> bool;

    /// Must not allocate. A false return means the cycle produced nothing usable.
    fn process(&mut self, data: &mut ProcessData<'_>) -> bool;

    fn latency_samples(&self) -> u32 {
        0
    }

    fn tail_samples(&self) -> u32 {
        0
    }

    fn get_state(&mut self, out: &mut Vec<u8>) -> bool;

    fn set_state(&mut self, data: &[u8]) -> bool;
}

/// The parameter / UI-model half of a plugin.
pub trait PluginController: Send {
    /// Hands the controller the host object it reports edits, restarts,
    /// resizes and unit changes to.
    fn set_component_handler(&mut self, host: Arc<HostContext>);

    fn parameter_count(&self) -> usize;

    fn parameter_info(&self, index: usize) -> Option<ParameterInfo>;

    fn param_normalized(&self, id: ParamId) -> f64;

    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> bool;

    fn param_to_string(&self, _id: ParamId, _value: f64) -> Option<String> {
        None
    }

    fn set_component_state(&mut self, data: &[u8]) -> bool;

    fn get_state(&mut self, out: &mut Vec<u8>) -> bool;

    fn set_state(&mut self, data: &[u8]) -> bool;

    fn midi_controller_assignment(
        &self,
        _bus: u16,
        _channel: u8,
        _controller: u8,
    ) -> Option<ParamId> {
        None
    }

    fn program_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn has_editor(&self) -> bool {
        false
    }

    fn create_view(&mut self) -> Option<Box<dyn PluginView>> {
        None
    }

    fn context_info_changed(&mut self, _key: &str) {}
}

/// A plugin-owned native editor view.
pub trait PluginView: Send {
    fn size(&self) -> Option<(u32, u32)>;

    fn on_size(&mut self, width: u32, height: u32) -> bool;

    /// Platform handle for the widget collaborator that embeds the view.
    fn native_handle(&self) -> *mut c_void;

    fn removed(&mut self);
}

/// Wires a separate component and controller together.
pub trait ComponentLink: Send {
    fn connect(&mut self) -> bool;

    fn disconnect(&mut self);
}

pub struct PluginParts {
    pub plugin_id: String,
    pub name: String,
    pub component: Box<dyn PluginComponent>,
    pub controller: Box<dyn PluginController>,
    pub link: Option<Box<dyn ComponentLink>>,
}

impl std::fmt::Debug for PluginParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginParts")
            .field("plugin_id", &self.plugin_id)
            .field("name", &self.name)
            .field("link", &self.link.is_some())
            .finish()
    }
}
