pub mod bus;
pub mod config;
pub mod edits;
pub mod error;
pub mod events;
pub mod host;
pub mod instance;
pub mod notify;
pub mod params;
pub mod plugin;
pub mod presets;
pub mod state;
pub mod transport;
pub mod view;
pub mod vst3;

pub use bus::{AudioBusBuffer, AudioBusInfo, BusMapper};
pub use config::{BridgeOptions, CompatibilityFlags};
pub use error::{BridgeError, LoadStage, Result, StateSegment};
pub use events::{EventList, EventTranscoder, MidiBuffer, MidiEvent, NativeEvent, NativeEventKind};
pub use host::{ComponentHandler, ContextInfo, ContextValue, HostContext, PlugFrame, UnitHandler};
pub use instance::PluginInstance;
pub use notify::{HostNotification, NotificationBatcher, RouteProcessorChange};
pub use params::{AutomationListId, ParamId, ParameterChange, ParameterDescriptor, ParameterInfo};
pub use plugin::{
    BusDescriptor, BusDirection, BusType, ComponentLink, MediaType, PluginComponent,
    PluginController, PluginParts, PluginView, ProcessData, ProcessMode, ProcessSetup, RestartFlags,
};
pub use state::PluginStateBlob;
pub use transport::{ProcessContext, TransportInfo};
