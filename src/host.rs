//! The hosting object a plugin talks back to.
//!
//! One `HostContext` serves every callback role the binary interface asks a
//! host to play. Each role is a separate capability trait whose methods only
//! dispatch into the shadow table, the edit queue and the notification batcher.

use crate::config::BridgeOptions;
use crate::edits::{EditOrigin, PendingEdit, PendingEdits};
use crate::instance::PluginInstance;
use crate::notify::{HostNotification, NotificationBatcher};
use crate::params::{AutomationState, ParamId, ParameterChange, ParameterShadow};
use crate::plugin::RestartFlags;
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, OnceLock, Weak};

/// Edit notifications from the plugin's controller.
pub trait ComponentHandler {
    fn begin_edit(&self, id: ParamId) -> bool;
    fn perform_edit(&self, id: ParamId, value: f64) -> bool;
    fn end_edit(&self, id: ParamId) -> bool;
    fn restart_component(&self, flags: RestartFlags) -> bool;
}

/// Resize requests from the plugin's editor view.
pub trait PlugFrame {
    fn resize_view(&self, width: u32, height: u32) -> bool;
}

/// Unit and program-list notifications.
pub trait UnitHandler {
    fn notify_unit_selection(&self) -> bool;
    fn notify_program_list_change(&self, list_id: i32, program_index: i32) -> bool;
}

/// Key/value side channel used for control-surface integration.
pub trait ContextInfo {
    fn context_value(&self, key: &str) -> Option<ContextValue>;
    fn set_context_value(&self, key: &str, value: ContextValue) -> bool;
    /// Brackets a run of writes to `key`, the way a gesture brackets edits.
    fn begin_context_edit(&self, key: &str) -> bool;
    fn end_context_edit(&self, key: &str) -> bool;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ContextValue {
    Int(i64),
    Float(f64),
    Str(String),
}

pub struct HostContext {
    pub(crate) shadow: ParameterShadow,
    pub(crate) automation: AutomationState,
    pub(crate) edits: PendingEdits,
    changes: ArrayQueue<ParameterChange>,
    open_gestures: Box<[AtomicBool]>,
    controller_stale: Box<[AtomicBool]>,
    pub(crate) loading: AtomicBool,
    pub(crate) in_process: AtomicBool,
    restart: AtomicU32,
    presets_stale: AtomicBool,
    pub(crate) batcher: NotificationBatcher,
    context_info: Mutex<HashMap<String, ContextValue>>,
    context_edits: Mutex<HashSet<String>>,
    dropped_changes: AtomicUsize,
    synchronous_restart: bool,
    instance: OnceLock<Weak<PluginInstance>>,
}

impl HostContext {
    pub fn new(shadow: ParameterShadow, options: &BridgeOptions, tx: Sender<HostNotification>) -> Self {
        let count = shadow.len();
        Self {
            automation: AutomationState::new(count),
            edits: PendingEdits::new(options.edit_queue_capacity, count),
            changes: ArrayQueue::new(options.parameter_change_capacity.max(1)),
            open_gestures: (0..count).map(|_| AtomicBool::new(false)).collect(),
            controller_stale: (0..count).map(|_| AtomicBool::new(false)).collect(),
            loading: AtomicBool::new(false),
            in_process: AtomicBool::new(false),
            restart: AtomicU32::new(0),
            presets_stale: AtomicBool::new(false),
            batcher: NotificationBatcher::new(tx),
            context_info: Mutex::new(HashMap::new()),
            context_edits: Mutex::new(HashSet::new()),
            dropped_changes: AtomicUsize::new(0),
            synchronous_restart: options.compat.synchronous_restart,
            instance: OnceLock::new(),
            shadow,
        }
    }

    pub(crate) fn attach(&self, instance: Weak<PluginInstance>) {
        if self.instance.set(instance).is_err() {
            tracing::warn!("Host context already attached to an instance");
        }
    }

    pub fn shadow(&self) -> &ParameterShadow {
        &self.shadow
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Queues a change for listeners. Never allocates; a full queue drops
    /// the change and counts it.
    pub(crate) fn publish(&self, change: ParameterChange) {
        if self.changes.push(change).is_err() {
            self.dropped_changes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn poll_parameter_change(&self) -> Option<ParameterChange> {
        self.changes.pop()
    }

    pub fn dropped_changes(&self) -> usize {
        self.dropped_changes.load(Ordering::Relaxed)
    }

    /// Applies a plugin-originated value to the shadow table and forwards it
    /// to the processor. Unknown ids are rejected. Safe from any thread.
    pub fn try_set_parameter_by_id(&self, id: ParamId, value: f64) -> bool {
        let Some(index) = self.shadow.index_of(id) else {
            tracing::debug!("Plugin reported an edit for unknown parameter id {id}");
            return false;
        };
        let value = value.clamp(0.0, 1.0);
        if self.is_loading() {
            self.shadow.swap(index, value);
            return true;
        }
        let queued = self.edits.push(PendingEdit {
            index,
            value,
            sample_offset: 0,
            to_list: true,
            origin: EditOrigin::Plugin,
        });
        if !queued {
            tracing::warn!("Edit queue full, plugin edit for parameter {index} not forwarded");
        }
        let previous = self.shadow.swap(index, value);
        if previous != Some(value) && !self.automation.is_subscribed(index) {
            self.publish(ParameterChange::ValueChange {
                index,
                value,
                recorded: true,
            });
        }
        true
    }

    pub(crate) fn mark_controller_stale(&self, index: usize) {
        if let Some(flag) = self.controller_stale.get(index) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Indices whose shadow value the controller has not seen yet.
    pub(crate) fn take_controller_stale(&self) -> Vec<usize> {
        self.controller_stale
            .iter()
            .enumerate()
            .filter(|(_, flag)| flag.swap(false, Ordering::AcqRel))
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn take_restart(&self) -> RestartFlags {
        RestartFlags(self.restart.swap(0, Ordering::AcqRel) as i32)
    }

    pub(crate) fn take_presets_stale(&self) -> bool {
        self.presets_stale.swap(false, Ordering::AcqRel)
    }

    pub fn pending_restart(&self) -> RestartFlags {
        RestartFlags(self.restart.load(Ordering::Acquire) as i32)
    }

    pub fn post(&self, notification: HostNotification) {
        self.batcher.post(notification);
    }

    pub fn batcher(&self) -> &NotificationBatcher {
        &self.batcher
    }

    pub(crate) fn store_context_value(&self, key: &str, value: ContextValue) {
        self.context_info
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value);
    }

    pub fn is_context_editing(&self, key: &str) -> bool {
        self.context_edits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(key)
    }

    fn gesture(&self, id: ParamId, open: bool) -> Option<usize> {
        let index = self.shadow.index_of(id)?;
        let was_open = self.open_gestures[index].swap(open, Ordering::AcqRel);
        (was_open != open).then_some(index)
    }
}

impl ComponentHandler for HostContext {
    fn begin_edit(&self, id: ParamId) -> bool {
        if self.shadow.index_of(id).is_none() {
            return false;
        }
        if let Some(index) = self.gesture(id, true)
            && !self.is_loading()
        {
            self.publish(ParameterChange::BeginGesture { index });
        }
        true
    }

    fn perform_edit(&self, id: ParamId, value: f64) -> bool {
        self.try_set_parameter_by_id(id, value)
    }

    fn end_edit(&self, id: ParamId) -> bool {
        if self.shadow.index_of(id).is_none() {
            return false;
        }
        if let Some(index) = self.gesture(id, false)
            && !self.is_loading()
        {
            self.publish(ParameterChange::EndGesture { index });
        }
        true
    }

    fn restart_component(&self, flags: RestartFlags) -> bool {
        if flags.is_empty() {
            return true;
        }
        self.restart.fetch_or(flags.0 as u32, Ordering::AcqRel);
        tracing::debug!("Plugin requested restart {:#x}", flags.0);
        if self.synchronous_restart
            && !self.in_process.load(Ordering::Acquire)
            && let Some(instance) = self.instance.get().and_then(Weak::upgrade)
        {
            instance.try_service_restart();
        }
        true
    }
}

impl PlugFrame for HostContext {
    fn resize_view(&self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        self.post(HostNotification::ViewResized { width, height });
        true
    }
}

impl UnitHandler for HostContext {
    fn notify_unit_selection(&self) -> bool {
        true
    }

    fn notify_program_list_change(&self, list_id: i32, program_index: i32) -> bool {
        tracing::debug!("Program list {list_id} changed at {program_index}");
        self.presets_stale.store(true, Ordering::Release);
        self.post(HostNotification::PresetsChanged);
        true
    }
}

impl ContextInfo for HostContext {
    fn context_value(&self, key: &str) -> Option<ContextValue> {
        self.context_info
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Plugin-side writes are stored without echoing back to the controller.
    fn set_context_value(&self, key: &str, value: ContextValue) -> bool {
        self.store_context_value(key, value);
        self.post(HostNotification::ContextChanged {
            key: key.to_string(),
        });
        true
    }

    fn begin_context_edit(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let opened = self
            .context_edits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string());
        if opened {
            self.post(HostNotification::ContextEdit {
                key: key.to_string(),
                editing: true,
            });
        }
        true
    }

    /// Returns false when no edit of `key` is open.
    fn end_context_edit(&self, key: &str) -> bool {
        let closed = self
            .context_edits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
        if closed {
            self.post(HostNotification::ContextEdit {
                key: key.to_string(),
                editing: false,
            });
        }
        closed
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("parameters", &self.shadow.len())
            .field("loading", &self.is_loading())
            .field("pending_restart", &self.pending_restart())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParameterInfo, flags};
    use crate::plugin::PluginController;
    use std::sync::Arc;
    use std::sync::mpsc::channel;

    struct Params;

    impl PluginController for Params {
        fn set_component_handler(&mut self, _host: Arc<HostContext>) {}
        fn parameter_count(&self) -> usize {
            2
        }
        fn parameter_info(&self, index: usize) -> Option<ParameterInfo> {
            (index < 2).then(|| ParameterInfo {
                id: 10 + index as u32,
                title: format!("P{index}"),
                short_title: String::new(),
                units: String::new(),
                step_count: 0,
                default_value: 0.0,
                flags: flags::CAN_AUTOMATE,
            })
        }
        fn param_normalized(&self, _id: ParamId) -> f64 {
            0.0
        }
        fn set_param_normalized(&mut self, _id: ParamId, _value: f64) -> bool {
            true
        }
        fn set_component_state(&mut self, _data: &[u8]) -> bool {
            true
        }
        fn get_state(&mut self, _out: &mut Vec<u8>) -> bool {
            true
        }
        fn set_state(&mut self, _data: &[u8]) -> bool {
            true
        }
    }

    fn host() -> (HostContext, std::sync::mpsc::Receiver<HostNotification>) {
        let (tx, rx) = channel();
        let shadow = ParameterShadow::from_controller(&Params);
        (HostContext::new(shadow, &BridgeOptions::default(), tx), rx)
    }

    fn drain(host: &HostContext) -> Vec<ParameterChange> {
        std::iter::from_fn(|| host.poll_parameter_change()).collect()
    }

    #[test]
    fn gesture_brackets_value_changes() {
        let (host, _rx) = host();
        assert!(host.begin_edit(11));
        assert!(host.perform_edit(11, 0.4));
        assert!(host.end_edit(11));
        assert_eq!(
            drain(&host),
            vec![
                ParameterChange::BeginGesture { index: 1 },
                ParameterChange::ValueChange {
                    index: 1,
                    value: 0.4,
                    recorded: true
                },
                ParameterChange::EndGesture { index: 1 },
            ]
        );
        assert_eq!(host.shadow.get(1), Some(0.4));
        assert!(host.edits.is_dirty(1));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let (host, _rx) = host();
        assert!(!host.try_set_parameter_by_id(99, 0.5));
        assert!(!host.begin_edit(99));
        assert!(drain(&host).is_empty());
    }

    #[test]
    fn isolated_perform_edit_is_a_value_change() {
        let (host, _rx) = host();
        assert!(host.perform_edit(10, 0.9));
        assert_eq!(
            drain(&host),
            vec![ParameterChange::ValueChange {
                index: 0,
                value: 0.9,
                recorded: true
            }]
        );
    }

    #[test]
    fn subscribed_parameters_do_not_echo() {
        let (host, _rx) = host();
        host.automation.subscribe(0);
        assert!(host.perform_edit(10, 0.3));
        assert!(drain(&host).is_empty());
        assert_eq!(host.shadow.get(0), Some(0.3));
    }

    #[test]
    fn loading_suppresses_publication_and_forwarding() {
        let (host, _rx) = host();
        host.loading.store(true, Ordering::Release);
        assert!(host.begin_edit(10));
        assert!(host.perform_edit(10, 0.6));
        assert!(drain(&host).is_empty());
        assert!(!host.edits.is_dirty(0));
        assert_eq!(host.shadow.get(0), Some(0.6));
    }

    #[test]
    fn restart_requests_accumulate() {
        let (host, _rx) = host();
        host.restart_component(RestartFlags::LATENCY_CHANGED);
        host.restart_component(RestartFlags::IO_CHANGED);
        assert_eq!(
            host.take_restart(),
            RestartFlags::LATENCY_CHANGED | RestartFlags::IO_CHANGED
        );
        assert!(host.pending_restart().is_empty());
    }

    #[test]
    fn resize_and_program_list_are_relayed() {
        let (host, rx) = host();
        assert!(host.resize_view(640, 480));
        assert!(!host.resize_view(0, 480));
        assert!(host.notify_program_list_change(0, -1));
        assert_eq!(
            rx.try_recv().unwrap(),
            HostNotification::ViewResized {
                width: 640,
                height: 480
            }
        );
        assert_eq!(rx.try_recv().unwrap(), HostNotification::PresetsChanged);
        assert!(host.take_presets_stale());
    }

    #[test]
    fn context_values_round_trip() {
        let (host, _rx) = host();
        assert!(host.set_context_value("channel.name", ContextValue::Str("Bass".into())));
        assert_eq!(
            host.context_value("channel.name"),
            Some(ContextValue::Str("Bass".into()))
        );
        assert_eq!(host.context_value("missing"), None);
    }

    #[test]
    fn context_edits_are_bracketed() {
        let (host, rx) = host();
        assert!(host.begin_context_edit("channel/volume"));
        assert!(host.begin_context_edit("channel/volume"));
        assert!(host.is_context_editing("channel/volume"));
        assert!(host.set_context_value("channel/volume", ContextValue::Float(0.5)));
        assert!(host.end_context_edit("channel/volume"));
        assert!(!host.end_context_edit("channel/volume"));
        assert!(!host.begin_context_edit(""));

        let notifications: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            notifications,
            vec![
                HostNotification::ContextEdit {
                    key: "channel/volume".into(),
                    editing: true,
                },
                HostNotification::ContextChanged {
                    key: "channel/volume".into(),
                },
                HostNotification::ContextEdit {
                    key: "channel/volume".into(),
                    editing: false,
                },
            ]
        );
    }
}
