use crate::plugin::PluginController;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

pub type ParamId = u32;

/// `ParameterFlags` bit values of the binary interface.
pub mod flags {
    pub const CAN_AUTOMATE: i32 = 1;
    pub const IS_READ_ONLY: i32 = 1 << 1;
    pub const IS_WRAP_AROUND: i32 = 1 << 2;
    pub const IS_LIST: i32 = 1 << 3;
    pub const IS_HIDDEN: i32 = 1 << 4;
    pub const IS_PROGRAM_CHANGE: i32 = 1 << 15;
    pub const IS_BYPASS: i32 = 1 << 16;
}

/// Raw parameter introspection as reported by the controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub id: ParamId,
    pub title: String,
    pub short_title: String,
    pub units: String,
    pub step_count: i32, // 0 = continuous, >0 = discrete
    pub default_value: f64,
    pub flags: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub id: ParamId,
    pub index: usize,
    pub label: String,
    pub short_label: String,
    pub unit: String,
    pub step_count: i32,
    pub default_value: f64,
    pub normal_value: f64,
    pub is_enum: bool,
    pub read_only: bool,
    pub automatable: bool,
    pub is_bypass: bool,
    pub is_program_change: bool,
    pub is_hidden: bool,
}

impl ParameterDescriptor {
    fn from_info(index: usize, info: ParameterInfo) -> Self {
        let has = |bit: i32| info.flags & bit != 0;
        Self {
            id: info.id,
            index,
            is_enum: has(flags::IS_LIST) || info.step_count > 0,
            read_only: has(flags::IS_READ_ONLY),
            automatable: has(flags::CAN_AUTOMATE) && !has(flags::IS_READ_ONLY),
            is_bypass: has(flags::IS_BYPASS),
            is_program_change: has(flags::IS_PROGRAM_CHANGE),
            is_hidden: has(flags::IS_HIDDEN),
            label: info.title,
            short_label: info.short_title,
            unit: info.units,
            step_count: info.step_count,
            default_value: info.default_value.clamp(0.0, 1.0),
            normal_value: info.default_value.clamp(0.0, 1.0),
        }
    }
}

/// What the plugin or host did to a parameter, as published to listeners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterChange {
    BeginGesture { index: usize },
    /// `recorded` is false for housekeeping writes that must stay off
    /// automation lists (preset selection, state restore).
    ValueChange { index: usize, value: f64, recorded: bool },
    EndGesture { index: usize },
}

impl ParameterChange {
    pub fn index(&self) -> usize {
        match *self {
            ParameterChange::BeginGesture { index }
            | ParameterChange::ValueChange { index, .. }
            | ParameterChange::EndGesture { index } => index,
        }
    }
}

/// Host-side mirror of every plugin parameter.
///
/// The id/index mapping is built once and never changes. Values are stored as
/// `f64` bits in atomics so the audio thread and the control thread can both
/// touch a slot without a lock. Descriptor text is only read on control paths.
#[derive(Debug)]
pub struct ParameterShadow {
    descriptors: RwLock<Vec<ParameterDescriptor>>,
    ids: Box<[ParamId]>,
    index_by_id: HashMap<ParamId, usize>,
    values: Box<[AtomicU64]>,
}

impl ParameterShadow {
    pub fn from_controller(controller: &dyn PluginController) -> Self {
        let count = controller.parameter_count();
        let mut descriptors = Vec::with_capacity(count);
        let mut index_by_id = HashMap::with_capacity(count);
        for index in 0..count {
            let Some(info) = controller.parameter_info(index) else {
                tracing::warn!("Parameter {index} has no info, skipping");
                continue;
            };
            if index_by_id.contains_key(&info.id) {
                tracing::warn!("Duplicate parameter id {} at index {index}, skipping", info.id);
                continue;
            }
            let dense = descriptors.len();
            index_by_id.insert(info.id, dense);
            let mut descriptor = ParameterDescriptor::from_info(dense, info);
            descriptor.normal_value = controller.param_normalized(descriptor.id).clamp(0.0, 1.0);
            descriptors.push(descriptor);
        }
        Self::from_descriptors(descriptors, index_by_id)
    }

    fn from_descriptors(
        descriptors: Vec<ParameterDescriptor>,
        index_by_id: HashMap<ParamId, usize>,
    ) -> Self {
        let ids = descriptors.iter().map(|d| d.id).collect();
        let values = descriptors
            .iter()
            .map(|d| AtomicU64::new(d.normal_value.to_bits()))
            .collect();
        Self {
            descriptors: RwLock::new(descriptors),
            ids,
            index_by_id,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn index_of(&self, id: ParamId) -> Option<usize> {
        self.index_by_id.get(&id).copied()
    }

    pub fn id_of(&self, index: usize) -> Option<ParamId> {
        self.ids.get(index).copied()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values
            .get(index)
            .map(|slot| f64::from_bits(slot.load(Ordering::Acquire)))
    }

    /// Stores `value` and returns the previous one.
    pub fn swap(&self, index: usize, value: f64) -> Option<f64> {
        let value = value.clamp(0.0, 1.0);
        self.values
            .get(index)
            .map(|slot| f64::from_bits(slot.swap(value.to_bits(), Ordering::AcqRel)))
    }

    /// Copies every current value, in index order.
    pub fn snapshot(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|slot| f64::from_bits(slot.load(Ordering::Acquire)))
            .collect()
    }

    pub fn descriptor(&self, index: usize) -> Option<ParameterDescriptor> {
        let descriptors = self
            .descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        descriptors.get(index).cloned().map(|mut d| {
            if let Some(value) = self.get(index) {
                d.normal_value = value;
            }
            d
        })
    }

    pub fn descriptors(&self) -> Vec<ParameterDescriptor> {
        (0..self.len()).filter_map(|i| self.descriptor(i)).collect()
    }

    pub fn find(&self, predicate: impl Fn(&ParameterDescriptor) -> bool) -> Option<usize> {
        let descriptors = self
            .descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        descriptors.iter().position(predicate)
    }

    /// Re-reads every value from the controller. Returns the indices whose
    /// value moved.
    pub fn resync(&self, controller: &dyn PluginController) -> Vec<usize> {
        let mut changed = Vec::new();
        for (index, id) in self.ids.iter().enumerate() {
            let value = controller.param_normalized(*id).clamp(0.0, 1.0);
            if let Some(old) = self.swap(index, value)
                && old != value
            {
                changed.push(index);
            }
        }
        changed
    }

    /// Refreshes labels and units. Ids and ordering are fixed for the
    /// lifetime of the shadow, so entries whose id moved are left alone.
    pub fn refresh_titles(&self, controller: &dyn PluginController) {
        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for index in 0..controller.parameter_count() {
            let Some(info) = controller.parameter_info(index) else {
                continue;
            };
            let Some(dense) = self.index_of(info.id) else {
                tracing::warn!("Parameter id {} appeared after instantiation, ignoring", info.id);
                continue;
            };
            let d = &mut descriptors[dense];
            d.label = info.title;
            d.short_label = info.short_title;
            d.unit = info.units;
        }
    }
}

/// Identity of an automation list owned by the session collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutomationListId(pub u64);

/// Which parameters are currently driven by host automation, and which
/// automation list each one belongs to.
#[derive(Debug)]
pub struct AutomationState {
    subscribed: Box<[AtomicBool]>,
    lists: Mutex<HashMap<usize, AutomationListId>>,
}

impl AutomationState {
    pub fn new(parameter_count: usize) -> Self {
        Self {
            subscribed: (0..parameter_count).map(|_| AtomicBool::new(false)).collect(),
            lists: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, index: usize) -> bool {
        match self.subscribed.get(index) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, index: usize) -> bool {
        match self.subscribed.get(index) {
            Some(flag) => {
                flag.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, index: usize) -> bool {
        self.subscribed
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn subscribed(&self) -> Vec<usize> {
        (0..self.subscribed.len())
            .filter(|&i| self.is_subscribed(i))
            .collect()
    }

    pub fn bind_list(&self, index: usize, list: AutomationListId) -> bool {
        if index >= self.subscribed.len() {
            return false;
        }
        self.lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(index, list);
        true
    }

    pub fn unbind_list(&self, index: usize) -> Option<AutomationListId> {
        self.lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&index)
    }

    pub fn list_for(&self, index: usize) -> Option<AutomationListId> {
        self.lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&index)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: ParamId, index: usize, value: f64) -> ParameterDescriptor {
        ParameterDescriptor::from_info(
            index,
            ParameterInfo {
                id,
                title: format!("Param {id}"),
                short_title: String::new(),
                units: "dB".to_string(),
                step_count: 0,
                default_value: value,
                flags: flags::CAN_AUTOMATE,
            },
        )
    }

    fn shadow() -> ParameterShadow {
        let descriptors = vec![descriptor(100, 0, 0.0), descriptor(7, 1, 0.5), descriptor(42, 2, 1.0)];
        let index_by_id = descriptors.iter().map(|d| (d.id, d.index)).collect();
        ParameterShadow::from_descriptors(descriptors, index_by_id)
    }

    #[test]
    fn id_index_mapping_is_a_bijection() {
        let shadow = shadow();
        assert_eq!(shadow.len(), 3);
        for index in 0..shadow.len() {
            let id = shadow.id_of(index).unwrap();
            assert_eq!(shadow.index_of(id), Some(index));
        }
        assert_eq!(shadow.index_of(999), None);
        assert_eq!(shadow.id_of(3), None);
    }

    #[test]
    fn swap_clamps_and_returns_previous() {
        let shadow = shadow();
        assert_eq!(shadow.swap(1, 2.0), Some(0.5));
        assert_eq!(shadow.get(1), Some(1.0));
        assert_eq!(shadow.swap(5, 0.1), None);
    }

    #[test]
    fn descriptor_reports_current_value() {
        let shadow = shadow();
        shadow.swap(2, 0.25);
        let d = shadow.descriptor(2).unwrap();
        assert_eq!(d.normal_value, 0.25);
        assert_eq!(d.default_value, 1.0);
        assert!(d.automatable);
    }

    #[test]
    fn flags_map_to_descriptor_fields() {
        let d = ParameterDescriptor::from_info(
            0,
            ParameterInfo {
                id: 1,
                title: "Bypass".to_string(),
                short_title: "Byp".to_string(),
                units: String::new(),
                step_count: 1,
                default_value: 0.0,
                flags: flags::CAN_AUTOMATE | flags::IS_BYPASS | flags::IS_READ_ONLY,
            },
        );
        assert!(d.is_bypass);
        assert!(d.is_enum);
        assert!(d.read_only);
        assert!(!d.automatable);
    }

    #[test]
    fn subscriptions_only_change_explicitly() {
        let automation = AutomationState::new(2);
        assert!(!automation.is_subscribed(0));
        assert!(automation.subscribe(0));
        assert!(automation.is_subscribed(0));
        assert!(!automation.subscribe(9));
        assert_eq!(automation.subscribed(), vec![0]);
        assert!(automation.unsubscribe(0));
        assert!(automation.subscribed().is_empty());
    }

    #[test]
    fn automation_lists_are_looked_up_by_index() {
        let automation = AutomationState::new(2);
        assert!(automation.bind_list(1, AutomationListId(77)));
        assert!(!automation.bind_list(2, AutomationListId(1)));
        assert_eq!(automation.list_for(1), Some(AutomationListId(77)));
        assert_eq!(automation.unbind_list(1), Some(AutomationListId(77)));
        assert_eq!(automation.list_for(1), None);
    }
}
