use serde::{Deserialize, Serialize};

pub const LIVE_MIDI_CC_ENV: &str = "MAOLAN_VST3_LIVE_MIDI_CC";
pub const SYNC_RESTART_ENV: &str = "MAOLAN_VST3_SYNC_RESTART";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

/// Per-plugin workarounds. They select which success path is taken and never
/// turn a working plugin into an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityFlags {
    /// Negotiate main buses as mono regardless of what the plugin advertises.
    pub single_channel_main_bus: bool,
    /// Service restart requests on the calling thread instead of at the next idle.
    pub synchronous_restart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    pub sample_rate: f64,
    pub block_size: usize,
    pub edit_queue_capacity: usize,
    pub max_events_per_cycle: usize,
    pub max_points_per_parameter: usize,
    pub parameter_change_capacity: usize,
    pub live_midi_cc: bool,
    pub compat: CompatibilityFlags,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_size: 512,
            edit_queue_capacity: 1024,
            max_events_per_cycle: 512,
            max_points_per_parameter: 16,
            parameter_change_capacity: 4096,
            live_midi_cc: false,
            compat: CompatibilityFlags::default(),
        }
    }
}

impl BridgeOptions {
    /// Applies `MAOLAN_VST3_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if env_flag(LIVE_MIDI_CC_ENV) {
            self.live_midi_cc = true;
        }
        if env_flag(SYNC_RESTART_ENV) {
            self.compat.synchronous_restart = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let opts: BridgeOptions =
            serde_json::from_str(r#"{"block_size": 256, "compat": {"synchronous_restart": true}}"#)
                .unwrap();
        assert_eq!(opts.block_size, 256);
        assert_eq!(opts.sample_rate, 48_000.0);
        assert!(opts.compat.synchronous_restart);
        assert!(!opts.compat.single_channel_main_bus);
    }

    #[test]
    fn unset_env_flag_is_false() {
        assert!(!env_flag("MAOLAN_VST3_SURELY_NOT_SET_ANYWHERE"));
    }
}
