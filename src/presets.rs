use std::collections::BTreeMap;

/// Factory program names as reported by the controller, and user presets as
/// registered by the preset browser.
#[derive(Debug, Clone, Default)]
pub struct PresetCatalog {
    factory: Vec<String>,
    user: BTreeMap<String, String>,
}

impl PresetCatalog {
    pub fn set_factory(&mut self, names: Vec<String>) {
        self.factory = names;
    }

    pub fn factory_count(&self) -> usize {
        self.factory.len()
    }

    pub fn factory_names(&self) -> &[String] {
        &self.factory
    }

    /// Returns the previous URI registered under `name`.
    pub fn register_user(&mut self, name: impl Into<String>, uri: impl Into<String>) -> Option<String> {
        self.user.insert(name.into(), uri.into())
    }

    pub fn user_presets(&self) -> &BTreeMap<String, String> {
        &self.user
    }

    /// Normalized program-change value selecting factory program `n`.
    pub fn program_value(&self, n: usize, step_count: i32) -> Option<f64> {
        if n >= self.factory.len() {
            return None;
        }
        let steps = if step_count > 0 {
            step_count as usize
        } else {
            self.factory.len().saturating_sub(1)
        };
        if n > steps {
            return None;
        }
        if steps == 0 {
            return Some(0.0);
        }
        Some(n as f64 / steps as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_values_spread_over_steps() {
        let mut catalog = PresetCatalog::default();
        catalog.set_factory(vec!["A".into(), "B".into(), "C".into()]);
        assert_eq!(catalog.program_value(0, 2), Some(0.0));
        assert_eq!(catalog.program_value(1, 2), Some(0.5));
        assert_eq!(catalog.program_value(2, 0), Some(1.0));
        assert_eq!(catalog.program_value(3, 2), None);
    }

    #[test]
    fn programs_past_the_last_step_are_unreachable() {
        let mut catalog = PresetCatalog::default();
        catalog.set_factory(vec!["A".into(), "B".into(), "C".into()]);
        assert_eq!(catalog.program_value(1, 1), Some(1.0));
        assert_eq!(catalog.program_value(2, 1), None);
    }

    #[test]
    fn user_presets_map_names_to_uris() {
        let mut catalog = PresetCatalog::default();
        assert_eq!(catalog.register_user("Warm", "file:///p/warm.vstpreset"), None);
        assert_eq!(
            catalog.register_user("Warm", "file:///p/warm2.vstpreset").as_deref(),
            Some("file:///p/warm.vstpreset")
        );
        assert_eq!(catalog.user_presets().len(), 1);
    }
}
