use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::config::{DetectorSettings, Language};

use super::backend::DetectorBackend;
use super::backends::{DemoBackend, StubBackend};

/// Builds a backend from detector settings.
pub type BackendFactory = fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>>;

/// Registry of detector backends by name.
///
/// Only one backend runs per pipeline; the registry just resolves the
/// configured name to a constructed instance.
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, BackendFactory>,
    default_name: Option<&'static str>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with the built-in `demo` (default) and `stub` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("demo", build_demo);
        registry.register("stub", build_stub);
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register(&mut self, name: &'static str, factory: BackendFactory) {
        if self.default_name.is_none() {
            self.default_name = Some(name);
        }
        self.factories.insert(name, factory);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let (key, _) = self
            .factories
            .get_key_value(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        self.default_name = Some(*key);
        Ok(())
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Build the backend named in `settings`, or the default when the name
    /// is empty.
    pub fn create(&self, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
        let name = if settings.backend.trim().is_empty() {
            self.default_name
                .ok_or_else(|| anyhow!("no detector backends registered"))?
        } else {
            settings.backend.as_str()
        };
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "unknown detector backend '{}' (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        factory(settings)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn build_demo(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(DemoBackend::new(
        settings.detection_interval,
        settings.language == Language::Japanese,
    )))
}

fn build_stub(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(StubBackend::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(backend: &str) -> DetectorSettings {
        DetectorSettings {
            backend: backend.to_string(),
            ..DetectorSettings::default()
        }
    }

    #[test]
    fn builtin_backends_resolve_by_name() -> Result<()> {
        let registry = BackendRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["demo", "stub"]);
        assert_eq!(registry.create(&settings("stub"))?.name(), "stub");
        assert_eq!(registry.create(&settings("demo"))?.name(), "demo");
        Ok(())
    }

    #[test]
    fn empty_name_uses_default() -> Result<()> {
        let mut registry = BackendRegistry::with_builtin();
        assert_eq!(registry.create(&settings(""))?.name(), "demo");
        registry.set_default("stub")?;
        assert_eq!(registry.create(&settings(" "))?.name(), "stub");
        Ok(())
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let registry = BackendRegistry::with_builtin();
        let err = registry.create(&settings("yolo")).err().expect("error");
        assert!(err.to_string().contains("unknown detector backend"));
    }

    #[test]
    fn set_default_requires_registered_backend() {
        let mut registry = BackendRegistry::new();
        assert!(registry.create(&settings("")).is_err());
        assert!(registry.set_default("demo").is_err());
    }
}
