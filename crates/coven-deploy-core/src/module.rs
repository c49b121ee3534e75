// ABOUTME: On-disk module definitions and the supervisor's per-module cache.
// ABOUTME: A refresh re-reads the definition file and bumps the cached revision.

use crate::error::ModuleError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration for one logical module, read from `<modules_dir>/<name>.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Incremented every time the supervisor refreshes this module.
    #[serde(default = "first_revision")]
    pub revision: u64,
}

fn first_revision() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    description: Option<String>,
    #[serde(default)]
    settings: toml::Table,
}

impl ModuleDefinition {
    /// Definition used when a module has no file on disk.
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            settings: Map::new(),
            revision: first_revision(),
        }
    }

    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.toml"))
    }

    /// Read the current definition from disk. A missing file yields an empty definition.
    pub fn load(dir: &Path, name: &str) -> Result<Self, ModuleError> {
        let path = Self::path_for(dir, name);
        if !path.exists() {
            return Ok(Self::empty(name));
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ModuleError::Read {
            path: path.clone(),
            source,
        })?;
        let file: DefinitionFile =
            toml::from_str(&content).map_err(|source| ModuleError::Parse { path, source })?;
        let settings = match serde_json::to_value(file.settings)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(Self {
            name: name.to_string(),
            description: file.description,
            settings,
            revision: first_revision(),
        })
    }

    pub fn to_json(&self) -> Result<String, ModuleError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ModuleError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(Value::as_u64)
    }

    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(Value::as_bool)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

/// Cached module definitions, keyed by module name.
#[derive(Debug)]
pub struct ModuleCache {
    dir: PathBuf,
    definitions: HashMap<String, ModuleDefinition>,
}

impl ModuleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            definitions: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached definition, loading it on first use.
    pub fn resolve(&mut self, name: &str) -> Result<&ModuleDefinition, ModuleError> {
        if !self.definitions.contains_key(name) {
            let definition = ModuleDefinition::load(&self.dir, name)?;
            self.definitions.insert(name.to_string(), definition);
        }
        Ok(&self.definitions[name])
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDefinition> {
        self.definitions.get(name)
    }

    /// Replace the cached definition with the current on-disk one.
    pub fn refresh(&mut self, name: &str) -> Result<&ModuleDefinition, ModuleError> {
        let previous = self.definitions.get(name).map_or(0, |d| d.revision);
        let mut definition = ModuleDefinition::load(&self.dir, name)?;
        definition.revision = previous + 1;
        self.definitions.insert(name.to_string(), definition);
        Ok(&self.definitions[name])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_definition(dir: &Path, name: &str, content: &str) {
        std::fs::write(ModuleDefinition::path_for(dir, name), content).unwrap();
    }

    #[test]
    fn test_missing_file_is_empty_definition() {
        let dir = tempfile::tempdir().unwrap();
        let definition = ModuleDefinition::load(dir.path(), "echo").unwrap();
        assert_eq!(definition, ModuleDefinition::empty("echo"));
        assert_eq!(definition.revision, 1);
    }

    #[test]
    fn test_load_settings() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(
            dir.path(),
            "ticker",
            r#"
            description = "heartbeat"

            [settings]
            beats = 4
            queue_restart = true
            greeting = "hi"
            "#,
        );

        let definition = ModuleDefinition::load(dir.path(), "ticker").unwrap();
        assert_eq!(definition.description.as_deref(), Some("heartbeat"));
        assert_eq!(definition.setting_u64("beats"), Some(4));
        assert_eq!(definition.setting_bool("queue_restart"), Some(true));
        assert_eq!(definition.setting_str("greeting"), Some("hi"));
        assert_eq!(definition.setting_u64("missing"), None);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "broken", "settings = [");
        let err = ModuleDefinition::load(dir.path(), "broken").unwrap_err();
        assert!(matches!(err, ModuleError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_json_round_trip_keeps_revision() {
        let mut definition = ModuleDefinition::empty("echo");
        definition.revision = 3;
        definition
            .settings
            .insert("linger_units".to_string(), Value::from(2));
        let decoded = ModuleDefinition::from_json(&definition.to_json().unwrap()).unwrap();
        assert_eq!(decoded, definition);
    }

    #[test]
    fn test_cache_resolves_once_and_refresh_rereads() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "echo", "[settings]\nlinger_units = 1\n");

        let mut cache = ModuleCache::new(dir.path());
        assert!(cache.get("echo").is_none());
        assert_eq!(cache.resolve("echo").unwrap().setting_u64("linger_units"), Some(1));

        write_definition(dir.path(), "echo", "[settings]\nlinger_units = 9\n");
        // Still the cached copy until refreshed.
        assert_eq!(cache.resolve("echo").unwrap().setting_u64("linger_units"), Some(1));

        let refreshed = cache.refresh("echo").unwrap();
        assert_eq!(refreshed.setting_u64("linger_units"), Some(9));
        assert_eq!(refreshed.revision, 2);
        assert_eq!(cache.get("echo").unwrap().revision, 2);
    }
}
