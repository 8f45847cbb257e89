use serde::Serialize;
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::config::ModelConfig;
use crate::error::{GenerationError, Result};
use crate::presets::resolve_preset;

/// Environment variable naming the persisted config document.
pub const CONFIG_PATH_ENV: &str = "STABLEGEN_CONFIG_PATH";
const DEFAULT_CONFIG_DIR: &str = "config";
const CONFIG_FILE_NAME: &str = "config.json";

/// Loads, merges and persists a [`ModelConfig`] as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Option<ModelConfig>,
}

impl ConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Uses `<dir>/config.json`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(CONFIG_FILE_NAME))
    }

    /// Uses `$STABLEGEN_CONFIG_PATH`, or `config/config.json` when unset.
    pub fn from_env() -> Self {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::new(path),
            _ => Self::from_dir(DEFAULT_CONFIG_DIR),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory config, if one was loaded.
    pub fn current(&self) -> Option<&ModelConfig> {
        self.config.as_ref()
    }

    /// A copy of the current config, loading the default preset first if needed.
    pub fn snapshot(&mut self) -> Result<ModelConfig> {
        match &self.config {
            Some(config) => Ok(config.clone()),
            None => self.load(None),
        }
    }

    /// Reads the persisted document, or seeds it from a preset when none exists.
    ///
    /// A document that fails to parse is reported as
    /// [`GenerationError::ConfigCorruption`]; it is never replaced by defaults.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&mut self, preset_name: Option<&str>) -> Result<ModelConfig> {
        if self.path.exists() {
            let raw = fs::read_to_string(&self.path)?;
            let config: ModelConfig =
                serde_json::from_str(&raw).map_err(|source| GenerationError::ConfigCorruption {
                    path: self.path.clone(),
                    source,
                })?;
            debug!(model_id = %config.model_id, "Loaded persisted config");
            self.config = Some(config.clone());
            return Ok(config);
        }

        let resolved = resolve_preset(preset_name);
        info!(preset = resolved.name, fell_back = resolved.fell_back, "No config document, seeding from preset");
        self.config = Some(resolved.config.clone());
        self.save()?;
        Ok(resolved.config)
    }

    /// Writes the full attribute set, replacing the document in one rename.
    pub fn save(&self) -> Result<()> {
        let Some(config) = &self.config else {
            return Ok(());
        };

        let bytes = to_document(config)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut staged = staging_file(&dir, &self.path)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), "Saved config document");
        Ok(())
    }

    /// Overwrites every recognised attribute present in `overrides`, then saves.
    ///
    /// Unknown keys are skipped. A value of the wrong type rejects the whole
    /// update and leaves both memory and disk untouched.
    #[instrument(skip(self, overrides), fields(keys = overrides.len()))]
    pub fn update(&mut self, overrides: &Map<String, Value>) -> Result<ModelConfig> {
        let current = self.snapshot()?;
        let mut fields = match serde_json::to_value(&current)? {
            Value::Object(fields) => fields,
            other => {
                return Err(GenerationError::InvalidConfig(format!(
                    "config serialized to a non-object: {}",
                    other
                )))
            }
        };

        for (key, value) in overrides {
            if ModelConfig::is_attribute(key) {
                fields.insert(key.clone(), value.clone());
            } else {
                debug!(key = %key, "Ignoring unknown config key");
            }
        }

        let updated: ModelConfig = serde_json::from_value(Value::Object(fields))
            .map_err(|e| GenerationError::InvalidConfig(format!("invalid config override: {}", e)))?;
        updated.validate()?;

        self.config = Some(updated.clone());
        self.save()?;
        Ok(updated)
    }
}

/// A temp file beside `target` that keeps the document's permissions across the rename.
/// A new document gets the umask default rather than tempfile's owner-only mode.
fn staging_file(dir: &Path, target: &Path) -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let staged = builder.tempfile_in(dir)?;
    if let Ok(existing) = fs::metadata(target) {
        staged.as_file().set_permissions(existing.permissions())?;
    }
    Ok(staged)
}

fn to_document(config: &ModelConfig) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    config.serialize(&mut serializer)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Device;
    use crate::presets::{preset, preset_names};
    use serde_json::json;

    fn manager_in(dir: &tempfile::TempDir) -> ConfigManager {
        ConfigManager::from_dir(dir.path().join("config"))
    }

    #[test]
    fn every_preset_seeds_and_round_trips() {
        for name in preset_names() {
            let dir = tempfile::tempdir().unwrap();
            let mut manager = manager_in(&dir);
            let loaded = manager.load(Some(name)).unwrap();
            assert_eq!(loaded, preset(name).unwrap());
            assert!(manager.path().exists());

            let mut reader = manager_in(&dir);
            assert_eq!(reader.load(None).unwrap(), loaded, "preset {name}");
        }
    }

    #[test]
    fn unknown_preset_seeds_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        let loaded = manager.load(Some("sd-v9")).unwrap();
        assert_eq!(loaded, preset("sd-v1-5").unwrap());
    }

    #[test]
    fn existing_document_wins_over_preset_name() {
        let dir = tempfile::tempdir().unwrap();
        manager_in(&dir).load(Some("sdxl")).unwrap();
        let loaded = manager_in(&dir).load(Some("sd-v1-5")).unwrap();
        assert_eq!(loaded.model_id, "stabilityai/stable-diffusion-xl-base-1.0");
    }

    #[test]
    fn save_then_load_preserves_every_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        manager.load(None).unwrap();
        let custom = ModelConfig::new("someone/custom-xl")
            .with_device(Device::Cuda)
            .with_steps(20)
            .with_guidance_scale(3.25)
            .with_size(768, 640)
            .with_seed(Some(1234))
            .with_scheduler("euler_a")
            .with_negative_prompt("blurry")
            .with_num_images(3);
        manager.config = Some(custom.clone());
        manager.save().unwrap();

        assert_eq!(manager_in(&dir).load(None).unwrap(), custom);
    }

    #[test]
    fn unknown_document_fields_are_dropped_and_missing_ones_defaulted() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        fs::write(
            manager.path(),
            r#"{"model_id": "x/y", "guidance_scale": 4.0, "lora_weights": ["a"], "safety": false}"#,
        )
        .unwrap();

        let mut manager = manager;
        let loaded = manager.load(None).unwrap();
        assert_eq!(loaded.model_id, "x/y");
        assert_eq!(loaded.guidance_scale, 4.0);
        assert_eq!(loaded.num_inference_steps, ModelConfig::default().num_inference_steps);

        manager.save().unwrap();
        let rewritten: Value = serde_json::from_str(&fs::read_to_string(manager.path()).unwrap()).unwrap();
        let keys: Vec<&String> = rewritten.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), ModelConfig::ATTRIBUTE_NAMES.len());
        assert!(rewritten.get("lora_weights").is_none());
    }

    #[test]
    fn malformed_document_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        fs::write(manager.path(), "{ \"model_id\": ").unwrap();

        let err = manager.load(Some("sdxl")).unwrap_err();
        assert!(matches!(err, GenerationError::ConfigCorruption { .. }));
        assert!(manager.current().is_none());
        assert_eq!(fs::read_to_string(manager.path()).unwrap(), "{ \"model_id\": ");
    }

    #[test]
    fn update_changes_only_named_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        let before = manager.load(None).unwrap();
        assert_eq!(before.guidance_scale, 7.5);

        let mut overrides = Map::new();
        overrides.insert("guidance_scale".into(), json!(9.0));
        let after = manager.update(&overrides).unwrap();

        assert_eq!(after.guidance_scale, 9.0);
        assert_eq!(after, before.clone().with_guidance_scale(9.0));
        assert_eq!(manager_in(&dir).load(None).unwrap(), after);
    }

    #[test]
    fn update_with_unknown_key_leaves_document_bytes_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        manager.load(None).unwrap();
        let before = fs::read(manager.path()).unwrap();

        let mut overrides = Map::new();
        overrides.insert("nonexistent_field".into(), json!(1));
        manager.update(&overrides).unwrap();

        assert_eq!(fs::read(manager.path()).unwrap(), before);
    }

    #[test]
    fn update_with_wrong_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        let before = manager.load(None).unwrap();

        let mut overrides = Map::new();
        overrides.insert("num_inference_steps".into(), json!("lots"));
        overrides.insert("guidance_scale".into(), json!(2.0));
        let err = manager.update(&overrides).unwrap_err();

        assert!(matches!(err, GenerationError::InvalidConfig(_)));
        assert_eq!(manager.current(), Some(&before));
    }

    #[test]
    fn update_without_prior_load_seeds_default_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        let mut overrides = Map::new();
        overrides.insert("seed".into(), json!(99));
        let updated = manager.update(&overrides).unwrap();
        assert_eq!(updated.seed, Some(99));
        assert_eq!(updated.model_id, "runwayml/stable-diffusion-v1-5");
    }

    #[test]
    fn document_is_indented_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        manager.load(None).unwrap();
        let text = fs::read_to_string(manager.path()).unwrap();
        assert!(text.starts_with("{\n    \"model_id\": \"runwayml/stable-diffusion-v1-5\""));
        assert!(text.contains("\n    \"seed\": null"));
    }

    #[cfg(unix)]
    #[test]
    fn saving_keeps_the_document_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(&dir);
        manager.load(None).unwrap();
        fs::set_permissions(manager.path(), fs::Permissions::from_mode(0o640)).unwrap();

        let mut overrides = Map::new();
        overrides.insert("num_inference_steps".into(), json!(12));
        manager.update(&overrides).unwrap();

        let mode = fs::metadata(manager.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }
}
