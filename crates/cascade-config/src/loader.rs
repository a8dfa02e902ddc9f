//! Loading of provider configuration and action definitions
//!
//! A manifest lists providers and named actions:
//!
//! ```yaml
//! providers:
//!   - name: default
//!     type: db-postgres
//!     connectType: pool
//!     connectConfig:
//!       host: ${PG_HOST:localhost}
//!       user: ${PG_USER}
//!       password: ${PG_PASSWORD}
//! actions:
//!   unit_add:
//!     "@main": { action: mdl.unit.add, type: broker, out: id }
//!     lines:
//!       "@add": { action: mdl.line.add, type: broker, args: { pid: /id, "...": "*" } }
//! ```
//!
//! Actions are declarative definitions unless they carry an `attributes`
//! key, in which case they are taken as already compiled. Environment
//! references are resolved in the `providers` section only.

use crate::env_resolver::EnvResolver;
use crate::error::{ConfigError, ConfigResult};
use cascade_core::Action;
use cascade_provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Supported file formats for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    /// Detect file format from extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
            Some("json") => Ok(FileFormat::Json),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => Err(ConfigError::UnsupportedFormat("no extension".to_string())),
        }
    }

    fn parse(self, content: &str) -> ConfigResult<JsonValue> {
        Ok(match self {
            FileFormat::Yaml => serde_yaml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)?,
        })
    }
}

/// Parsed manifest before compilation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigManifest {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub actions: BTreeMap<String, JsonValue>,
}

impl ConfigManifest {
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    /// Compile one named action and check that its providers are declared
    pub fn action(&self, name: &str) -> ConfigResult<Action> {
        let definition =
            self.actions.get(name).ok_or_else(|| ConfigError::ActionNotFound(name.to_string()))?;
        let action = compile_action(name, definition)?;

        for provider in action.provider_names() {
            if self.provider(&provider).is_none() {
                return Err(ConfigError::Validation(format!(
                    "action '{}' references undeclared provider '{}'",
                    name, provider
                )));
            }
        }
        Ok(action)
    }

    /// Compile every action
    pub fn compile_all(&self) -> ConfigResult<BTreeMap<String, Action>> {
        self.actions.keys().map(|name| Ok((name.clone(), self.action(name)?))).collect()
    }
}

/// Compile a definition, or deserialize it when it is already compiled.
/// The action's `endpoint` label defaults to `name`.
pub fn compile_action(name: &str, definition: &JsonValue) -> ConfigResult<Action> {
    let mut action = if definition.get("attributes").is_some() {
        serde_json::from_value::<Action>(definition.clone())?
    } else {
        cascade_runtime::compile(definition)
            .map_err(|source| ConfigError::Compile { name: name.to_string(), source })?
    };
    action.attributes.endpoint.get_or_insert_with(|| name.to_string());
    Ok(action)
}

/// Reads manifests and standalone action files
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    resolver: EnvResolver,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(resolver: EnvResolver) -> Self {
        Self { resolver }
    }

    /// Load a manifest from a file
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<ConfigManifest> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let content = fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), ?format, "Loading manifest");
        self.parse_content(&content, format)
    }

    /// Parse manifest content directly
    pub fn parse_content(&self, content: &str, format: FileFormat) -> ConfigResult<ConfigManifest> {
        let mut root = format.parse(content)?;
        if let Some(providers) = root.get_mut("providers") {
            *providers = self.resolver.resolve(providers)?;
        }

        let manifest: ConfigManifest = serde_json::from_value(root)?;
        validate(&manifest)?;
        tracing::info!(
            providers = manifest.providers.len(),
            actions = manifest.actions.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }

    /// Load a single action definition file; the file stem names the action
    pub fn load_action_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<Action> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let definition = format.parse(&fs::read_to_string(path)?)?;
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("action");
        compile_action(name, &definition)
    }
}

fn validate(manifest: &ConfigManifest) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for provider in &manifest.providers {
        if provider.name.trim().is_empty() {
            return Err(ConfigError::Validation("provider name must not be empty".to_string()));
        }
        if !seen.insert(provider.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "provider '{}' is declared more than once",
                provider.name
            )));
        }
        provider
            .validate_connect()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
    }

    for (name, definition) in &manifest.actions {
        if !definition.is_object() {
            return Err(ConfigError::Validation(format!("action '{}' must be a mapping", name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_provider::ConnectType;
    use std::io::Write;

    const MANIFEST: &str = r#"
providers:
  - name: default
    type: test
    connectType: pool
    connectConfig:
      user: app
      host: ${CASCADE_LOADER_TEST_HOST:localhost}
  - name: js
    type: script
actions:
  unit_add:
    "@main": { action: mdl.unit.add, type: broker, out: id }
    lines:
      "@add": { action: mdl.line.add, type: broker, args: { pid: /id, "...": "*" } }
  lookup:
    attributes: { action: find, provider: js }
  broken:
    "@main": { action: x, provider: nowhere, type: func }
"#;

    #[test]
    fn parses_yaml_manifest() {
        let manifest = ConfigLoader::new().parse_content(MANIFEST, FileFormat::Yaml).unwrap();

        let default = manifest.provider("default").unwrap();
        assert_eq!(default.connect_type, ConnectType::Pool);
        assert_eq!(default.connect_config["host"], "localhost");
        assert_eq!(manifest.action_names(), vec!["broken", "lookup", "unit_add"]);

        let unit_add = manifest.action("unit_add").unwrap();
        assert_eq!(unit_add.attributes.endpoint.as_deref(), Some("unit_add"));
        assert_eq!(unit_add.on.len(), 1);
        assert_eq!(unit_add.on[0].path(), "lines");

        let lookup = manifest.action("lookup").unwrap();
        assert_eq!(lookup.attributes.provider.as_deref(), Some("js"));
    }

    #[test]
    fn rejects_bad_references_and_duplicates() {
        let manifest = ConfigLoader::new().parse_content(MANIFEST, FileFormat::Yaml).unwrap();
        assert!(matches!(manifest.action("broken"), Err(ConfigError::Validation(_))));
        assert!(matches!(manifest.action("missing"), Err(ConfigError::ActionNotFound(_))));
        assert!(manifest.compile_all().is_err());

        let duplicate = r#"{"providers": [{"name": "a", "type": "test"}, {"name": "a", "type": "test"}]}"#;
        let err = ConfigLoader::new().parse_content(duplicate, FileFormat::Json).unwrap_err();
        assert!(err.to_string().contains("more than once"));

        let pooled_session = r#"{"providers": [{"name": "a", "type": "test", "connectType": "pool", "credentialsSource": "session"}]}"#;
        let err = ConfigLoader::new().parse_content(pooled_session, FileFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn compile_errors_name_the_action() {
        let err = compile_action("bad", &serde_json::json!({"@zap": {"action": "x", "type": "func"}}))
            .unwrap_err();
        assert!(err.to_string().starts_with("Action 'bad' failed to compile"));
    }

    #[test]
    fn loads_manifest_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "{}", MANIFEST).unwrap();

        let manifest = ConfigLoader::new().load_from_file(file.path()).unwrap();
        assert_eq!(manifest.providers.len(), 2);
        assert_eq!(manifest.provider("js").unwrap().kind, "script");
        assert_eq!(manifest.action("unit_add").unwrap().on[0].attributes.action.as_deref(), Some("mdl.line.add"));

        let mut unknown = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(unknown, "{}", MANIFEST).unwrap();
        let err = ConfigLoader::new().load_from_file(unknown.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(ref ext) if ext == "toml"));
    }

    #[test]
    fn action_file_is_named_by_its_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit_upd.json");
        std::fs::write(
            &path,
            r#"{"@main": {"action": "mdl.unit.upd", "type": "func", "out": "..."}, "lines": {"@del": {"action": "mdl.line.del", "type": "broker"}}}"#,
        )
        .unwrap();

        let action = ConfigLoader::new().load_action_file(&path).unwrap();
        assert_eq!(action.attributes.endpoint.as_deref(), Some("unit_upd"));
        assert_eq!(action.attributes.action.as_deref(), Some("mdl.unit.upd"));
        assert_eq!(action.on[0].path(), "lines");

        assert!(ConfigLoader::new().load_action_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn format_detection() {
        assert_eq!(FileFormat::from_path("a.yml").unwrap(), FileFormat::Yaml);
        assert_eq!(FileFormat::from_path("a.json").unwrap(), FileFormat::Json);
        assert!(FileFormat::from_path("a.toml").is_err());
        assert!(FileFormat::from_path("manifest").is_err());
    }
}
