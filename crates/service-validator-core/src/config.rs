//! Rule configuration: discovery, lenient on/off/warn parsing, resolution
//!
//! ```yaml
//! handbook_rules:
//!   content_location: warn
//!   no_422: off
//! native_checks:
//!   status_code_conformance: on
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::registry::{DefaultState, Registry, RuleKind};

/// Base name of the configuration file, without extension
pub const CONFIG_FILE_NAME: &str = "service-validator-config";

/// Recognized extensions, in lookup order within one directory
const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Configured state of a single rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    On,
    Off,
    /// Runs, but failures are reported as warnings
    Warn,
}

impl RuleState {
    /// Interpret a configuration value.
    ///
    /// `"warn"` is a warning. `"off"` and every falsy value (`false`, `null`,
    /// `0`, `""`, empty list or mapping) are off: YAML reads an unquoted `off`
    /// as `false`, and both spellings must mean the same. Anything else is on.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) if s == "warn" => Self::Warn,
            Value::String(s) if s == "off" || s.is_empty() => Self::Off,
            Value::Null | Value::Bool(false) => Self::Off,
            Value::Number(n) if n.as_f64() == Some(0.0) => Self::Off,
            Value::Array(a) if a.is_empty() => Self::Off,
            Value::Object(o) if o.is_empty() => Self::Off,
            _ => Self::On,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Warn => "warn",
        }
    }
}

impl std::fmt::Display for RuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleConfig {
    pub handbook: BTreeMap<String, RuleState>,
    pub native: BTreeMap<String, RuleState>,
    /// File the configuration was read from
    pub source: Option<PathBuf>,
}

impl RuleConfig {
    /// Build from a parsed document. Unknown sections are ignored and a
    /// section that is not a mapping counts as empty.
    #[must_use]
    pub fn from_value(doc: &Value) -> Self {
        Self {
            handbook: section(doc, RuleKind::Handbook),
            native: section(doc, RuleKind::Native),
            source: None,
        }
    }

    /// Load a configuration file, choosing the parser by extension.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid YAML/JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;

        let doc: Value = if content.trim().is_empty() {
            Value::Null
        } else if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?
        } else {
            serde_yml::from_str(&content)
                .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?
        };

        let mut config = Self::from_value(&doc);
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Search `start_dir` and its parents; the first directory holding a
    /// configuration file wins.
    #[must_use]
    pub fn locate(start_dir: &Path) -> Option<PathBuf> {
        start_dir.ancestors().find_map(|dir| {
            EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{CONFIG_FILE_NAME}.{ext}")))
                .find(|candidate| candidate.is_file())
        })
    }

    /// Locate and load. `Ok(None)` when no file exists up to the root.
    ///
    /// # Errors
    ///
    /// Returns error if a file was found but could not be read or parsed.
    pub fn discover(start_dir: &Path) -> Result<Option<Self>, ConfigError> {
        match Self::locate(start_dir) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using rule configuration");
                Self::load(&path).map(Some)
            }
            None => {
                tracing::debug!(start = %start_dir.display(), "no rule configuration found, using defaults");
                Ok(None)
            }
        }
    }

    /// Every configured (rule, state) pair across both sections.
    pub fn entries(&self) -> impl Iterator<Item = (&str, RuleState)> {
        self.handbook
            .iter()
            .chain(self.native.iter())
            .map(|(name, state)| (name.as_str(), *state))
    }
}

fn section(doc: &Value, kind: RuleKind) -> BTreeMap<String, RuleState> {
    doc.get(kind.section())
        .and_then(Value::as_object)
        .map(|rules| {
            rules
                .iter()
                .map(|(name, value)| (name.clone(), RuleState::from_value(value)))
                .collect()
        })
        .unwrap_or_default()
}

/// Rules that run this session, and the subset whose failures are warnings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSelection {
    pub active: BTreeSet<String>,
    pub warnings: BTreeSet<String>,
}

impl RuleSelection {
    /// Registry defaults: every rule that is on by default, no warnings.
    #[must_use]
    pub fn defaults(registry: &Registry) -> Self {
        Self {
            active: registry
                .all_rules()
                .iter()
                .filter(|r| r.default_state() == DefaultState::On)
                .map(|r| r.name().to_string())
                .collect(),
            warnings: BTreeSet::new(),
        }
    }

    /// Apply a configuration on top of the registry defaults.
    ///
    /// `off` in either section wins over any other state for the same name.
    /// Names the registry does not know are ignored.
    #[must_use]
    pub fn from_config(config: &RuleConfig, registry: &Registry) -> Self {
        let mut off = BTreeSet::new();
        let mut on = BTreeSet::new();
        let mut warn = BTreeSet::new();

        for (name, state) in config.entries() {
            if !registry.contains(name) {
                tracing::debug!(rule = name, "ignoring unknown rule in configuration");
                continue;
            }
            match state {
                RuleState::Off => off.insert(name),
                RuleState::On => on.insert(name),
                RuleState::Warn => warn.insert(name),
            };
        }

        let active: BTreeSet<String> = registry
            .all_rules()
            .iter()
            .map(|r| r.name())
            .filter(|name| !off.contains(name))
            .filter(|name| {
                let enabled_by_default = registry
                    .get(name)
                    .is_some_and(|r| r.default_state() == DefaultState::On);
                enabled_by_default || on.contains(name) || warn.contains(name)
            })
            .map(str::to_string)
            .collect();

        let warnings = warn
            .into_iter()
            .filter(|name| active.contains(*name))
            .map(str::to_string)
            .collect();

        Self { active, warnings }
    }

    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains(name)
    }

    #[must_use]
    pub fn is_warning(&self, name: &str) -> bool {
        self.warnings.contains(name)
    }
}

/// Resolve the rule selection for a session started in `start_dir`.
///
/// # Errors
///
/// Returns error if a configuration file exists but is malformed.
pub fn resolve(start_dir: &Path, registry: &Registry) -> Result<RuleSelection, ConfigError> {
    let selection = match RuleConfig::discover(start_dir)? {
        Some(config) => RuleSelection::from_config(&config, registry),
        None => RuleSelection::defaults(registry),
    };
    tracing::debug!(
        active = selection.active.len(),
        warnings = selection.warnings.len(),
        "resolved rule selection"
    );
    Ok(selection)
}

/// Serialization of a written configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Yaml,
    Json,
}

impl ConfigFormat {
    #[must_use]
    pub fn file_name(self) -> String {
        match self {
            Self::Yaml => format!("{CONFIG_FILE_NAME}.yaml"),
            Self::Json => format!("{CONFIG_FILE_NAME}.json"),
        }
    }
}

/// What [`write_default`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// File existed and overwrite was not requested
    AlreadyExists,
}

/// Registry defaults as a configuration document.
#[must_use]
pub fn default_document(registry: &Registry) -> Value {
    let mut doc = serde_json::Map::new();
    for kind in [RuleKind::Handbook, RuleKind::Native] {
        let rules: serde_json::Map<String, Value> = registry
            .of_kind(kind)
            .map(|r| (r.name().to_string(), Value::from(r.default_state().as_str())))
            .collect();
        doc.insert(kind.section().to_string(), Value::Object(rules));
    }
    Value::Object(doc)
}

/// Write the registry defaults to `path`.
///
/// # Errors
///
/// Returns error if the document cannot be serialized or written.
pub fn write_default(
    path: &Path,
    format: ConfigFormat,
    registry: &Registry,
    overwrite: bool,
) -> Result<WriteOutcome, ConfigError> {
    if path.exists() && !overwrite {
        return Ok(WriteOutcome::AlreadyExists);
    }

    let doc = default_document(registry);
    let content = match format {
        ConfigFormat::Yaml => serde_yml::to_string(&doc)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        ConfigFormat::Json => serde_json::to_string_pretty(&doc)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?,
    };
    std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
    Ok(WriteOutcome::Written)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("malformed configuration {0}: {1}")]
    Parse(PathBuf, String),
    #[error("cannot serialize configuration: {0}")]
    Serialize(String),
}
