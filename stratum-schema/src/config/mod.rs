//! Configuration file parsing for `stratum.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{SchemaError, SchemaResult};
use crate::normalize::{NormalizeMode, Normalizer};

/// Main configuration structure for `stratum.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StratumConfig {
    /// Normalizer settings.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Migration settings.
    #[serde(default)]
    pub migrations: MigrationSettings,

    /// Plugin migration tracking settings.
    #[serde(default)]
    pub plugins: PluginSettings,

    /// Environment-specific overrides.
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverride>,
}

impl StratumConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> SchemaResult<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Self =
            toml::from_str(&expanded).map_err(|e| SchemaError::TomlError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-specific overrides.
    pub fn with_environment(mut self, env: &str) -> Self {
        if let Some(overrides) = self.environments.remove(env) {
            if let Some(strict) = overrides.strict {
                self.schema.strict = strict;
            }
            if let Some(allow) = overrides.allow_destructive {
                self.migrations.allow_destructive = allow;
            }
            if let Some(auto) = overrides.auto_snapshot {
                self.migrations.auto_snapshot = auto;
            }
            if let Some(days) = overrides.retention_days {
                self.migrations.retention_days = days;
            }
        }
        self
    }

    /// Build the normalizer these settings describe.
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::with_mode(if self.schema.strict {
            NormalizeMode::Strict
        } else {
            NormalizeMode::Permissive
        })
    }

    fn validate(&self) -> SchemaResult<()> {
        if self.schema.string_length == 0 {
            return Err(SchemaError::config("schema.string_length must be positive"));
        }
        for (key, value) in [
            ("migrations.table_name", &self.migrations.table_name),
            ("plugins.table_name", &self.plugins.table_name),
            ("plugins.versions_table", &self.plugins.versions_table),
        ] {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(SchemaError::config(format!(
                    "{key} must be a plain identifier, got `{value}`"
                )));
            }
        }
        Ok(())
    }
}

/// Normalizer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    /// Reject unknown type tokens and modifiers.
    #[serde(default)]
    pub strict: bool,

    /// VARCHAR length for `string` columns.
    #[serde(default = "default_string_length")]
    pub string_length: u32,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            strict: false,
            string_length: default_string_length(),
        }
    }
}

fn default_string_length() -> u32 { 255 }

/// Migration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSettings {
    /// Migration files directory.
    #[serde(default = "default_migrations_dir")]
    pub directory: String,

    /// Trash directory for discarded migration files.
    #[serde(default = "default_trash_dir")]
    pub trash_directory: String,

    /// Days a trashed file stays restorable.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Migration ledger table name.
    #[serde(default = "default_migrations_table")]
    pub table_name: String,

    /// Apply destructive steps without a snapshot.
    #[serde(default)]
    pub allow_destructive: bool,

    /// Snapshot populated tables before destructive steps.
    #[serde(default)]
    pub auto_snapshot: bool,

    /// Name prefix for snapshot tables.
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            directory: default_migrations_dir(),
            trash_directory: default_trash_dir(),
            retention_days: default_retention_days(),
            table_name: default_migrations_table(),
            allow_destructive: false,
            auto_snapshot: false,
            snapshot_prefix: default_snapshot_prefix(),
        }
    }
}

fn default_migrations_dir() -> String { "./migrations".to_string() }
fn default_trash_dir() -> String { "./.trash".to_string() }
fn default_retention_days() -> u32 { 30 }
fn default_migrations_table() -> String { "_stratum_migrations".to_string() }
fn default_snapshot_prefix() -> String { "_stratum_snapshot_".to_string() }

/// Plugin migration tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginSettings {
    /// Plugin migration ledger table.
    #[serde(default = "default_plugin_table")]
    pub table_name: String,

    /// Installed plugin versions table.
    #[serde(default = "default_plugin_versions_table")]
    pub versions_table: String,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            table_name: default_plugin_table(),
            versions_table: default_plugin_versions_table(),
        }
    }
}

fn default_plugin_table() -> String { "_stratum_plugin_migrations".to_string() }
fn default_plugin_versions_table() -> String { "_stratum_plugin_versions".to_string() }

/// Environment-specific configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentOverride {
    /// Override `schema.strict`.
    pub strict: Option<bool>,

    /// Override `migrations.allow_destructive`.
    pub allow_destructive: Option<bool>,

    /// Override `migrations.auto_snapshot`.
    pub auto_snapshot: Option<bool>,

    /// Override `migrations.retention_days`.
    pub retention_days: Option<u32>,
}

/// Expand environment variables in the format `${VAR_NAME}`.
///
/// Unset variables are left as written.
fn expand_env_vars(content: &str) -> SchemaResult<String> {
    let re = regex_lite::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| SchemaError::config(e.to_string()))?;

    Ok(re
        .replace_all(content, |caps: &regex_lite::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned())
}
