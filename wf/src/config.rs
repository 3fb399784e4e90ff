// SPDX-License-Identifier: AGPL-3.0-only

//! Workflow configuration.
//!
//! Loaded from JSON (every field optional), then overridden from the
//! environment:
//!
//! | Variable              | Field                | Values                          |
//! |-----------------------|----------------------|---------------------------------|
//! | `AMS_EXECUTION`       | `execution`          | `host`, `accelerator`           |
//! | `AMS_PARTITION_BYTES` | `partition_bytes`    | positive integer                |
//! | `AMS_PACK_SPARSE`     | `pack_sparse_groups` | `1`/`0`, `true`/`false`         |
//! | `AMS_UNPACK`          | `unpack`             | `predicate`, `reverse_index`    |

use crate::error::{AmsError, Result};
use crate::partition::DEFAULT_PARTITION_BYTES;
use crate::resource::{global_mode, ExecutionMode, EXECUTION_ENV};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const PARTITION_BYTES_ENV: &str = "AMS_PARTITION_BYTES";
pub const PACK_SPARSE_ENV: &str = "AMS_PACK_SPARSE";
pub const UNPACK_ENV: &str = "AMS_UNPACK";

/// How a chunk's physics outputs are written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpackStrategy {
    /// Re-scan the chunk predicate.
    Predicate,
    /// Scatter through the reverse index recorded at pack time.
    #[default]
    ReverseIndex,
}

impl UnpackStrategy {
    /// Whether chunk temporaries include a reverse-index slot per point.
    #[must_use]
    pub const fn records_reverse_index(self) -> bool {
        matches!(self, Self::ReverseIndex)
    }
}

impl fmt::Display for UnpackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predicate => write!(f, "predicate"),
            Self::ReverseIndex => write!(f, "reverse_index"),
        }
    }
}

impl FromStr for UnpackStrategy {
    type Err = AmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "predicate" => Ok(Self::Predicate),
            "reverse_index" | "reverse-index" | "index" => Ok(Self::ReverseIndex),
            other => Err(AmsError::Config(format!("unknown unpack strategy '{other}'"))),
        }
    }
}

/// Tunables of one [`crate::dispatch::Workflow`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub execution: ExecutionMode,
    /// Byte budget for one chunk's temporaries.
    pub partition_bytes: usize,
    /// Gather partially occupied groups into dense buffers (host only).
    pub pack_sparse_groups: bool,
    pub unpack: UnpackStrategy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            execution: global_mode(),
            partition_bytes: DEFAULT_PARTITION_BYTES,
            pack_sparse_groups: true,
            unpack: UnpackStrategy::ReverseIndex,
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AmsError::Config(format!("{name}: expected a boolean, got '{other}'"))),
    }
}

impl WorkflowConfig {
    /// Read a JSON configuration file.
    ///
    /// # Errors
    ///
    /// [`AmsError::Io`] when the file cannot be read, [`AmsError::Config`]
    /// when it does not parse or fails [`Self::validate`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| AmsError::Config(format!("{}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AMS_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// [`AmsError::Config`] for a malformed variable.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply `AMS_*` overrides from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// [`AmsError::Config`] for a malformed value.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup(EXECUTION_ENV) {
            self.execution = v.parse()?;
        }
        if let Some(v) = lookup(PARTITION_BYTES_ENV) {
            self.partition_bytes = v.trim().parse().map_err(|e| {
                AmsError::Config(format!("{PARTITION_BYTES_ENV}: '{v}' is not a byte count: {e}"))
            })?;
        }
        if let Some(v) = lookup(PACK_SPARSE_ENV) {
            self.pack_sparse_groups = parse_flag(PACK_SPARSE_ENV, &v)?;
        }
        if let Some(v) = lookup(UNPACK_ENV) {
            self.unpack = v.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// # Errors
    ///
    /// [`AmsError::Config`] when the partition budget is zero.
    pub fn validate(&self) -> Result<()> {
        if self.partition_bytes == 0 {
            return Err(AmsError::Config("partition_bytes must be positive".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    #[must_use]
    pub const fn with_partition_bytes(mut self, bytes: usize) -> Self {
        self.partition_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_unpack(mut self, unpack: UnpackStrategy) -> Self {
        self.unpack = unpack;
        self
    }

    #[must_use]
    pub const fn with_pack_sparse_groups(mut self, enabled: bool) -> Self {
        self.pack_sparse_groups = enabled;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let c = WorkflowConfig::default();
        assert_eq!(c.execution, global_mode());
        assert_eq!(c.partition_bytes, 64 * 1024 * 1024);
        assert!(c.pack_sparse_groups);
        assert_eq!(c.unpack, UnpackStrategy::ReverseIndex);
    }

    #[test]
    fn json_fields_are_optional() {
        let c: WorkflowConfig =
            serde_json::from_str(r#"{"execution": "accelerator", "unpack": "predicate"}"#).unwrap();
        assert_eq!(c.execution, ExecutionMode::Accelerator);
        assert_eq!(c.unpack, UnpackStrategy::Predicate);
        assert_eq!(c.partition_bytes, DEFAULT_PARTITION_BYTES);
    }

    #[test]
    fn from_json_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"partition_bytes": 0}}"#).unwrap();
        let err = WorkflowConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, AmsError::Config(_)));
    }

    #[test]
    fn from_json_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            WorkflowConfig::from_json_file(file.path()),
            Err(AmsError::Config(_))
        ));
    }

    #[test]
    fn overrides_apply() {
        let c = WorkflowConfig::default()
            .with_overrides_from(lookup(&[
                ("AMS_EXECUTION", "gpu"),
                ("AMS_PARTITION_BYTES", "4096"),
                ("AMS_PACK_SPARSE", "off"),
                ("AMS_UNPACK", "predicate"),
            ]))
            .unwrap();
        assert_eq!(c.execution, ExecutionMode::Accelerator);
        assert_eq!(c.partition_bytes, 4096);
        assert!(!c.pack_sparse_groups);
        assert_eq!(c.unpack, UnpackStrategy::Predicate);
    }

    #[test]
    fn malformed_override_is_config_error() {
        for pairs in [
            [("AMS_PARTITION_BYTES", "lots")],
            [("AMS_PACK_SPARSE", "maybe")],
            [("AMS_UNPACK", "sideways")],
            [("AMS_PARTITION_BYTES", "0")],
        ] {
            let err = WorkflowConfig::default()
                .with_overrides_from(lookup(&pairs))
                .unwrap_err();
            assert!(matches!(err, AmsError::Config(_)), "{pairs:?}");
        }
    }

    #[test]
    fn absent_overrides_keep_values() {
        let base = WorkflowConfig::default().with_partition_bytes(1024);
        let c = base.clone().with_overrides_from(|_| None).unwrap();
        assert_eq!(c, base);
    }
}
