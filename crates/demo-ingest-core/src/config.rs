use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::DemoSource;
use crate::IngestError;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_POSITION_INTERVAL: u32 = 16;

const MAX_BATCH_SIZE: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    /// Ticks between position samples.
    pub position_interval: u32,
    pub parse_positions: bool,
    pub source: DemoSource,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl IngestConfig {
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            position_interval: DEFAULT_POSITION_INTERVAL,
            parse_positions: true,
            source: DemoSource::default(),
        }
    }

    /// Validates batching and sampling parameters.
    ///
    /// # Errors
    /// Returns [`IngestError::Configuration`] when a value is out of range.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.batch_size == 0 {
            return Err(IngestError::Configuration(
                "batch_size MUST be >= 1".to_string(),
            ));
        }

        if self.batch_size > MAX_BATCH_SIZE {
            return Err(IngestError::Configuration(format!(
                "batch_size MUST be <= {MAX_BATCH_SIZE}"
            )));
        }

        if self.parse_positions && self.position_interval == 0 {
            return Err(IngestError::Configuration(
                "position_interval MUST be >= 1 when positions are parsed".to_string(),
            ));
        }

        if self.source.as_str().is_empty() {
            return Err(IngestError::Configuration(
                "source tag MUST NOT be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builds a config from a JSON object, filling omitted fields with defaults.
    ///
    /// # Errors
    /// Returns [`IngestError::Configuration`] when the payload is malformed or invalid.
    pub fn from_json(value: &Value) -> Result<Self, IngestError> {
        let config: Self = serde_json::from_value(value.clone()).map_err(|err| {
            IngestError::Configuration(format!("invalid ingest config JSON payload: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Whether a position sample should be taken at `tick`.
    #[must_use]
    pub fn samples_positions_at(&self, tick: u32) -> bool {
        self.parse_positions && self.position_interval > 0 && tick % self.position_interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        let config = IngestConfig::defaults();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.position_interval, 16);
        assert!(config.parse_positions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = IngestConfig::defaults();
        config.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(IngestError::Configuration(_))
        ));
    }

    #[test]
    fn zero_interval_is_allowed_when_positions_are_off() {
        let mut config = IngestConfig::defaults();
        config.position_interval = 0;
        assert!(config.validate().is_err());
        config.parse_positions = false;
        assert!(config.validate().is_ok());
        assert!(!config.samples_positions_at(0));
    }

    #[test]
    fn from_json_fills_defaults_and_parses_source() {
        let config = match IngestConfig::from_json(&json!({"source": "FACEIT", "batch_size": 250}))
        {
            Ok(value) => value,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(config.source, DemoSource::Faceit);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.position_interval, DEFAULT_POSITION_INTERVAL);
    }

    #[test]
    fn from_json_rejects_wrong_types() {
        assert!(IngestConfig::from_json(&json!({"batch_size": "many"})).is_err());
    }

    #[test]
    fn sampling_follows_interval() {
        let config = IngestConfig::defaults();
        assert!(config.samples_positions_at(0));
        assert!(config.samples_positions_at(32));
        assert!(!config.samples_positions_at(33));
    }
}
