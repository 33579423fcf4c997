use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Parameters of the visibility selection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionConfig {
    /// Upper bound on the summed point count of the selected nodes.
    pub point_budget: u64,
    /// Nodes smaller on screen than the root times this factor are culled.
    pub min_projected_size_modifier: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            point_budget: 2_000_000,
            min_projected_size_modifier: 0.1,
        }
    }
}

impl SelectionConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_projected_size_modifier >= 0.0) {
            return Err(invalid(
                "minProjectedSizeModifier",
                format!("{} is not a non-negative number", self.min_projected_size_modifier),
            ));
        }
        Ok(())
    }
}

/// Parameters of the background loader and the disposer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamingConfig {
    pub max_nodes_per_cycle: usize,
    /// Fraction of the nodes waiting for disposal released every cycle.
    pub disposal_rate: f64,
    pub worker_count: usize,
    /// Failed loads of a node before it stops being scheduled.
    pub max_load_attempts: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_nodes_per_cycle: 5,
            disposal_rate: 0.1,
            worker_count: 2,
            max_load_attempts: 3,
        }
    }
}

impl StreamingConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_nodes_per_cycle == 0 {
            return Err(invalid("maxNodesPerCycle", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.disposal_rate) {
            return Err(invalid(
                "disposalRate",
                format!("{} is outside [0, 1]", self.disposal_rate),
            ));
        }
        if self.worker_count == 0 {
            return Err(invalid("workerCount", "must be at least 1"));
        }
        if self.max_load_attempts == 0 {
            return Err(invalid("maxLoadAttempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Number of queued disposals to process when `queued` nodes wait.
    pub fn disposals_per_cycle(&self, queued: usize) -> usize {
        if queued == 0 || self.disposal_rate <= 0.0 {
            return 0;
        }
        ((queued as f64 * self.disposal_rate).ceil() as usize).min(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = StreamingConfig::from_json(r#"{ "workerCount": 4 }"#).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_nodes_per_cycle, 5);
        assert_eq!(config.disposal_rate, 0.1);

        let selection = SelectionConfig::from_json("{}").unwrap();
        assert_eq!(selection, SelectionConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(StreamingConfig::from_json(r#"{ "disposalRate": 1.5 }"#).is_err());
        assert!(StreamingConfig::from_json(r#"{ "maxNodesPerCycle": 0 }"#).is_err());
        assert!(StreamingConfig::from_json(r#"{ "workerCount": 0 }"#).is_err());
        assert!(SelectionConfig::from_json(r#"{ "minProjectedSizeModifier": -1.0 }"#).is_err());
        assert!(matches!(
            SelectionConfig::from_json("{ nope"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn disposal_rate_rounds_up() {
        let mut config = StreamingConfig::default();
        assert_eq!(config.disposals_per_cycle(0), 0);
        assert_eq!(config.disposals_per_cycle(1), 1);
        assert_eq!(config.disposals_per_cycle(25), 3);

        config.disposal_rate = 1.0;
        assert_eq!(config.disposals_per_cycle(17), 17);
        config.disposal_rate = 0.0;
        assert_eq!(config.disposals_per_cycle(17), 0);
    }
}
