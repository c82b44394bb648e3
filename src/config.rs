//! Validation settings, deserialized from JSON with sensible defaults.

use crate::thresholds::{FdrEstimator, Thresholder};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Serialize)]
/// Actual settings used for a run - may include overrides or default values
/// not set by the user.
pub struct ValidationSettings {
    /// Target FDR in percent at every level.
    pub fdr_limit: f64,
    pub estimator: FdrEstimator,
    /// Sliding-window size override; `None` uses each histogram's `n_max`.
    pub window_size: Option<u32>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            fdr_limit: 1.0,
            estimator: FdrEstimator::Classical,
            window_size: None,
        }
    }
}

impl ValidationSettings {
    pub fn thresholder(&self) -> Thresholder {
        Thresholder::new(self.fdr_limit, self.estimator)
    }
}

#[derive(Deserialize, Debug, Default)]
/// User-facing settings as they appear in a JSON file.
pub struct ValidationOptions {
    fdr_limit: Option<f64>,
    estimator: Option<FdrEstimator>,
    window_size: Option<u32>,
}

impl From<ValidationOptions> for ValidationSettings {
    fn from(value: ValidationOptions) -> Self {
        let default = ValidationSettings::default();
        let mut fdr_limit = value.fdr_limit.unwrap_or(default.fdr_limit).abs();
        if fdr_limit > 100.0 {
            log::warn!("fdr_limit is a percentage; clamping {} to 100", fdr_limit);
            fdr_limit = 100.0;
        }
        if fdr_limit > 5.0 {
            log::warn!("fdr_limit {}% is higher than expected", fdr_limit);
        }
        let window_size = match value.window_size {
            Some(0) => {
                log::warn!("window_size 0 is invalid, using the default");
                None
            }
            other => other,
        };
        Self {
            fdr_limit,
            estimator: value.estimator.unwrap_or(default.estimator),
            window_size,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ValidationSettings::from(ValidationOptions::default());
        assert_eq!(settings.fdr_limit, 1.0);
        assert_eq!(settings.estimator, FdrEstimator::Classical);
        assert_eq!(settings.window_size, None);
    }

    #[test]
    fn deserialization_and_clamping() {
        let options: ValidationOptions =
            serde_json::from_str(r#"{"fdr_limit": -5.0, "estimator": "probabilistic"}"#).unwrap();
        let settings = ValidationSettings::from(options);
        assert_eq!(settings.fdr_limit, 5.0);
        assert_eq!(settings.estimator, FdrEstimator::Probabilistic);

        let options: ValidationOptions =
            serde_json::from_str(r#"{"fdr_limit": 250.0, "window_size": 0}"#).unwrap();
        let settings = ValidationSettings::from(options);
        assert_eq!(settings.fdr_limit, 100.0);
        assert_eq!(settings.window_size, None);
    }
}
