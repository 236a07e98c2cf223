use serde::{Deserialize, Serialize};

use crate::data::units::Unit;
use crate::optimize::statistics::FitQuality;
use crate::Significance;

/// A per-parameter confidence interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    /// Whether the interval contains the given value
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// One fitted parameter with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedParameter {
    pub name: String,
    pub value: f64,
    /// Display unit tag
    pub unit: Unit,
    /// `None` when the covariance at convergence was singular
    pub interval: Option<ConfidenceInterval>,
    pub significance: Significance,
}

/// The predicted response curve at the observation times, with the
/// simulated confidence envelope when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedCurve {
    pub times: Vec<f64>,
    pub predicted: Vec<f64>,
    pub lower: Option<Vec<f64>>,
    pub upper: Option<Vec<f64>>,
}

/// Result of one two-stage fit: point estimates with confidence intervals,
/// the predicted curve, and residual-based quality statistics.
///
/// `converged` reports whether the local stage reached its tolerance within
/// the iteration budget; a `false` value flags a low-confidence fit but is
/// not an error; the caller decides whether to accept it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub parameters: Vec<FittedParameter>,
    pub curve: PredictedCurve,
    pub quality: FitQuality,
    pub converged: bool,
    pub model_equation: String,
}

impl FitResult {
    /// The point-estimate vector in declared parameter order
    pub fn parameter_values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    /// Look up a fitted parameter by name
    pub fn parameter(&self, name: &str) -> Option<&FittedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Serialize the result for the workflow layer
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_contains() {
        let interval = ConfidenceInterval {
            lower: 1.0,
            upper: 2.0,
        };
        assert!(interval.contains(1.5));
        assert!(!interval.contains(2.5));
        assert!((interval.width() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_json_roundtrip() {
        let result = FitResult {
            parameters: vec![FittedParameter {
                name: "Cl".to_string(),
                value: 0.1,
                unit: Unit::LiterPerMinute,
                interval: Some(ConfidenceInterval {
                    lower: 0.09,
                    upper: 0.11,
                }),
                significance: Significance::Significant,
            }],
            curve: PredictedCurve {
                times: vec![0.0, 1.0],
                predicted: vec![5.0, 4.9],
                lower: None,
                upper: None,
            },
            quality: crate::optimize::evaluate_quality(&[5.0, 4.9], &[5.0, 4.9], 1),
            converged: true,
            model_equation: "dC/dt = -Cl/V * C".to_string(),
        };
        let json = result.to_json().unwrap();
        let back: FitResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.parameters[0].name, "Cl");
        assert!(back.converged);
    }
}
