use serde::{Deserialize, Serialize};

/// Residual-based goodness-of-fit statistics.
///
/// Computed once at convergence from the observed and predicted response
/// arrays; the log-likelihood underneath the information criteria follows
/// Spiess & Neumeyer (BMC Pharmacology 2010, 10:6). The small-sample
/// corrections are `None` when the sample is too small for the formula to
/// be defined (`n <= p` for adjusted R², `n <= p + 1` for AICc).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub r2: f64,
    pub r2_adjusted: Option<f64>,
    pub aic: f64,
    pub aicc: Option<f64>,
    pub bic: f64,
    /// Root mean squared residual
    pub rmse: f64,
    /// Number of observations used
    pub n_observations: usize,
    /// Number of fitted parameters
    pub n_parameters: usize,
}

/// Evaluate fit quality from paired observed/predicted arrays.
///
/// # Panics
///
/// Panics if the arrays have different lengths or are empty.
pub fn evaluate_quality(observed: &[f64], predicted: &[f64], n_parameters: usize) -> FitQuality {
    assert_eq!(
        observed.len(),
        predicted.len(),
        "observed and predicted must have the same length"
    );
    assert!(!observed.is_empty(), "quality of an empty fit is undefined");

    let n = observed.len();
    let residuals: Vec<f64> = observed
        .iter()
        .zip(predicted)
        .map(|(&y, &yp)| y - yp)
        .collect();

    let rss: f64 = residuals.iter().map(|e| e * e).sum();
    let rmse = (rss / n as f64).sqrt();

    let r2 = 1.0 - variance(&residuals) / variance(observed);
    let r2_adjusted = if n > n_parameters {
        Some(1.0 - (1.0 - r2) * (n as f64 - 1.0) / (n - n_parameters) as f64)
    } else {
        None
    };

    let n_f = n as f64;
    let p_f = n_parameters as f64;
    let log_likelihood =
        0.5 * (-n_f * ((2.0 * std::f64::consts::PI).ln() + 1.0 - n_f.ln() + rss.max(1e-300).ln()));

    let aic = 2.0 * p_f - 2.0 * log_likelihood;
    let aicc = if n > n_parameters + 1 {
        Some(aic + 2.0 * p_f * (p_f + 1.0) / (n_f - p_f - 1.0))
    } else {
        None
    };
    let bic = p_f * n_f.ln() - 2.0 * log_likelihood;

    FitQuality {
        r2,
        r2_adjusted,
        aic,
        aicc,
        bic,
        rmse,
        n_observations: n,
        n_parameters,
    }
}

fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perfect_fit() {
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let quality = evaluate_quality(&y, &y, 2);
        assert_relative_eq!(quality.r2, 1.0);
        assert_relative_eq!(quality.r2_adjusted.unwrap(), 1.0);
        assert_relative_eq!(quality.rmse, 0.0);
    }

    #[test]
    fn test_r2_drops_with_error() {
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let yp = [1.1, 2.1, 2.8, 4.2, 4.9];
        let quality = evaluate_quality(&y, &yp, 2);
        assert!(quality.r2 < 1.0);
        assert!(quality.r2 > 0.9);
        assert!(quality.r2_adjusted.unwrap() < quality.r2);
    }

    #[test]
    fn test_aicc_penalizes_more_than_aic() {
        let y = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let yp = [1.1, 2.0, 3.1, 3.9, 5.0, 6.1];
        let quality = evaluate_quality(&y, &yp, 2);
        assert!(quality.aicc.unwrap() > quality.aic);
    }

    #[test]
    fn test_small_sample_corrections_unavailable() {
        let y = [1.0, 2.0, 3.0];
        let yp = [1.0, 2.1, 2.9];
        let quality = evaluate_quality(&y, &yp, 3);
        assert!(quality.r2_adjusted.is_none());
        assert!(quality.aicc.is_none());
    }

    #[test]
    fn test_more_parameters_raise_aic() {
        let y = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let yp = [1.1, 2.0, 3.1, 3.9, 5.0, 6.1, 6.9, 8.0];
        let lean = evaluate_quality(&y, &yp, 2);
        let rich = evaluate_quality(&y, &yp, 4);
        assert!(rich.aic > lean.aic);
        assert!(rich.bic > lean.bic);
    }
}
