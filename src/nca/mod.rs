//! Non-compartmental analysis (NCA).
//!
//! Exposure statistics computed by direct numerical integration of the
//! concentration-time profile, without assuming a compartmental structure:
//! AUC and AUMC per dosing interval (mixed trapezoidal/log-trapezoidal
//! rule), interval extrema and accumulation ratios, and the extrapolation
//! to infinity with its derived clearance, volumes and half-life.
//!
//! NCA is independent of the simulator and optimizer; it consumes raw
//! arrays plus a previously estimated terminal elimination rate.
//!
//! ```
//! use pkfit::nca::{analyze, NcaOptions};
//!
//! let times: Vec<f64> = vec![0.0, 30.0, 60.0, 120.0, 240.0];
//! let concs: Vec<f64> = times.iter().map(|t| 5.0 * (-0.01 * t).exp()).collect();
//! let result = analyze(&times, &concs, &[0.0], 100.0, 1.0, 0.01, &NcaOptions::default()).unwrap();
//! assert!(result.auc_0inf > result.auc_0t);
//! ```

pub mod analysis;
pub mod auc;

use thiserror::Error;

pub use analysis::{analyze, IntervalStats, NcaOptions, NcaResult};
pub use auc::{auc_over, auc_segment, aumc_over, aumc_segment, Integration};

/// Errors from non-compartmental analysis
#[derive(Error, Debug, Clone)]
pub enum NcaError {
    #[error("Terminal elimination rate must be positive and finite, got {value}")]
    InvalidLambdaZ { value: f64 },
    #[error("At least two observations are required, got {n_observations}")]
    InsufficientData { n_observations: usize },
    #[error("The dosing schedule has no doses")]
    EmptySchedule,
}
