use serde::{Deserialize, Serialize};

use crate::nca::auc::{auc_over, aumc_over, Integration};
use crate::nca::NcaError;

/// Options for a non-compartmental analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NcaOptions {
    pub integration: Integration,
}

/// Exposure statistics of one dosing interval.
///
/// Extrema are tracked symmetrically: Cmax/Tmax and Cmin/Tmin are each the
/// plain extreme over the interval's observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    pub start: f64,
    pub end: f64,
    pub auc: f64,
    pub aumc: f64,
    pub cmax: f64,
    pub tmax: f64,
    pub cmin: f64,
    pub tmin: f64,
    /// Average concentration `AUC / (end - start)`
    pub cavg: f64,
    /// Peak-to-trough ratio `Cmax / Cmin`
    pub fluctuation: f64,
    /// `AUC_i / AUC_1`; `None` on the first interval
    pub accumulation_vs_first: Option<f64>,
    /// `AUC_i / AUC_{i-1}`; `None` on the first interval
    pub accumulation_vs_previous: Option<f64>,
}

/// Result of a non-compartmental analysis.
///
/// Whole-curve integrals run from the first observation to the last, with
/// the terminal extrapolation `Clast / λz` (and its first-moment analogue)
/// carrying them to infinity. Clearance and the apparent volumes are
/// closed-form ratios of these integrals and the administered dose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NcaResult {
    pub intervals: Vec<IntervalStats>,
    pub auc_0t: f64,
    pub aumc_0t: f64,
    pub auc_0inf: f64,
    pub aumc_0inf: f64,
    /// Mean residence time `AUMC0inf / AUC0inf`
    pub mrt: f64,
    /// Terminal elimination rate supplied by the caller
    pub lambda_z: f64,
    /// Terminal half-life `ln(2) / λz`
    pub half_life: f64,
    /// Apparent clearance `F * D / AUC0inf`
    pub clearance: f64,
    /// Apparent terminal volume `CL / λz`
    pub volume_z: f64,
    /// Apparent steady-state volume `CL * MRT`
    pub volume_ss: f64,
}

impl NcaResult {
    /// Serialize the result for the workflow layer
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Run a non-compartmental analysis over raw concentration-time arrays.
///
/// `dose_times` are the administration times of the (already expanded)
/// bolus doses, defining the dosing intervals: `[dose_i, dose_{i+1})`, the
/// last interval extending to the final observation. `dose_amount` is the
/// total administered amount and `bioavailability` its systemically
/// available fraction; `lambda_z` is a previously estimated terminal
/// elimination rate.
///
/// Errors: fewer than two observations, a non-positive `lambda_z`, or an
/// empty dosing schedule are rejected.
///
/// # Panics
///
/// Panics if `times` and `concentrations` have different lengths.
pub fn analyze(
    times: &[f64],
    concentrations: &[f64],
    dose_times: &[f64],
    dose_amount: f64,
    bioavailability: f64,
    lambda_z: f64,
    options: &NcaOptions,
) -> Result<NcaResult, NcaError> {
    assert_eq!(
        times.len(),
        concentrations.len(),
        "times and concentrations must have the same length"
    );
    if times.len() < 2 {
        return Err(NcaError::InsufficientData {
            n_observations: times.len(),
        });
    }
    if !(lambda_z.is_finite() && lambda_z > 0.0) {
        return Err(NcaError::InvalidLambdaZ { value: lambda_z });
    }
    if dose_times.is_empty() {
        return Err(NcaError::EmptySchedule);
    }

    let mut boundaries = dose_times.to_vec();
    boundaries.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let t_last = *times.last().unwrap();

    let mut intervals: Vec<IntervalStats> = Vec::new();
    for (i, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(i + 1).copied().unwrap_or(t_last);
        if end <= start {
            continue;
        }
        let stats = interval_stats(times, concentrations, start, end, options.integration);
        if let Some(mut stats) = stats {
            let first_auc = intervals.first().map(|s: &IntervalStats| s.auc);
            let previous_auc = intervals.last().map(|s| s.auc);
            stats.accumulation_vs_first = first_auc.map(|auc| stats.auc / auc);
            stats.accumulation_vs_previous = previous_auc.map(|auc| stats.auc / auc);
            intervals.push(stats);
        }
    }

    let auc_0t = auc_over(times, concentrations, options.integration);
    let aumc_0t = aumc_over(times, concentrations, options.integration);

    // Terminal extrapolation from the last measurable concentration
    let clast_index = concentrations
        .iter()
        .rposition(|&c| c > 0.0)
        .ok_or(NcaError::InsufficientData { n_observations: 0 })?;
    let clast = concentrations[clast_index];
    let tlast = times[clast_index];

    let auc_0inf = auc_0t + clast / lambda_z;
    let aumc_0inf = aumc_0t + clast * (tlast + 1.0 / lambda_z) / lambda_z;
    let mrt = aumc_0inf / auc_0inf;
    let clearance = bioavailability * dose_amount / auc_0inf;

    Ok(NcaResult {
        intervals,
        auc_0t,
        aumc_0t,
        auc_0inf,
        aumc_0inf,
        mrt,
        lambda_z,
        half_life: std::f64::consts::LN_2 / lambda_z,
        clearance,
        volume_z: clearance / lambda_z,
        volume_ss: clearance * mrt,
    })
}

fn interval_stats(
    times: &[f64],
    concentrations: &[f64],
    start: f64,
    end: f64,
    rule: Integration,
) -> Option<IntervalStats> {
    let eps = 1e-9;
    let indices: Vec<usize> = times
        .iter()
        .enumerate()
        .filter(|(_, &t)| start - eps <= t && t <= end + eps)
        .map(|(i, _)| i)
        .collect();
    if indices.len() < 2 {
        return None;
    }

    let t: Vec<f64> = indices.iter().map(|&i| times[i]).collect();
    let c: Vec<f64> = indices.iter().map(|&i| concentrations[i]).collect();

    let auc = auc_over(&t, &c, rule);
    let aumc = aumc_over(&t, &c, rule);

    let mut cmax = c[0];
    let mut tmax = t[0];
    let mut cmin = c[0];
    let mut tmin = t[0];
    for (&time, &conc) in t.iter().zip(&c) {
        if conc > cmax {
            cmax = conc;
            tmax = time;
        }
        if conc < cmin {
            cmin = conc;
            tmin = time;
        }
    }

    let duration = end - start;
    Some(IntervalStats {
        start,
        end,
        auc,
        aumc,
        cmax,
        tmax,
        cmin,
        tmin,
        cavg: auc / duration,
        fluctuation: if cmin > 0.0 { cmax / cmin } else { f64::INFINITY },
        accumulation_vs_first: None,
        accumulation_vs_previous: None,
    })
}
