use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::absorption::AbsorptionModel;
use crate::data::covariate::Covariates;
use crate::data::expression::{AmountExpr, ExpressionError};
use crate::data::units::Unit;
use crate::{Parametric, Significance};

/// Occurrences at exactly the window edge still count; tolerance for the
/// accumulated floating-point error of `start + k*every`.
const TIME_EPS: f64 = 1e-9;

/// Error type for dose parsing and dose queries
#[derive(Error, Debug, Clone)]
pub enum DoseError {
    #[error("Malformed dose descriptor '{descriptor}': {reason}")]
    Parse { descriptor: String, reason: String },
    #[error("Time unit of a dose must be minutes or hours")]
    UnsupportedTimeUnit,
    #[error("After normalization the dose amount must be a mass")]
    UnsupportedDoseUnit,
    #[error("A repeated bolus requires every > 0")]
    InvalidRepeat,
    #[error("Released amount is undefined for an infusion through an absorption profile")]
    InfusionThroughProfile,
    #[error("An extravascular dose requires an absorption profile on its drug source")]
    MissingProfile,
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// Administration route of a dose.
///
/// The route selects the absorption kinetics: intravenous doses enter the
/// central compartment directly, extravascular routes release through an
/// [`AbsorptionModel`] of the matching order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    /// Intravenous: no absorption step
    Iv,
    /// Extravascular, zero-order absorption
    Ev0,
    /// Extravascular, first-order absorption
    Ev1,
    /// Extravascular, mixed zero-then-first-order absorption
    Ev01,
    /// Extravascular, fractional-order absorption
    EvFractional,
}

impl Route {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "iv" => Some(Route::Iv),
            "ev0" => Some(Route::Ev0),
            "ev1" => Some(Route::Ev1),
            "ev01" => Some(Route::Ev01),
            "evFractional" => Some(Route::EvFractional),
            _ => None,
        }
    }

    /// Whether the route bypasses absorption entirely
    pub fn is_intravenous(&self) -> bool {
        matches!(self, Route::Iv)
    }

    /// Default absorption model for this route, with zeroed parameters.
    ///
    /// Returns `None` for intravenous routes.
    pub fn default_absorption(&self) -> Option<AbsorptionModel> {
        match self {
            Route::Iv => None,
            Route::Ev0 => Some(AbsorptionModel::ZeroOrder { rin: 0.0 }),
            Route::Ev1 => Some(AbsorptionModel::FirstOrder { ka: 0.0 }),
            Route::Ev01 => Some(AbsorptionModel::ZeroThenFirst {
                rin: 0.0,
                t0: 0.0,
                ka: 0.0,
            }),
            Route::EvFractional => Some(AbsorptionModel::Fractional {
                amax: 0.0,
                k: 0.0,
                alpha: 0.5,
            }),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Route::Iv => "iv",
            Route::Ev0 => "ev0",
            Route::Ev1 => "ev1",
            Route::Ev01 => "ev01",
            Route::EvFractional => "evFractional",
        };
        write!(f, "{}", s)
    }
}

/// Timing of a dose: exactly one of the three interpretations is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DoseSchedule {
    /// A single instantaneous administration at `time`
    Bolus { time: f64 },
    /// Boluses at `start, start+every, ...` up to and including `end`
    RepeatedBolus { start: f64, every: f64, end: f64 },
    /// Constant-rate administration over `[start, end]`
    Infusion { start: f64, end: f64 },
}

impl DoseSchedule {
    /// Administration times of the schedule's occurrences.
    ///
    /// A bolus has one occurrence, a repeated bolus one per period (the end
    /// time is inclusive), an infusion none (it is not impulsive).
    pub fn occurrence_times(&self) -> Vec<f64> {
        match *self {
            DoseSchedule::Bolus { time } => vec![time],
            DoseSchedule::RepeatedBolus { start, every, end } => {
                // Parsing enforces every > 0; the guard keeps a hand-built
                // schedule finite
                if every <= 0.0 {
                    return vec![start];
                }
                let mut times = Vec::new();
                let mut k = 0usize;
                loop {
                    let t = start + k as f64 * every;
                    if t > end + TIME_EPS {
                        break;
                    }
                    times.push(t);
                    k += 1;
                }
                times
            }
            DoseSchedule::Infusion { .. } => Vec::new(),
        }
    }

    fn scale_times(&mut self, factor: f64) {
        match self {
            DoseSchedule::Bolus { time } => *time *= factor,
            DoseSchedule::RepeatedBolus { start, every, end } => {
                *start *= factor;
                *every *= factor;
                *end *= factor;
            }
            DoseSchedule::Infusion { start, end } => {
                *start *= factor;
                *end *= factor;
            }
        }
    }
}

/// A free (optimizable) dose parameter, declared by a bare `tlag` or
/// `bioavailability` token in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseParameter {
    Tlag,
    Bioavailability,
}

impl DoseParameter {
    pub fn name(&self) -> &'static str {
        match self {
            DoseParameter::Tlag => "tlag",
            DoseParameter::Bioavailability => "bioavailability",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            DoseParameter::Tlag => Unit::Minute,
            DoseParameter::Bioavailability => Unit::None,
        }
    }
}

/// A parsed dose descriptor, before its amount expression is evaluated
/// against a subject's covariates.
///
/// Descriptors follow the textual form
///
/// ```text
/// name; via; kind t=<spec> d=<expr>; tunit; dunit[; tlag=<v>|tlag][; bioavailability=<v>|bioavailability]
/// ```
///
/// where `kind` is `bolus` (`t=<t0>`), `repeated_bolus` (`t=<t0>:<every>:<tF>`)
/// or `infusion` (`t=<t0>:<tF>`). For an infusion `d=` gives the rate in
/// amount per time unit. A bare `tlag` or `bioavailability` token marks the
/// parameter as free for the optimizer instead of fixing its value.
///
/// ```
/// use pkfit::data::dose::DoseDescriptor;
///
/// let dose = DoseDescriptor::parse("Dose1; iv; bolus t=0 d=60*$(weight)/1000; min; mg").unwrap();
/// assert_eq!(dose.name(), "Dose1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseDescriptor {
    name: String,
    route: Route,
    schedule: DoseSchedule,
    amount: AmountExpr,
    time_unit: Unit,
    dose_unit: Unit,
    tlag: f64,
    bioavailability: f64,
    free_parameters: Vec<DoseParameter>,
}

impl DoseDescriptor {
    /// Parse a dose descriptor. Malformed descriptors are rejected, never
    /// defaulted.
    pub fn parse(descriptor: &str) -> Result<Self, DoseError> {
        let fail = |reason: &str| DoseError::Parse {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        };

        let tokens: Vec<&str> = descriptor.split(';').map(|t| t.trim()).collect();
        if tokens.len() < 5 {
            return Err(fail("expected at least 5 fields"));
        }

        let name = tokens[0].to_string();
        if name.is_empty() {
            return Err(fail("empty dose name"));
        }

        let route = Route::parse(tokens[1]).ok_or_else(|| fail("unrecognized route"))?;

        // kind field: "<kind> t=<spec> d=<expr>"
        let kind_tokens: Vec<&str> = tokens[2].split_whitespace().collect();
        if kind_tokens.len() != 3 {
            return Err(fail("dose kind field must be '<kind> t=<spec> d=<expr>'"));
        }
        let time_spec = kind_tokens[1]
            .strip_prefix("t=")
            .ok_or_else(|| fail("missing t= in dose kind"))?;
        let amount_spec = kind_tokens[2]
            .strip_prefix("d=")
            .ok_or_else(|| fail("missing d= in dose kind"))?;

        let parse_time = |s: &str| {
            s.trim()
                .parse::<f64>()
                .map_err(|_| fail("invalid time value"))
        };
        let schedule = match kind_tokens[0] {
            "bolus" => DoseSchedule::Bolus {
                time: parse_time(time_spec)?,
            },
            "repeated_bolus" => {
                let parts: Vec<&str> = time_spec.split(':').collect();
                if parts.len() != 3 {
                    return Err(fail("repeated_bolus expects t=<t0>:<every>:<tF>"));
                }
                let every = parse_time(parts[1])?;
                if every <= 0.0 {
                    return Err(DoseError::InvalidRepeat);
                }
                DoseSchedule::RepeatedBolus {
                    start: parse_time(parts[0])?,
                    every,
                    end: parse_time(parts[2])?,
                }
            }
            "infusion" => {
                let parts: Vec<&str> = time_spec.split(':').collect();
                if parts.len() != 2 {
                    return Err(fail("infusion expects t=<t0>:<tF>"));
                }
                DoseSchedule::Infusion {
                    start: parse_time(parts[0])?,
                    end: parse_time(parts[1])?,
                }
            }
            _ => return Err(fail("unrecognized dose kind")),
        };

        let amount = AmountExpr::parse(amount_spec)?;

        let time_unit = Unit::parse(tokens[3])?;
        if !time_unit.is_time() {
            return Err(DoseError::UnsupportedTimeUnit);
        }
        let dose_unit = Unit::parse(tokens[4])?;
        if !dose_unit.is_mass() {
            return Err(DoseError::UnsupportedDoseUnit);
        }

        let mut dose = DoseDescriptor {
            name,
            route,
            schedule,
            amount,
            time_unit,
            dose_unit,
            tlag: 0.0,
            bioavailability: 1.0,
            free_parameters: Vec::new(),
        };

        for token in &tokens[5..] {
            if let Some((key, value)) = token.split_once('=') {
                let value: f64 = value
                    .trim()
                    .parse()
                    .map_err(|_| fail("invalid optional parameter value"))?;
                match key.trim() {
                    "tlag" => dose.tlag = value,
                    "bioavailability" => dose.bioavailability = value,
                    _ => return Err(fail("unrecognized optional parameter")),
                }
            } else {
                match *token {
                    "tlag" => dose.free_parameters.push(DoseParameter::Tlag),
                    "bioavailability" => {
                        dose.free_parameters.push(DoseParameter::Bioavailability)
                    }
                    "" => {}
                    _ => return Err(fail("unrecognized optional token")),
                }
            }
        }

        if dose.tlag < 0.0 {
            return Err(fail("tlag must be non-negative"));
        }
        if !(0.0..=1.0).contains(&dose.bioavailability) {
            return Err(fail("bioavailability must lie in [0,1]"));
        }

        dose.normalize_time_units();
        Ok(dose)
    }

    /// Rescale hour-based timing fields to minutes. All downstream
    /// computation assumes minutes.
    fn normalize_time_units(&mut self) {
        if self.time_unit == Unit::Hour {
            self.schedule.scale_times(60.0);
            self.tlag *= 60.0;
            self.time_unit = Unit::Minute;
        }
    }

    /// Evaluate the amount expression against a subject's covariates,
    /// producing a concrete [`Dose`].
    pub fn interpret(&self, covariates: &Covariates) -> Result<Dose, DoseError> {
        let amount = self.amount.evaluate(covariates)?;
        Ok(Dose {
            name: self.name.clone(),
            route: self.route,
            schedule: self.schedule.clone(),
            amount,
            tlag: self.tlag,
            bioavailability: self.bioavailability,
            free_parameters: self.free_parameters.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn schedule(&self) -> &DoseSchedule {
        &self.schedule
    }

    pub fn free_parameters(&self) -> &[DoseParameter] {
        &self.free_parameters
    }
}

/// A concrete dose with its amount resolved to a number.
///
/// Repeated boluses are expanded into independent [`Dose`] instances (one
/// per occurrence inside the simulation window) before a drug source
/// queries them; expansion is a pure transformation of the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dose {
    name: String,
    route: Route,
    schedule: DoseSchedule,
    amount: f64,
    tlag: f64,
    bioavailability: f64,
    free_parameters: Vec<DoseParameter>,
}

impl Dose {
    /// Build a single bolus dose directly, bypassing descriptor parsing.
    pub fn bolus(name: &str, route: Route, time: f64, amount: f64) -> Self {
        Dose {
            name: name.to_string(),
            route,
            schedule: DoseSchedule::Bolus { time },
            amount,
            tlag: 0.0,
            bioavailability: 1.0,
            free_parameters: Vec::new(),
        }
    }

    /// Build an infusion dose directly. `rate` is the amount administered
    /// per time unit.
    pub fn infusion(name: &str, route: Route, start: f64, end: f64, rate: f64) -> Self {
        Dose {
            name: name.to_string(),
            route,
            schedule: DoseSchedule::Infusion { start, end },
            amount: rate,
            tlag: 0.0,
            bioavailability: 1.0,
            free_parameters: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn schedule(&self) -> &DoseSchedule {
        &self.schedule
    }

    /// The resolved amount (for an infusion, the rate)
    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn tlag(&self) -> f64 {
        self.tlag
    }

    pub fn set_tlag(&mut self, tlag: f64) {
        self.tlag = tlag;
    }

    pub fn bioavailability(&self) -> f64 {
        self.bioavailability
    }

    pub fn set_bioavailability(&mut self, f: f64) {
        self.bioavailability = f;
    }

    pub fn free_parameters(&self) -> &[DoseParameter] {
        &self.free_parameters
    }

    /// Whether this dose is a single bolus at time zero
    pub fn is_initial_bolus(&self) -> bool {
        matches!(self.schedule, DoseSchedule::Bolus { time } if time == 0.0)
    }

    /// Drug mass physically administered during `[t0, t0+dt)` under the
    /// external clock, before lag and bioavailability.
    ///
    /// A bolus is a point mass: it is counted in exactly the window that
    /// contains its administration time (half-open, ties to the left). An
    /// infusion contributes `rate * overlap` with `[start, end]`.
    pub fn amount_delivered_during(&self, t0: f64, dt: f64) -> f64 {
        let t1 = t0 + dt;
        match self.schedule {
            DoseSchedule::Bolus { time } => {
                if t0 <= time && time < t1 {
                    self.amount
                } else {
                    0.0
                }
            }
            DoseSchedule::RepeatedBolus { .. } => self
                .schedule
                .occurrence_times()
                .iter()
                .filter(|&&t| t0 <= t && t < t1)
                .map(|_| self.amount)
                .sum(),
            DoseSchedule::Infusion { start, end } => {
                if t0 > end || t1 < start {
                    0.0
                } else {
                    let left = t0.max(start);
                    let right = t1.min(end);
                    self.amount * (right - left)
                }
            }
        }
    }

    /// Pharmacologically active drug release during `[t0, t0+dt)`,
    /// applying lag and bioavailability.
    ///
    /// Intravenous doses release exactly what is delivered (lag-shifted and
    /// scaled by bioavailability). Extravascular doses release through the
    /// given absorption profile: the increment of the cumulative-absorbed
    /// curve over the window, clamped to be non-negative to guard against
    /// overshoot of the saturating forms. An extravascular infusion has no
    /// defined release through a profile and fails loudly.
    pub fn amount_released_during(
        &self,
        t0: f64,
        dt: f64,
        profile: Option<&AbsorptionModel>,
    ) -> Result<f64, DoseError> {
        let released = match profile {
            None => self.bioavailability * self.amount_delivered_during(t0 - self.tlag, dt),
            Some(model) => {
                if matches!(self.schedule, DoseSchedule::Infusion { .. }) {
                    return Err(DoseError::InfusionThroughProfile);
                }
                let mut total = 0.0;
                for dose_time in self.schedule.occurrence_times() {
                    let rel = t0 - dose_time - self.tlag;
                    let increment = model.cumulative_absorbed(rel + dt, self.amount)
                        - model.cumulative_absorbed(rel, self.amount);
                    total += self.bioavailability * increment;
                }
                total
            }
        };
        Ok(released.max(0.0))
    }

    /// Expand this dose into standalone boluses over the closed window
    /// `[window_start, window_end]`.
    ///
    /// A repeated bolus yields one bolus per occurrence inside the window,
    /// each carrying a copy of the original's route, lag and
    /// bioavailability; any other dose is returned unchanged. The right
    /// window edge is inclusive.
    pub fn expand_into_window(&self, window_start: f64, window_end: f64) -> Vec<Dose> {
        match self.schedule {
            DoseSchedule::RepeatedBolus { .. } => self
                .schedule
                .occurrence_times()
                .into_iter()
                .filter(|&t| window_start - TIME_EPS <= t && t <= window_end + TIME_EPS)
                .map(|t| {
                    let mut dose = self.clone();
                    dose.schedule = DoseSchedule::Bolus { time: t };
                    dose
                })
                .collect(),
            _ => vec![self.clone()],
        }
    }
}

impl Parametric for Dose {
    fn parameter_names(&self) -> Vec<String> {
        self.free_parameters
            .iter()
            .map(|p| format!("{}_{}", self.name, p.name()))
            .collect()
    }

    fn parameter_units(&self) -> Vec<Unit> {
        self.free_parameters.iter().map(|p| p.unit()).collect()
    }

    fn parameters(&self) -> Vec<f64> {
        self.free_parameters
            .iter()
            .map(|p| match p {
                DoseParameter::Tlag => self.tlag,
                DoseParameter::Bioavailability => self.bioavailability,
            })
            .collect()
    }

    fn set_parameters(&mut self, p: &[f64]) {
        for (parameter, &value) in self.free_parameters.clone().iter().zip(p) {
            match parameter {
                DoseParameter::Tlag => self.tlag = value,
                DoseParameter::Bioavailability => self.bioavailability = value,
            }
        }
    }

    fn are_parameters_valid(&self, p: &[f64]) -> bool {
        self.free_parameters
            .iter()
            .zip(p)
            .all(|(parameter, &value)| match parameter {
                DoseParameter::Tlag => value >= 0.0,
                DoseParameter::Bioavailability => (0.0..=1.0).contains(&value),
            })
    }

    fn are_parameters_significant(&self, lower: &[f64], upper: &[f64]) -> Vec<Significance> {
        self.free_parameters
            .iter()
            .zip(lower.iter().zip(upper))
            .map(|(parameter, (&lo, &hi))| match parameter {
                // A lag is real if its interval excludes zero from above
                DoseParameter::Tlag => {
                    if lo > 0.0 {
                        Significance::Significant
                    } else {
                        Significance::NotSignificant
                    }
                }
                // Bioavailability is informative if its interval excludes 1
                DoseParameter::Bioavailability => {
                    if hi < 1.0 {
                        Significance::Significant
                    } else {
                        Significance::NotSignificant
                    }
                }
            })
            .collect()
    }
}

impl fmt::Display for Dose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let timing = match self.schedule {
            DoseSchedule::Bolus { time } => format!("bolus t={}", time),
            DoseSchedule::RepeatedBolus { start, every, end } => {
                format!("repeated_bolus t={}:{}:{}", start, every, end)
            }
            DoseSchedule::Infusion { start, end } => format!("infusion t={}:{}", start, end),
        };
        write!(
            f,
            "{}; {}; {} d={}; tlag={}; bioavailability={}",
            self.name, self.route, timing, self.amount, self.tlag, self.bioavailability
        )
    }
}
