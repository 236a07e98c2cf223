use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::expression::ExpressionError;

/// Physical unit tag attached to a parameter for display and consistency
/// checks.
///
/// Units never take part in numeric computation inside the fit; all values
/// are assumed to be normalized upstream (times to minutes, amounts to
/// milligrams). The tags travel with fitted parameters so that reports can
/// label them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Dimensionless quantity (fractions, ratios, exponents)
    None,
    /// Minutes
    Minute,
    /// Hours
    Hour,
    /// Inverse minutes (rate constants)
    PerMinute,
    /// Milligrams
    Milligram,
    /// Milligrams per minute (zero-order input rates)
    MilligramPerMinute,
    /// Liters (distribution volumes)
    Liter,
    /// Liters per minute (clearances)
    LiterPerMinute,
    /// Concentration, milligrams per liter
    MilligramPerLiter,
}

impl Unit {
    /// Parse a unit token as it appears in dose descriptors and unit specs.
    pub fn parse(token: &str) -> Result<Self, ExpressionError> {
        let unit = match token.trim() {
            "none" | "" => Unit::None,
            "min" => Unit::Minute,
            "h" => Unit::Hour,
            "1/min" => Unit::PerMinute,
            "mg" => Unit::Milligram,
            "mg/min" => Unit::MilligramPerMinute,
            "L" => Unit::Liter,
            "L/min" => Unit::LiterPerMinute,
            "mg/L" => Unit::MilligramPerLiter,
            other => {
                return Err(ExpressionError::UnknownUnit {
                    token: other.to_string(),
                })
            }
        };
        Ok(unit)
    }

    /// Whether this tag denotes a time quantity
    pub fn is_time(&self) -> bool {
        matches!(self, Unit::Minute | Unit::Hour)
    }

    /// Whether this tag denotes a drug mass
    pub fn is_mass(&self) -> bool {
        matches!(self, Unit::Milligram)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Unit::None => "none",
            Unit::Minute => "min",
            Unit::Hour => "h",
            Unit::PerMinute => "1/min",
            Unit::Milligram => "mg",
            Unit::MilligramPerMinute => "mg/min",
            Unit::Liter => "L",
            Unit::LiterPerMinute => "L/min",
            Unit::MilligramPerLiter => "mg/L",
        };
        write!(f, "{}", s)
    }
}

/// Parse a units specification: a semicolon-separated list of unit tokens,
/// one per free parameter, in the declared parameter order.
///
/// The caller checks the count against the parameter list; a count mismatch
/// is a configuration error, not tolerated silently.
pub fn parse_units_spec(spec: &str) -> Result<Vec<Unit>, ExpressionError> {
    spec.split(';').map(Unit::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for token in ["min", "h", "1/min", "mg", "mg/min", "L", "L/min", "mg/L"] {
            let unit = Unit::parse(token).unwrap();
            assert_eq!(unit.to_string(), token);
        }
    }

    #[test]
    fn test_unknown_unit_rejected() {
        assert!(Unit::parse("furlongs").is_err());
    }

    #[test]
    fn test_units_spec() {
        let units = parse_units_spec("min;L/min;L").unwrap();
        assert_eq!(units, vec![Unit::Minute, Unit::LiterPerMinute, Unit::Liter]);
    }

    #[test]
    fn test_time_and_mass_predicates() {
        assert!(Unit::Hour.is_time());
        assert!(Unit::Milligram.is_mass());
        assert!(!Unit::Liter.is_time());
    }
}
