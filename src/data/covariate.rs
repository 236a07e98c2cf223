use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Named subject covariates (e.g. body weight) used by dose amount
/// expressions.
///
/// Covariates are constant over the course of one sample; there is no
/// time interpolation. Values are keyed by name and looked up when a dose
/// amount expression is evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Covariates {
    values: BTreeMap<String, f64>,
}

impl Covariates {
    /// Create an empty covariate set
    pub fn new() -> Self {
        Covariates {
            values: BTreeMap::new(),
        }
    }

    /// Insert or replace a covariate value
    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    /// Look up a covariate by name
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Number of covariates
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (name, value) pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for Covariates {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Covariates {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Covariates {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut covariates = Covariates::new();
        covariates.insert("weight", 70.0);
        assert_eq!(covariates.get("weight"), Some(70.0));
        assert_eq!(covariates.get("height"), None);
        assert_eq!(covariates.len(), 1);
    }

    #[test]
    fn test_from_iterator() {
        let covariates: Covariates = vec![("weight".to_string(), 70.0), ("age".to_string(), 40.0)]
            .into_iter()
            .collect();
        assert_eq!(covariates.len(), 2);
        assert_eq!(covariates.get("age"), Some(40.0));
    }
}
