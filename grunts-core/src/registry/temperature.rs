//! Temperature Constraint — the allowed shape of the sampling-temperature
//! parameter for a specific model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemperatureConstraint {
    /// A single allowed value; any other request is corrected to it.
    Fixed(f32),
    /// A closed interval `[lo, hi]` with a default.
    Range { lo: f32, hi: f32, default: f32 },
    /// A finite, sorted set of admissible values with a default.
    Discrete { values: Vec<f32>, default: f32 },
}

impl TemperatureConstraint {
    pub fn validate(&self, t: f32) -> bool {
        match self {
            TemperatureConstraint::Fixed(v) => (t - v).abs() < f32::EPSILON,
            TemperatureConstraint::Range { lo, hi, .. } => t >= *lo && t <= *hi,
            TemperatureConstraint::Discrete { values, .. } => {
                values.iter().any(|v| (t - v).abs() < f32::EPSILON)
            }
        }
    }

    /// Nearest admissible value. Discrete ties break to the lower value.
    pub fn correct(&self, t: f32) -> f32 {
        match self {
            TemperatureConstraint::Fixed(v) => *v,
            TemperatureConstraint::Range { lo, hi, .. } => t.clamp(*lo, *hi),
            TemperatureConstraint::Discrete { values, default } => values
                .iter()
                .copied()
                .min_by(|a, b| {
                    let da = (a - t).abs();
                    let db = (b - t).abs();
                    da.partial_cmp(&db)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                })
                .unwrap_or(*default),
        }
    }

    pub fn default(&self) -> f32 {
        match self {
            TemperatureConstraint::Fixed(v) => *v,
            TemperatureConstraint::Range { default, .. } => *default,
            TemperatureConstraint::Discrete { default, .. } => *default,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TemperatureConstraint::Fixed(v) => format!("Only supports temperature={v}"),
            TemperatureConstraint::Range { lo, hi, .. } => {
                format!("Supports temperature in [{lo}, {hi}]")
            }
            TemperatureConstraint::Discrete { values, .. } => {
                format!("Supports temperature in {{{}}}", values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", "))
            }
        }
    }

    /// Resolve a requested temperature per §4.B: absent uses the default,
    /// an invalid value is corrected and a warning string is produced
    /// (never an error — temperature correction never fails the request).
    pub fn resolve(&self, requested: Option<f32>) -> (f32, Option<String>) {
        match requested {
            None => (self.default(), None),
            Some(t) if self.validate(t) => (t, None),
            Some(t) => {
                let corrected = self.correct(t);
                (corrected, Some(self.describe()))
            }
        }
    }
}
