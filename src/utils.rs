//! Utility functions shared across the pipeline stages.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::OnceLock;

use crate::{Error, Result};

/// Validate that a position is finite in both coordinates.
pub fn validate_position(x: f64, y: f64) -> Result<[f64; 2]> {
    if !x.is_finite() || !y.is_finite() {
        return Err(Error::InvalidObservation(format!(
            "position must be finite, got ({}, {})",
            x, y
        )));
    }
    Ok([x, y])
}

/// Global set of warned messages (for warn_once).
static WARNED_MESSAGES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// Emit a warning only once per process.
///
/// Subsequent calls with the same message are ignored.
pub fn warn_once(message: &str) {
    let warned = WARNED_MESSAGES.get_or_init(|| Mutex::new(HashSet::new()));
    let mut guard = match warned.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if guard.insert(message.to_string()) {
        tracing::warn!("{}", message);
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator), `None` for fewer than 2 values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Check whether `value` is a positive finite number.
pub fn is_positive_finite(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_validate_position() {
        assert_eq!(validate_position(1.0, 2.0).unwrap(), [1.0, 2.0]);
        assert!(validate_position(f64::NAN, 2.0).is_err());
        assert!(validate_position(1.0, f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_relative_eq!(mean(&[1.0, 2.0, 3.0]).unwrap(), 2.0);
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[1.0]), None);
        // Sample (n - 1) std of this set is 2.138...
        let s = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_relative_eq!(s, 2.138089935299395, epsilon = 1e-12);
    }

    #[test]
    fn test_is_positive_finite() {
        assert!(is_positive_finite(0.5));
        assert!(!is_positive_finite(0.0));
        assert!(!is_positive_finite(f64::INFINITY));
        assert!(!is_positive_finite(f64::NAN));
    }
}
