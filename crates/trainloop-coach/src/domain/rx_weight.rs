//! Prescribed training weight from personal-record history.
//!
//! Each logged PR set is converted to an estimated one-rep max with the
//! Epley formula (`weight * (1 + reps/30)`), the estimates are averaged to
//! smooth out single outlier sessions, and the prescription is a percentage
//! of that average rounded to the nearest plate increment.

use serde::{Deserialize, Serialize};

/// Smallest load increment a gym can actually set up, in kilograms.
pub const PLATE_INCREMENT_KG: f64 = 2.5;

/// One logged personal-record set for an exercise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrSample {
    /// Weight lifted, in kilograms.
    pub weight_kg: f64,
    /// Reps completed at that weight.
    pub reps: u32,
}

impl PrSample {
    /// Epley estimated one-rep max. A single-rep set is its own max.
    pub fn estimated_one_rep_max(&self) -> f64 {
        self.weight_kg * (1.0 + f64::from(self.reps) / 30.0)
    }
}

/// Round a raw weight to the nearest loadable increment.
pub fn round_to_increment(weight_kg: f64) -> f64 {
    (weight_kg / PLATE_INCREMENT_KG).round() * PLATE_INCREMENT_KG
}

/// Prescribed working weight: average estimated 1RM across the samples,
/// scaled by the target intensity, rounded to the plate increment.
///
/// Returns `None` when there is no history to prescribe from or the
/// intensity is out of the sensible (0, 1] range.
pub fn prescribe(samples: &[PrSample], intensity: f64) -> Option<f64> {
    if samples.is_empty() || !(0.0..=1.0).contains(&intensity) || intensity == 0.0 {
        return None;
    }
    let sum: f64 = samples.iter().map(PrSample::estimated_one_rep_max).sum();
    let average_max = sum / samples.len() as f64;
    Some(round_to_increment(average_max * intensity))
}
