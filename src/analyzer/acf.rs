//! Normalized autocorrelation estimator.
//!
//! Dissimilarity at lag τ is `1 − r(τ)`, where `r` is the Pearson-style
//! correlation between the frame and itself shifted by τ, so a perfectly
//! periodic frame reaches 0 at its period just like YIN.

use super::pitch::{search_dip, EstimationError, EstimatorSettings, PitchEstimate, PitchEstimator};

pub struct Autocorrelation {
    settings: EstimatorSettings,
}

impl Autocorrelation {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self { settings }
    }
}

impl PitchEstimator for Autocorrelation {
    fn name(&self) -> &'static str {
        "acf"
    }

    fn estimate(&self, frame: &[f32], sample_rate: u32) -> Result<PitchEstimate, EstimationError> {
        let range = self.settings.prepare(frame, sample_rate)?;
        if self.settings.is_silent(frame) {
            return Ok(PitchEstimate::UNVOICED);
        }

        let span = frame.len() - range.max;
        let head = &frame[..span];
        let head_energy = energy(head);
        // The main lobe around lag 0 is always highly correlated; lags only
        // become candidates once the correlation has gone negative.
        let mut past_main_lobe = false;

        Ok(search_dip(range, self.settings.tolerance, sample_rate, |tau| {
            let tail = &frame[tau..tau + span];
            let denom = (head_energy * energy(tail)).sqrt();
            if denom <= f64::EPSILON {
                return 1.0;
            }
            let r = (head
                .iter()
                .zip(tail)
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum::<f64>()
                / denom)
                .clamp(-1.0, 1.0);
            if !past_main_lobe {
                past_main_lobe = r < 0.0;
                return (1.0 - r).max(1.0);
            }
            1.0 - r
        }))
    }
}

fn energy(samples: &[f32]) -> f64 {
    samples.iter().map(|&s| s as f64 * s as f64).sum()
}
