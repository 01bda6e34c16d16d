//! YIN pitch estimator.
//!
//! de Cheveigné & Kawahara (2002), "YIN, a fundamental frequency estimator
//! for speech and music". Steps 2–5 of the paper: difference function,
//! cumulative mean normalization, absolute threshold, parabolic refinement.

use super::pitch::{search_dip, EstimationError, EstimatorSettings, PitchEstimate, PitchEstimator};

pub struct Yin {
    settings: EstimatorSettings,
}

impl Yin {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self { settings }
    }
}

impl PitchEstimator for Yin {
    fn name(&self) -> &'static str {
        "yin"
    }

    fn estimate(&self, frame: &[f32], sample_rate: u32) -> Result<PitchEstimate, EstimationError> {
        let range = self.settings.prepare(frame, sample_rate)?;
        if self.settings.is_silent(frame) {
            return Ok(PitchEstimate::UNVOICED);
        }

        // Every lag is compared over the same span
        let span = frame.len() - range.max;
        let mut running_sum = 0.0_f64;

        Ok(search_dip(range, self.settings.tolerance, sample_rate, |tau| {
            let d = difference(frame, tau, span);
            running_sum += d;
            if running_sum > 0.0 {
                d * tau as f64 / running_sum
            } else {
                1.0
            }
        }))
    }
}

/// d(τ) = Σ (x[j] − x[j+τ])² over j in 0..span
fn difference(frame: &[f32], tau: usize, span: usize) -> f64 {
    frame[..span]
        .iter()
        .zip(&frame[tau..tau + span])
        .map(|(&a, &b)| {
            let diff = a as f64 - b as f64;
            diff * diff
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::pitch::tests::sine;

    fn detector() -> Yin {
        Yin::new(EstimatorSettings::default())
    }

    fn assert_close(freq: f32, sample_rate: u32) {
        let frame = sine(freq, sample_rate, 4096, 0.8);
        let est = detector().estimate(&frame, sample_rate).unwrap();
        let error = ((est.frequency - freq) / freq).abs();
        assert!(
            error < 0.01,
            "detected {} Hz for {} Hz at {} Hz ({:.3}%)",
            est.frequency,
            freq,
            sample_rate,
            error * 100.0
        );
        assert!(est.confidence > 0.5, "confidence {} for {} Hz", est.confidence, freq);
    }

    #[test]
    fn a440_at_44100() {
        assert_close(440.0, 44100);
    }

    #[test]
    fn low_and_high_ends_of_range() {
        assert_close(82.41, 44100);
        assert_close(196.0, 48000);
        assert_close(880.0, 44100);
    }

    #[test]
    fn other_sample_rates() {
        assert_close(300.0, 16000);
        assert_close(523.25, 22050);
    }

    #[test]
    fn pure_tone_is_high_confidence() {
        let frame = sine(440.0, 44100, 4096, 0.5);
        let est = detector().estimate(&frame, 44100).unwrap();
        assert!(est.confidence > 0.9);
    }

    #[test]
    fn silence_has_no_confidence() {
        let est = detector().estimate(&vec![0.0; 4096], 44100).unwrap();
        assert_eq!(est, PitchEstimate::UNVOICED);
    }

    #[test]
    fn dc_offset_is_not_a_pitch() {
        let est = detector().estimate(&vec![0.5; 4096], 44100).unwrap();
        assert!(!est.is_voiced() || est.confidence < 0.5);
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let frame = sine(311.13, 44100, 4096, 0.3);
        let yin = detector();
        let a = yin.estimate(&frame, 44100).unwrap();
        let b = yin.estimate(&frame, 44100).unwrap();
        assert_eq!(a.frequency.to_bits(), b.frequency.to_bits());
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
    }

    #[test]
    fn non_finite_sample_is_an_error() {
        let mut frame = sine(440.0, 44100, 4096, 0.5);
        frame[100] = f32::INFINITY;
        assert_eq!(
            detector().estimate(&frame, 44100),
            Err(EstimationError::NonFiniteSample { index: 100 })
        );
    }

    #[test]
    fn difference_is_zero_at_the_period() {
        // Period of exactly 8 samples
        let frame: Vec<f32> = (0..64).map(|i| [0.0, 1.0, 0.0, -1.0, 0.5, 0.2, -0.3, 0.1][i % 8]).collect();
        assert_eq!(difference(&frame, 8, 32), 0.0);
        assert!(difference(&frame, 3, 32) > 0.0);
    }
}
