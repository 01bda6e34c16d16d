//! Per-frame fundamental frequency estimation.
//!
//! Estimators are stateless apart from their settings: the same frame and
//! sample rate always produce the same [`PitchEstimate`]. Both algorithms
//! reduce a frame to a dissimilarity curve over candidate lags, then share
//! the tolerance-driven dip search in [`search_dip`].

use crate::config::PitchConfig;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::acf::Autocorrelation;
use super::yin::Yin;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    #[error("frame has {got} samples, expected {expected}")]
    FrameLength { expected: usize, got: usize },
    #[error("non-finite sample at offset {index}")]
    NonFiniteSample { index: usize },
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),
    #[error("no candidate lags between {min_frequency} and {max_frequency} Hz at {sample_rate} Hz")]
    EmptyLagRange {
        sample_rate: u32,
        min_frequency: f32,
        max_frequency: f32,
    },
}

/// Result for one frame. `frequency == 0.0` means unvoiced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Hz, always `>= 0`.
    pub frequency: f32,
    /// Certainty in `[0, 1]`.
    pub confidence: f32,
}

impl PitchEstimate {
    pub const UNVOICED: PitchEstimate = PitchEstimate {
        frequency: 0.0,
        confidence: 0.0,
    };

    pub fn is_voiced(&self) -> bool {
        self.frequency > 0.0
    }
}

/// Estimates the fundamental of a single frame.
pub trait PitchEstimator: Send + Sync {
    /// Algorithm name as accepted on the command line.
    fn name(&self) -> &'static str;

    fn estimate(&self, frame: &[f32], sample_rate: u32) -> Result<PitchEstimate, EstimationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchAlgorithm {
    /// Cumulative mean normalized difference (de Cheveigné & Kawahara).
    Yin,
    /// Normalized autocorrelation.
    Acf,
}

impl FromStr for PitchAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yin" => Ok(Self::Yin),
            "acf" => Ok(Self::Acf),
            other => Err(format!("unknown pitch algorithm '{}' (expected yin or acf)", other)),
        }
    }
}

impl fmt::Display for PitchAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Yin => "yin",
            Self::Acf => "acf",
        })
    }
}

/// Unit of the `Pitch` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchUnit {
    #[serde(alias = "Hz", alias = "HZ")]
    Hz,
    Midi,
    Cent,
    /// Spectral bin index of a `window`-point transform.
    Bin,
}

impl PitchUnit {
    /// Convert a frequency in Hz. Unvoiced (0 Hz) stays 0 in every unit.
    pub fn convert(self, hz: f32, sample_rate: u32, window: usize) -> f32 {
        if hz <= 0.0 {
            return 0.0;
        }
        match self {
            Self::Hz => hz,
            Self::Midi => hz_to_midi(hz),
            Self::Cent => hz_to_midi(hz) * 100.0,
            Self::Bin => {
                if sample_rate == 0 {
                    0.0
                } else {
                    hz * window as f32 / sample_rate as f32
                }
            }
        }
    }
}

fn hz_to_midi(hz: f32) -> f32 {
    69.0 + 12.0 * (hz / 440.0).log2()
}

impl FromStr for PitchUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hz" | "freq" => Ok(Self::Hz),
            "midi" => Ok(Self::Midi),
            "cent" | "cents" => Ok(Self::Cent),
            "bin" => Ok(Self::Bin),
            other => Err(format!("unknown unit '{}' (expected hz, midi, cent or bin)", other)),
        }
    }
}

impl fmt::Display for PitchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hz => "Hz",
            Self::Midi => "midi",
            Self::Cent => "cent",
            Self::Bin => "bin",
        })
    }
}

/// Settings shared by every estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorSettings {
    pub window_size: usize,
    pub tolerance: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
    pub silence_db: f32,
}

impl From<&PitchConfig> for EstimatorSettings {
    fn from(config: &PitchConfig) -> Self {
        Self {
            window_size: config.window_size,
            tolerance: config.tolerance,
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            silence_db: config.silence_db,
        }
    }
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self::from(&PitchConfig::default())
    }
}

/// Inclusive range of candidate periods, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagRange {
    pub min: usize,
    pub max: usize,
}

impl EstimatorSettings {
    /// Validate a frame and derive the lag range for its sample rate.
    ///
    /// The longest lag is capped at half the window so every lag is compared
    /// over the same number of samples.
    pub fn prepare(&self, frame: &[f32], sample_rate: u32) -> Result<LagRange, EstimationError> {
        if frame.len() != self.window_size {
            return Err(EstimationError::FrameLength {
                expected: self.window_size,
                got: frame.len(),
            });
        }
        if sample_rate == 0 {
            return Err(EstimationError::InvalidSampleRate(sample_rate));
        }
        if let Some(index) = frame.iter().position(|s| !s.is_finite()) {
            return Err(EstimationError::NonFiniteSample { index });
        }

        let sr = sample_rate as f32;
        let min = ((sr / self.max_frequency).floor() as usize).max(2);
        let max = ((sr / self.min_frequency).ceil() as usize).min(self.window_size / 2);
        if min >= max {
            return Err(EstimationError::EmptyLagRange {
                sample_rate,
                min_frequency: self.min_frequency,
                max_frequency: self.max_frequency,
            });
        }
        Ok(LagRange { min, max })
    }

    /// Whether the frame's mean power falls below the silence gate.
    pub fn is_silent(&self, frame: &[f32]) -> bool {
        let power = frame.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / frame.len().max(1) as f64;
        power <= 0.0 || 10.0 * power.log10() < self.silence_db as f64
    }
}

/// Walk a dissimilarity curve over lags `1..=range.max`, computing it lazily.
///
/// The first lag at or past `range.min` whose dissimilarity drops below
/// `tolerance` starts a descent to the adjacent local minimum, which becomes
/// the period (refined by parabolic interpolation). Evaluation stops there.
/// When nothing dips below tolerance the frame is unvoiced and the confidence
/// reflects the best lag seen.
///
/// `measure` is called exactly once per lag, in increasing order, so it may
/// carry running state.
pub fn search_dip<F>(range: LagRange, tolerance: f32, sample_rate: u32, mut measure: F) -> PitchEstimate
where
    F: FnMut(usize) -> f64,
{
    let tolerance = tolerance as f64;
    // curve[0] is a placeholder so curve[tau] is the value at lag tau
    let mut curve = Vec::with_capacity(range.max + 1);
    curve.push(1.0_f64);
    let mut dip: Option<usize> = None;

    for tau in 1..=range.max {
        let value = measure(tau);
        curve.push(value);

        match dip {
            Some(best) if value < curve[best] => dip = Some(tau),
            Some(_) => break,
            None if tau >= range.min && value < tolerance => dip = Some(tau),
            None => {}
        }
    }

    let Some(tau) = dip else {
        let floor = curve[range.min..=range.max]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        return PitchEstimate {
            frequency: 0.0,
            confidence: (1.0 - floor).clamp(0.0, 1.0) as f32,
        };
    };

    let period = refine_period(&curve, tau);
    let frequency = sample_rate as f64 / period;
    if !frequency.is_finite() || frequency <= 0.0 {
        return PitchEstimate::UNVOICED;
    }

    PitchEstimate {
        frequency: frequency as f32,
        confidence: (1.0 - curve[tau]).clamp(0.0, 1.0) as f32,
    }
}

/// Parabolic interpolation of a minimum at `tau` using its neighbours.
fn refine_period(curve: &[f64], tau: usize) -> f64 {
    if tau < 2 || tau + 1 >= curve.len() {
        return tau as f64;
    }
    let (y0, y1, y2) = (curve[tau - 1], curve[tau], curve[tau + 1]);
    let denom = y0 - 2.0 * y1 + y2;
    if denom.abs() < 1e-12 {
        return tau as f64;
    }
    let offset = 0.5 * (y0 - y2) / denom;
    tau as f64 + offset.clamp(-1.0, 1.0)
}

/// Build the estimator named by the configuration.
pub fn build_estimator(config: &PitchConfig) -> Box<dyn PitchEstimator> {
    let settings = EstimatorSettings::from(config);
    match config.algorithm {
        PitchAlgorithm::Yin => Box::new(Yin::new(settings)),
        PitchAlgorithm::Acf => Box::new(Autocorrelation::new(settings)),
    }
}
