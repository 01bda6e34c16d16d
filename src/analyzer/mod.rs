pub mod acf;
pub mod decode;
pub mod frames;
pub mod pitch;
pub mod yin;

use crate::config::{ConfigError, PitchConfig};
use crossbeam_channel::unbounded;
use decode::{DecodeError, Decoder, NativeDecoder};
use frames::FrameSource;
use pitch::{EstimationError, PitchEstimate, PitchEstimator};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("frame {frame}: {source}")]
    Estimation {
        frame: usize,
        #[source]
        source: EstimationError,
    },
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl AnalyzeError {
    /// Short failure kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(DecodeError::UnsupportedFormat(_)) => "unsupported-format",
            Self::Decode(_) => "decode",
            Self::Estimation { .. } => "estimation",
            Self::Panicked(_) => "panic",
        }
    }
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// A decoded input file.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFile {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub duration_secs: f64,
}

impl AudioFile {
    /// Base file name, as written to the `File` column.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Every frame's estimate for one file, in frame order.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub file: AudioFile,
    pub estimates: Vec<PitchEstimate>,
}

/// Decodes one file, frames it and estimates every frame.
pub struct FileProcessor {
    decoder: Box<dyn Decoder>,
    estimator: Box<dyn PitchEstimator>,
    window_size: usize,
    hop_size: usize,
}

impl FileProcessor {
    /// Fails when the framing cannot produce frames: `window_size` below 2 or
    /// `hop_size` outside `1..=window_size`.
    pub fn new(
        decoder: Box<dyn Decoder>,
        estimator: Box<dyn PitchEstimator>,
        window_size: usize,
        hop_size: usize,
    ) -> Result<Self, ConfigError> {
        if window_size < 2 || hop_size == 0 || hop_size > window_size {
            return Err(ConfigError::Invalid(format!(
                "framing needs window >= 2 and hop in 1..=window (got window {}, hop {})",
                window_size, hop_size
            )));
        }
        Ok(Self {
            decoder,
            estimator,
            window_size,
            hop_size,
        })
    }

    /// Processor with the native decoder and the configured estimator.
    pub fn from_config(config: &PitchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::new(
            Box::new(NativeDecoder),
            pitch::build_estimator(config),
            config.window_size,
            config.hop_size,
        )
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Analyze one file. The first frame the estimator rejects fails the whole file.
    pub fn process_file(&self, path: &Path) -> Result<FileResult, AnalyzeError> {
        log::debug!(
            "Analyzing: {}",
            path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
        );

        let audio = self.decoder.decode(path)?;
        let file = AudioFile {
            path: path.to_path_buf(),
            sample_rate: audio.sample_rate,
            duration_secs: audio.duration_secs(),
        };

        let frames = FrameSource::new(audio.samples, audio.sample_rate, self.window_size, self.hop_size);
        let mut estimates = Vec::with_capacity(frames.len());
        for frame in frames {
            let estimate = self
                .estimator
                .estimate(&frame.samples, frame.sample_rate)
                .map_err(|source| AnalyzeError::Estimation {
                    frame: frame.index,
                    source,
                })?;
            estimates.push(estimate);
        }

        Ok(FileResult { file, estimates })
    }
}

/// What happened to one input file.
#[derive(Debug)]
pub enum FileOutcome {
    Done(FileResult),
    Failed(AnalyzeError),
    /// Never started because the run was interrupted.
    Skipped,
}

/// Delivered to the completion callback once per input file, in arrival order.
#[derive(Debug)]
pub struct Completion {
    pub path: PathBuf,
    /// Files finished so far, including this one.
    pub completed: usize,
    pub total: usize,
    pub outcome: FileOutcome,
}

impl Completion {
    /// One progress line for this file, or `None` for a file that never started.
    ///
    /// Failures name the file and the failure kind:
    /// `[2/5] FAILED wav/bad.wav (decode): Corrupt audio: ...`.
    pub fn status_line(&self) -> Option<String> {
        match &self.outcome {
            FileOutcome::Done(result) => Some(format!(
                "[{}/{}] {} ({} frames, {} Hz, {:.2}s)",
                self.completed,
                self.total,
                result.file.file_name(),
                result.estimates.len(),
                result.file.sample_rate,
                result.file.duration_secs,
            )),
            FileOutcome::Failed(e) => Some(format!(
                "[{}/{}] FAILED {} ({}): {}",
                self.completed,
                self.total,
                self.path.display(),
                e.kind(),
                e
            )),
            FileOutcome::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub discovered: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Analyze `files` on a pool of `jobs` workers.
///
/// Each file is one independent unit. Results are handed to `on_complete` on
/// the calling thread as they arrive, so the callback is the only place that
/// accumulates state. A failing or panicking file is reported and the rest of
/// the batch continues. Once `stop` is set, units that have not started are
/// reported as skipped while in-flight units run to completion.
pub fn analyze_files<F>(
    processor: Arc<FileProcessor>,
    files: &[PathBuf],
    jobs: usize,
    stop: &'static AtomicBool,
    mut on_complete: F,
) -> Result<BatchSummary, ScheduleError>
where
    F: FnMut(Completion),
{
    let start = Instant::now();
    let total = files.len();
    let jobs = jobs.max(1);

    log::info!("Analyzing {} files with {} workers", total, jobs);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("pitch-worker-{}", i))
        .build()?;

    let (tx, rx) = unbounded::<(PathBuf, FileOutcome)>();

    for path in files {
        let path = path.clone();
        let tx = tx.clone();
        if stop.load(Ordering::SeqCst) {
            // Receiver lives until every sender is gone
            tx.send((path, FileOutcome::Skipped)).ok();
            continue;
        }

        let processor = Arc::clone(&processor);
        pool.spawn(move || {
            let outcome = if stop.load(Ordering::SeqCst) {
                FileOutcome::Skipped
            } else {
                match catch_unwind(AssertUnwindSafe(|| processor.process_file(&path))) {
                    Ok(Ok(result)) => FileOutcome::Done(result),
                    Ok(Err(e)) => FileOutcome::Failed(e),
                    Err(payload) => FileOutcome::Failed(AnalyzeError::Panicked(panic_message(&payload))),
                }
            };
            // Receiver lives until every sender is gone
            tx.send((path, outcome)).ok();
        });
    }
    drop(tx);

    let mut summary = BatchSummary {
        discovered: total,
        processed: 0,
        failed: 0,
        skipped: 0,
        elapsed: Duration::ZERO,
    };

    for (completed, (path, outcome)) in rx.iter().enumerate() {
        match &outcome {
            FileOutcome::Done(_) => summary.processed += 1,
            FileOutcome::Failed(_) => summary.failed += 1,
            FileOutcome::Skipped => summary.skipped += 1,
        }
        on_complete(Completion {
            path,
            completed: completed + 1,
            total,
            outcome,
        });
    }

    summary.elapsed = start.elapsed();
    Ok(summary)
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::pitch::tests::sine;
    use super::decode::DecodedAudio;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pitchbatch-analyze-{}-{}", name, std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn processor() -> Arc<FileProcessor> {
        Arc::new(FileProcessor::from_config(&PitchConfig::default()).unwrap())
    }

    fn run(files: &[PathBuf], stop: &'static AtomicBool) -> (BatchSummary, Vec<Completion>) {
        let mut completions = Vec::new();
        let summary = analyze_files(processor(), files, 2, stop, |c| completions.push(c)).unwrap();
        (summary, completions)
    }

    static RUNNING: AtomicBool = AtomicBool::new(false);

    #[test]
    fn sine_file_end_to_end() {
        let dir = scratch_dir("sine");
        let path = dir.join("a440.wav");
        write_wav(&path, &sine(440.0, 44100, 88200, 0.5), 44100);

        let result = processor().process_file(&path).unwrap();
        assert_eq!(result.file.sample_rate, 44100);
        assert!((result.file.duration_secs - 2.0).abs() < 1e-9);
        assert_eq!(result.file.file_name(), "a440.wav");
        assert_eq!(result.estimates.len(), frames::frame_count(88200, 4096, 512));
        assert_eq!(result.estimates.len(), 166);

        for est in result.estimates.iter().filter(|e| e.confidence > 0.5) {
            assert!((est.frequency - 440.0).abs() < 5.0, "got {} Hz", est.frequency);
        }
        assert!(result.estimates.iter().all(|e| e.confidence > 0.5));
    }

    #[test]
    fn silent_file_has_no_confidence() {
        let dir = scratch_dir("silent");
        let path = dir.join("silence.wav");
        write_wav(&path, &vec![0.0; 44100], 44100);

        let result = processor().process_file(&path).unwrap();
        assert_eq!(result.estimates.len(), frames::frame_count(44100, 4096, 512));
        assert!(result.estimates.iter().all(|e| e.confidence < 0.01 && !e.is_voiced()));
    }

    #[test]
    fn non_finite_audio_fails_with_estimation_error() {
        let dir = scratch_dir("nan");
        let path = dir.join("nan.wav");
        let mut samples = sine(440.0, 44100, 10000, 0.5);
        samples[6000] = f32::NAN;
        write_wav(&path, &samples, 44100);

        let err = processor().process_file(&path).unwrap_err();
        assert_eq!(err.kind(), "estimation");
        // Frame 4 (starting at 2048) is the first to cover sample 6000
        assert!(matches!(err, AnalyzeError::Estimation { frame: 4, .. }));
    }

    #[test]
    fn corrupt_file_is_isolated() {
        let dir = scratch_dir("isolation");
        let good_a = dir.join("a.wav");
        let bad = dir.join("b.wav");
        let good_c = dir.join("c.wav");
        write_wav(&good_a, &sine(220.0, 22050, 8000, 0.5), 22050);
        std::fs::write(&bad, b"RIFF....garbage").unwrap();
        write_wav(&good_c, &sine(330.0, 22050, 8000, 0.5), 22050);

        let files = vec![good_a, bad.clone(), good_c];
        let (summary, completions) = run(&files, &RUNNING);

        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(completions.len(), 3);

        let failed: Vec<_> = completions
            .iter()
            .filter_map(|c| match &c.outcome {
                FileOutcome::Failed(e) => Some((c.path.clone(), e.kind())),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec![(bad, "decode")]);

        let mut counts: Vec<usize> = completions.iter().map(|c| c.completed).collect();
        counts.sort();
        assert_eq!(counts, vec![1, 2, 3]);
        assert!(completions.iter().all(|c| c.total == 3));
    }

    #[test]
    fn repeated_runs_agree() {
        let dir = scratch_dir("idempotent");
        let files: Vec<PathBuf> = [(196.0, "g3.wav"), (261.63, "c4.wav"), (0.0, "quiet.wav")]
            .iter()
            .map(|&(freq, name)| {
                let path = dir.join(name);
                let samples = if freq > 0.0 { sine(freq, 16000, 12000, 0.4) } else { vec![0.0; 12000] };
                write_wav(&path, &samples, 16000);
                path
            })
            .collect();

        let collect = || {
            let (_, completions) = run(&files, &RUNNING);
            let mut rows: Vec<(String, usize, u32, u32)> = Vec::new();
            for c in completions {
                if let FileOutcome::Done(result) = c.outcome {
                    let name = result.file.file_name();
                    for (i, e) in result.estimates.iter().enumerate() {
                        rows.push((name.clone(), i, e.frequency.to_bits(), e.confidence.to_bits()));
                    }
                }
            }
            rows.sort();
            rows
        };

        let first = collect();
        assert!(!first.is_empty());
        assert_eq!(first, collect());
    }

    #[test]
    fn interrupted_run_skips_everything() {
        static STOPPED: AtomicBool = AtomicBool::new(true);
        let dir = scratch_dir("stopped");
        let path = dir.join("a.wav");
        write_wav(&path, &sine(440.0, 44100, 5000, 0.5), 44100);

        let (summary, completions) = run(&[path.clone(), path], &STOPPED);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.processed, 0);
        assert!(completions.iter().all(|c| matches!(c.outcome, FileOutcome::Skipped)));
    }

    #[test]
    fn empty_batch() {
        let (summary, completions) = run(&[], &RUNNING);
        assert_eq!(summary.discovered, 0);
        assert_eq!(summary.processed, 0);
        assert!(completions.is_empty());
    }

    struct PanickingDecoder;

    impl Decoder for PanickingDecoder {
        fn decode(&self, path: &Path) -> Result<DecodedAudio, DecodeError> {
            if path.ends_with("boom.wav") {
                panic!("decoder exploded");
            }
            Ok(DecodedAudio {
                samples: vec![0.0; 100],
                sample_rate: 8000,
                channels: 1,
            })
        }
    }

    #[test]
    fn panicking_unit_does_not_abort_the_pool() {
        let config = PitchConfig::default();
        let processor = Arc::new(FileProcessor::new(
            Box::new(PanickingDecoder),
            pitch::build_estimator(&config),
            config.window_size,
            config.hop_size,
        )
        .unwrap());
        let files = vec![PathBuf::from("ok.wav"), PathBuf::from("boom.wav")];

        let mut failures = Vec::new();
        let summary = analyze_files(processor, &files, 2, &RUNNING, |c| {
            if let FileOutcome::Failed(e) = c.outcome {
                failures.push(e);
            }
        })
        .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind(), "panic");
        assert!(failures[0].to_string().contains("decoder exploded"));
    }

    #[test]
    fn processor_rejects_unusable_framing() {
        let config = PitchConfig::default();
        for (window, hop) in [(4096, 0), (1, 1), (0, 0), (512, 1024)] {
            let built = FileProcessor::new(
                Box::new(NativeDecoder),
                pitch::build_estimator(&config),
                window,
                hop,
            );
            assert!(
                matches!(built, Err(ConfigError::Invalid(_))),
                "window {} hop {} accepted",
                window,
                hop
            );
        }
    }

    #[test]
    fn status_line_names_failed_file_and_kind() {
        let completion = Completion {
            path: PathBuf::from("wav/bad.wav"),
            completed: 2,
            total: 3,
            outcome: FileOutcome::Failed(AnalyzeError::from(DecodeError::Corrupt("truncated header".into()))),
        };
        let line = completion.status_line().unwrap();
        assert!(line.starts_with("[2/3] FAILED wav/bad.wav (decode): "), "{}", line);
        assert!(line.contains("truncated header"));
    }

    #[test]
    fn status_line_for_finished_and_skipped_files() {
        let done = Completion {
            path: PathBuf::from("wav/a440.wav"),
            completed: 1,
            total: 3,
            outcome: FileOutcome::Done(FileResult {
                file: AudioFile {
                    path: PathBuf::from("wav/a440.wav"),
                    sample_rate: 44100,
                    duration_secs: 2.0,
                },
                estimates: vec![PitchEstimate::UNVOICED; 166],
            }),
        };
        assert_eq!(
            done.status_line().as_deref(),
            Some("[1/3] a440.wav (166 frames, 44100 Hz, 2.00s)")
        );

        let skipped = Completion {
            path: PathBuf::from("wav/late.wav"),
            completed: 3,
            total: 3,
            outcome: FileOutcome::Skipped,
        };
        assert!(skipped.status_line().is_none());
    }

    #[test]
    fn unsupported_format_kind() {
        let err = AnalyzeError::from(DecodeError::UnsupportedFormat(".aiff".into()));
        assert_eq!(err.kind(), "unsupported-format");
    }
}
