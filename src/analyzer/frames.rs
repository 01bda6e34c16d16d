/// One analysis window cut from a file's samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position in the file's frame sequence.
    pub index: usize,
    /// First sample covered, always `index * hop`.
    pub start: usize,
    /// Exactly `window` samples; the tail of the final frame may be zero padding.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Number of frames produced for `num_samples` samples:
/// `ceil(max(0, num_samples - window) / hop) + 1`.
///
/// `hop` must be non-zero.
pub fn frame_count(num_samples: usize, window: usize, hop: usize) -> usize {
    num_samples.saturating_sub(window).div_ceil(hop) + 1
}

/// Lazily cuts fixed-size, hopped frames out of a decoded signal.
///
/// Frame `i` starts at sample `i * hop`. Iteration stops after the frame that
/// covers the last sample, so the sequence is always finite regardless of how
/// the signal length relates to the hop.
pub struct FrameSource {
    samples: Vec<f32>,
    sample_rate: u32,
    window: usize,
    hop: usize,
    next: usize,
    total: usize,
}

impl FrameSource {
    /// `window` and `hop` must be non-zero; [`FileProcessor::new`] rejects
    /// framings that break this before any file is read.
    ///
    /// [`FileProcessor::new`]: crate::analyzer::FileProcessor::new
    pub fn new(samples: Vec<f32>, sample_rate: u32, window: usize, hop: usize) -> Self {
        debug_assert!(window > 0 && hop > 0, "window and hop must be non-zero");
        let total = frame_count(samples.len(), window, hop);
        Self {
            samples,
            sample_rate,
            window,
            hop,
            next: 0,
            total,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Iterator for FrameSource {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.next >= self.total {
            return None;
        }

        let index = self.next;
        let start = index * self.hop;
        let end = (start + self.window).min(self.samples.len());

        let mut samples = Vec::with_capacity(self.window);
        if start < end {
            samples.extend_from_slice(&self.samples[start..end]);
        }
        samples.resize(self.window, 0.0);

        self.next += 1;
        Some(Frame {
            index,
            start,
            samples,
            sample_rate: self.sample_rate,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameSource {}
