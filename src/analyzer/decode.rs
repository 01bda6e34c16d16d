use crate::scanner::extension_of;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Corrupt audio: {0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mono PCM at the file's native sample rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source before downmixing.
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

/// Turns an audio file into PCM samples.
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DecodedAudio, DecodeError>;
}

/// Decoder backed by hound (WAV), claxon (FLAC) and symphonia (MP3, Ogg Vorbis).
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDecoder;

impl Decoder for NativeDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedAudio, DecodeError> {
        let ext = extension_of(path);
        let audio = match ext.as_str() {
            "wav" | "wave" => load_wav(path)?,
            "flac" => load_flac(path)?,
            "mp3" | "ogg" => load_with_symphonia(path, &ext)?,
            "" => return Err(DecodeError::UnsupportedFormat("no file extension".into())),
            other => return Err(DecodeError::UnsupportedFormat(format!(".{}", other))),
        };

        if audio.sample_rate == 0 {
            return Err(DecodeError::Corrupt("sample rate is zero".into()));
        }

        log::debug!(
            "Decoded {}: {} Hz, {} ch, {:.2}s",
            path.display(),
            audio.sample_rate,
            audio.channels,
            audio.duration_secs()
        );
        Ok(audio)
    }
}

fn load_wav(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let reader = hound::WavReader::open(path).map_err(map_hound)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1);

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(map_hound)?,
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample as u32);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(map_hound)?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels as usize),
        sample_rate: spec.sample_rate,
        channels,
    })
}

fn map_hound(e: hound::Error) -> DecodeError {
    match e {
        hound::Error::IoError(io) => DecodeError::Io(io),
        hound::Error::Unsupported => DecodeError::UnsupportedFormat("WAV encoding".into()),
        other => DecodeError::Corrupt(other.to_string()),
    }
}

fn load_flac(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let mut reader = claxon::FlacReader::open(path).map_err(map_claxon)?;
    let info = reader.streaminfo();
    let channels = info.channels.max(1) as u16;
    let scale = int_scale(info.bits_per_sample);

    let interleaved: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|v| v as f32 * scale))
        .collect::<Result<_, _>>()
        .map_err(map_claxon)?;

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels as usize),
        sample_rate: info.sample_rate,
        channels,
    })
}

fn map_claxon(e: claxon::Error) -> DecodeError {
    match e {
        claxon::Error::IoError(io) => DecodeError::Io(io),
        claxon::Error::Unsupported(what) => DecodeError::UnsupportedFormat(what.to_string()),
        claxon::Error::FormatError(what) => DecodeError::Corrupt(what.to_string()),
    }
}

fn load_with_symphonia(path: &Path, ext: &str) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(ext);

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(map_symphonia)?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::Corrupt("no default audio track".into()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Corrupt("missing sample rate".into()))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(map_symphonia)?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(map_symphonia(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                // Isolated bad packets are common at stream starts
                log::debug!("Skipping undecodable packet in {}: {}", path.display(), msg);
                continue;
            }
            Err(e) => return Err(map_symphonia(e)),
        };

        let spec = *decoded.spec();
        let ch = spec.channels.count().max(1);
        channels = ch as u16;
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend(downmix(buf.samples(), ch));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn map_symphonia(e: SymphoniaError) -> DecodeError {
    match e {
        SymphoniaError::IoError(io) => DecodeError::Io(io),
        SymphoniaError::Unsupported(what) => DecodeError::UnsupportedFormat(what.to_string()),
        other => DecodeError::Corrupt(other.to_string()),
    }
}

/// Full-scale factor for signed integer PCM of the given bit depth.
fn int_scale(bits: u32) -> f32 {
    let bits = bits.clamp(1, 32);
    1.0 / (1u64 << (bits - 1)) as f32
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
