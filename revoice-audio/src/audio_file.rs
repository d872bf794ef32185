//! Audio file reading (symphonia) and writing (hound)
//!
//! Every file is brought into the graph format on open: decoded to f32,
//! folded or widened to stereo, and resampled to the graph rate.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{AudioError, Result};
use crate::format::StreamFormat;

/// A decoded file, stereo interleaved at the graph sample rate
#[derive(Debug, Clone)]
pub struct AudioFile {
    path: PathBuf,
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
}

impl AudioFile {
    /// Open and decode `path`, converting to stereo at `target_rate`
    pub fn open(path: impl AsRef<Path>, target_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| AudioError::io(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AudioError::Decode(format!("{}: {}", path.display(), e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::Decode(format!("{}: no audio track", path.display())))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let source_rate = codec_params.sample_rate.unwrap_or(target_rate);
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::Decode(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "stopping decode");
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable packet");
                    continue;
                }
            };

            let spec = *decoded.spec();
            channels = spec.channels.count();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        let stereo = to_stereo(&samples, channels);
        let samples = if source_rate != target_rate && !stereo.is_empty() {
            resample(&stereo, source_rate, target_rate)?
        } else {
            stereo
        };

        debug!(
            path = %path.display(),
            source_rate,
            frames = samples.len() / 2,
            "audio file decoded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            samples: Arc::new(samples),
            sample_rate: target_rate,
        })
    }

    /// Wrap already-decoded stereo samples
    pub fn from_samples(path: impl Into<PathBuf>, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Interleaved stereo samples
    pub fn samples(&self) -> Arc<Vec<f32>> {
        self.samples.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames
    pub fn length(&self) -> u64 {
        (self.samples.len() / 2) as u64
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.length() as f64 / self.sample_rate as f64)
    }
}

/// Duplicate mono, keep the first two channels of anything wider
fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Resample interleaved stereo between rates
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedInOut, Resampler};

    const CHANNELS: usize = 2;
    let frames = samples.len() / CHANNELS;

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, CHANNELS)
            .map_err(|e| AudioError::Decode(e.to_string()))?;

    let deinterleaved: Vec<Vec<f32>> = (0..CHANNELS)
        .map(|ch| samples.iter().skip(ch).step_by(CHANNELS).copied().collect())
        .collect();

    let chunk_size = resampler.input_frames_next();
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); CHANNELS];

    let mut pos = 0;
    while pos + chunk_size <= frames {
        let input_refs: Vec<&[f32]> = deinterleaved
            .iter()
            .map(|ch| &ch[pos..pos + chunk_size])
            .collect();

        let resampled = resampler
            .process(&input_refs, None)
            .map_err(|e| AudioError::Decode(e.to_string()))?;

        for (ch, data) in resampled.into_iter().enumerate() {
            output[ch].extend(data);
        }
        pos += chunk_size;
    }

    // Zero-pad the tail and keep only its proportional share
    if pos < frames {
        let remaining = frames - pos;
        let padded: Vec<Vec<f32>> = deinterleaved
            .iter()
            .map(|ch| {
                let mut v = ch[pos..].to_vec();
                v.resize(chunk_size, 0.0);
                v
            })
            .collect();
        let input_refs: Vec<&[f32]> = padded.iter().map(|v| v.as_slice()).collect();

        let resampled = resampler
            .process(&input_refs, None)
            .map_err(|e| AudioError::Decode(e.to_string()))?;
        let keep = remaining * target_rate as usize / source_rate as usize;
        for (ch, data) in resampled.into_iter().enumerate() {
            output[ch].extend(&data[..keep.min(data.len())]);
        }
    }

    let output_frames = output[0].len();
    let mut interleaved = Vec::with_capacity(output_frames * CHANNELS);
    for frame_idx in 0..output_frames {
        for channel in &output {
            interleaved.push(channel[frame_idx]);
        }
    }
    Ok(interleaved)
}

/// Incremental 32-bit float WAV writer in the graph format
pub struct AudioFileWriter {
    path: PathBuf,
    channels: u16,
    writer: hound::WavWriter<BufWriter<File>>,
}

impl AudioFileWriter {
    /// Create (or truncate) `path` for writing
    pub fn create(path: impl AsRef<Path>, format: &StreamFormat) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| AudioError::io(path, e))?;

        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        let writer = hound::WavWriter::new(BufWriter::new(file), spec)
            .map_err(|e| AudioError::write(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            channels: format.channels,
            writer,
        })
    }

    /// Append interleaved samples
    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        for &sample in samples {
            self.writer
                .write_sample(sample)
                .map_err(|e| AudioError::write(&self.path, e))?;
        }
        Ok(())
    }

    /// Frames written so far
    pub fn length(&self) -> u64 {
        (self.writer.len() / self.channels as u32) as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the header and close the file
    pub fn finalize(self) -> Result<PathBuf> {
        let path = self.path;
        self.writer
            .finalize()
            .map_err(|e| AudioError::write(&path, e))?;
        Ok(path)
    }
}
