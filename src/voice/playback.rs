//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// How often playback progress is checked for word boundaries
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays audio to the default output device
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the default output device at [`PLAYBACK_SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |channels: u16| {
            move |c: &cpal::SupportedStreamConfigRange| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            }
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(supports(1))
            .or_else(|| device.supported_output_configs().ok()?.find(supports(2)))
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Play mono samples at [`PLAYBACK_SAMPLE_RATE`], blocking until done
    ///
    /// `boundaries` are sample offsets; `on_boundary` is called with each
    /// boundary's index once playback reaches it. Returns `Ok(false)` if
    /// `cancel` was raised before the end.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails
    pub fn play_paced<F>(
        &self,
        samples: Vec<f32>,
        boundaries: &[usize],
        cancel: &AtomicBool,
        mut on_boundary: F,
    ) -> Result<bool>
    where
        F: FnMut(usize),
    {
        let total = samples.len();
        let channels = usize::from(self.config.channels);
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or(0.0);
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (total as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);
        let mut next = 0;

        let completed = loop {
            if cancel.load(Ordering::Relaxed) {
                break false;
            }

            let pos = position.load(Ordering::Relaxed);
            while next < boundaries.len() && boundaries[next] <= pos {
                on_boundary(next);
                next += 1;
            }

            if pos >= total || Instant::now() > deadline {
                break true;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if completed {
            // Let the device drain its last buffer
            std::thread::sleep(Duration::from_millis(100));
            while next < boundaries.len() {
                on_boundary(next);
                next += 1;
            }
        }

        drop(stream);
        tracing::debug!(samples = total, completed, "playback finished");
        Ok(completed)
    }
}

/// Sample offsets for `words` evenly spread over `total` samples
#[must_use]
pub fn word_offsets(words: usize, total: usize) -> Vec<usize> {
    if words == 0 {
        return Vec::new();
    }
    (0..words).map(|i| i * total / words).collect()
}

/// Decode WAV or MP3 bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the bytes are neither valid WAV nor MP3
pub fn decode_audio(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = 2f32.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn decode_mp3(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let data: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&data, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("no audio frames decoded".to_string()));
    }
    Ok((samples, sample_rate))
}

/// Average interleaved channels to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample mono audio with rubato
///
/// # Errors
///
/// Returns error if the resampler cannot be built
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::with_capacity(input.len() * to_rate as usize / from_rate as usize + 1);

    for chunk in input.chunks(chunk_size) {
        let result = if chunk.len() == chunk_size {
            resampler.process(&[chunk], None)
        } else {
            resampler.process_partial(Some(&[chunk]), None)
        }
        .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output.iter().map(|&s| s as f32).collect())
}

/// Scale samples by a volume in `0.0..=1.0`
pub fn apply_volume(samples: &mut [f32], volume: f32) {
    let volume = volume.clamp(0.0, 1.0);
    if (volume - 1.0).abs() > f32::EPSILON {
        samples.iter_mut().for_each(|s| *s *= volume);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    #[test]
    fn test_word_offsets_spread_evenly() {
        assert_eq!(word_offsets(4, 100), [0, 25, 50, 75]);
        assert!(word_offsets(0, 100).is_empty());
    }

    #[test]
    fn test_decode_wav_roundtrip_rate() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 0.25], 16000).unwrap();
        let (samples, rate) = decode_audio(&wav).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_audio(b"not audio at all").is_err());
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), [0.5, 0.5]);
    }

    #[test]
    fn test_resample_changes_length() {
        let input = vec![0.1f32; 16000];
        let output = resample(&input, 16000, 24000).unwrap();
        assert!(output.len() > input.len());
        assert_eq!(resample(&input, 24000, 24000).unwrap().len(), input.len());
    }

    #[test]
    fn test_apply_volume() {
        let mut samples = [0.5, -0.5];
        apply_volume(&mut samples, 0.5);
        assert_eq!(samples, [0.25, -0.25]);
    }
}
