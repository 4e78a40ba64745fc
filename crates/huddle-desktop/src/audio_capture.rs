use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use huddle_core::errors::MediaError;

/// Internal sample rate fed to consumers (48kHz mono i16).
pub const CAPTURE_SAMPLE_RATE: u32 = 48_000;
pub const CAPTURE_CHANNELS: u32 = 1;

// cpal::Stream is !Send + !Sync due to platform internals, but it is
// safe to hold here — we never move the stream across threads, we
// just keep it alive so the OS audio callback keeps firing.
struct SendSyncStream(cpal::Stream);
unsafe impl Send for SendSyncStream {}
unsafe impl Sync for SendSyncStream {}

/// Microphone capture. Feeds 48kHz mono i16 frames into the sink
/// until stopped or dropped.
pub struct CpalAudioCapture {
    _stream: SendSyncStream,
    running: Arc<AtomicBool>,
}

impl CpalAudioCapture {
    pub fn start<F>(mut sink: F) -> Result<Self, MediaError>
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MediaError::DeviceUnavailable("no input audio device".into()))?;

        let default_cfg = device
            .default_input_config()
            .map_err(|e| MediaError::DeviceUnavailable(format!("default input config: {e}")))?;

        let device_sr = default_cfg.sample_rate().0;
        let device_ch = default_cfg.channels() as usize;

        tracing::info!(
            "audio capture: device={:?}, rate={device_sr}, channels={device_ch}, format={:?}",
            device.name(),
            default_cfg.sample_format(),
        );

        let config = cpal::StreamConfig {
            channels: device_ch as u16,
            sample_rate: cpal::SampleRate(device_sr),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let running_cb = running.clone();

        let stream = match default_cfg.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        let mono = downmix_resample(data, device_ch, device_sr);
                        sink(&mono);
                    },
                    |err| tracing::error!("audio capture stream error: {err}"),
                    None,
                )
                .map_err(|e| MediaError::Capture(format!("build input stream: {e}")))?,
            cpal::SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        let as_f32: Vec<f32> =
                            data.iter().map(|s| *s as f32 / 32768.0).collect();
                        let mono = downmix_resample(&as_f32, device_ch, device_sr);
                        sink(&mono);
                    },
                    |err| tracing::error!("audio capture stream error: {err}"),
                    None,
                )
                .map_err(|e| MediaError::Capture(format!("build input stream: {e}")))?,
            other => {
                return Err(MediaError::DeviceUnavailable(format!(
                    "unsupported input sample format: {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| MediaError::Capture(format!("play input stream: {e}")))?;
        tracing::info!("cpal audio capture started");

        Ok(Self {
            _stream: SendSyncStream(stream),
            running,
        })
    }

    /// Stop feeding the sink. The OS stream stays alive until drop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Interleaved device frames -> 48kHz mono i16, averaging channels and
/// nearest-neighbor resampling when the device rate differs.
fn downmix_resample(data: &[f32], channels: usize, device_sr: u32) -> Vec<i16> {
    let device_frames = data.len() / channels.max(1);
    if device_frames == 0 {
        return Vec::new();
    }
    let out_len =
        (device_frames as u64 * CAPTURE_SAMPLE_RATE as u64 / device_sr as u64).max(1) as usize;

    let mut out = Vec::with_capacity(out_len);
    for out_idx in 0..out_len {
        let src_frame = (out_idx as u64 * device_frames as u64 / out_len as u64) as usize;
        let src_frame = src_frame.min(device_frames - 1);
        let mut acc = 0.0f32;
        for ch in 0..channels {
            acc += data[src_frame * channels + ch];
        }
        let sample = (acc / channels as f32).clamp(-1.0, 1.0);
        out.push((sample * 32767.0) as i16);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        // Two stereo frames at the target rate: no resampling.
        let data = [0.5, -0.5, 1.0, 1.0];
        let out = downmix_resample(&data, 2, CAPTURE_SAMPLE_RATE);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 32767);
    }

    #[test]
    fn resample_halves_a_double_rate_input() {
        let data = vec![0.25f32; 200];
        let out = downmix_resample(&data, 1, CAPTURE_SAMPLE_RATE * 2);
        assert_eq!(out.len(), 100);
        assert!(out.iter().all(|&s| s == (0.25f32 * 32767.0) as i16));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(downmix_resample(&[], 2, 44_100).is_empty());
    }
}
