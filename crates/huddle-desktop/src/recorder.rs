use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use huddle_core::errors::MediaError;
use huddle_core::media::{AudioClip, AudioRecorder};

use crate::audio_capture::{CAPTURE_CHANNELS, CAPTURE_SAMPLE_RATE, CpalAudioCapture};

enum RecorderState {
    Idle,
    Recording {
        capture: CpalAudioCapture,
        samples: Arc<Mutex<Vec<i16>>>,
    },
}

/// Voice-message recorder over the default microphone. Captured PCM
/// is WAV-encoded on finish; cancel discards it.
pub struct CpalRecorder {
    state: Mutex<RecorderState>,
}

impl CpalRecorder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RecorderState::Idle),
        }
    }
}

impl Default for CpalRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioRecorder for CpalRecorder {
    async fn start(&self) -> Result<(), MediaError> {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, RecorderState::Recording { .. }) {
            return Err(MediaError::Capture("recording already in progress".into()));
        }

        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = samples.clone();
        let capture = CpalAudioCapture::start(move |frame| {
            sink.lock().unwrap().extend_from_slice(frame);
        })?;

        *state = RecorderState::Recording { capture, samples };
        tracing::info!("voice recording started");
        Ok(())
    }

    async fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        if let RecorderState::Recording { capture, .. } = &*state {
            capture.stop();
            tracing::info!("voice recording cancelled");
        }
        *state = RecorderState::Idle;
    }

    async fn finish(&self) -> Result<AudioClip, MediaError> {
        let previous = {
            let mut state = self.state.lock().unwrap();
            std::mem::replace(&mut *state, RecorderState::Idle)
        };
        let RecorderState::Recording { capture, samples } = previous else {
            return Err(MediaError::Capture("no recording in progress".into()));
        };
        capture.stop();

        let samples = samples.lock().unwrap().clone();
        tracing::info!("voice recording finished: {} samples", samples.len());
        let bytes = encode_wav(&samples, CAPTURE_SAMPLE_RATE)?;
        Ok(AudioClip {
            mime: "audio/wav".into(),
            bytes,
        })
    }
}

fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, MediaError> {
    let spec = hound::WavSpec {
        channels: CAPTURE_CHANNELS as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| MediaError::Capture(format!("wav writer: {e}")))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| MediaError::Capture(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| MediaError::Capture(format!("wav finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}
