//! Desktop audio backend for huddle.
//!
//! Captures the default microphone via cpal and implements the core's
//! [`AudioRecorder`] for voice messages. Call-media capture stays with
//! the embedding shell, which feeds samples into the local tracks the
//! core hands out.
//!
//! [`AudioRecorder`]: huddle_core::media::AudioRecorder

pub mod audio_capture;
pub mod recorder;

pub use audio_capture::CpalAudioCapture;
pub use recorder::CpalRecorder;
