//! Still image + audio track -> MP4 composition.
//!
//! Request handling only talks to the [`Composer`] trait; the FFmpeg-backed
//! implementation lives in [`ffmpeg`].

pub mod audio;
pub mod ffmpeg;
pub mod image;
pub mod layout;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

pub use self::ffmpeg::FfmpegComposer;
pub use self::layout::Placement;

/// Output canvas width in pixels.
pub const CANVAS_WIDTH: u32 = 1920;
/// Output canvas height in pixels.
pub const CANVAS_HEIGHT: u32 = 1080;
/// Output frame rate.
pub const FRAME_RATE: u32 = 24;
/// Output audio sample rate.
pub const AUDIO_RATE: u32 = 44_100;
/// Output AAC bitrate.
pub const AUDIO_BITRATE: usize = 128_000;

/// The kind of uploaded media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    /// Multipart field name carrying this kind of file.
    pub fn field_name(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }

    /// Lowercase file extensions accepted for this kind.
    pub fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => &["png", "jpg", "jpeg", "bmp"],
            MediaKind::Audio => &["mp3", "wav", "ogg", "aac", "m4a"],
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Target parameters of the produced video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio_rate: u32,
    pub audio_bitrate: usize,
    /// x264 preset name.
    pub preset: String,
    /// x264 constant rate factor.
    pub crf: u8,
}

impl Default for VideoSpec {
    fn default() -> Self {
        Self {
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
            fps: FRAME_RATE,
            audio_rate: AUDIO_RATE,
            audio_bitrate: AUDIO_BITRATE,
            preset: "medium".to_string(),
            crf: 23,
        }
    }
}

impl VideoSpec {
    /// Number of video frames needed to cover `samples` audio samples.
    ///
    /// Always at least one frame so that silent or very short tracks still
    /// produce a playable video.
    pub fn frames_for_samples(&self, samples: u64) -> u64 {
        let rate = u64::from(self.audio_rate.max(1));
        (samples * u64::from(self.fps)).div_ceil(rate).max(1)
    }
}

/// Everything a [`Composer`] needs for one request.
#[derive(Debug, Clone)]
pub struct ComposeJob {
    pub image: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
    pub spec: VideoSpec,
}

/// Result of a successful composition.
#[derive(Debug, Clone)]
pub struct Composition {
    pub output: PathBuf,
    /// Duration of the decoded audio track.
    pub duration: Duration,
    /// Number of video frames written.
    pub frames: u64,
    /// Where the scaled image was placed on the canvas.
    pub placement: Placement,
}

#[derive(Debug, Error)]
pub enum ComposeError {
    /// The upload passed the extension whitelist but could not be decoded.
    #[error("Failed to decode {kind}: {message}")]
    InputDecode { kind: MediaKind, message: String },

    #[error("Failed to encode video: {0}")]
    Encode(String),

    #[error("Video composition timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Video composition was cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl ComposeError {
    pub(crate) fn decode(kind: MediaKind) -> impl FnOnce(::ffmpeg_next::Error) -> Self {
        move |error| ComposeError::InputDecode {
            kind,
            message: error.to_string(),
        }
    }

    pub(crate) fn encode(context: &'static str) -> impl FnOnce(::ffmpeg_next::Error) -> Self {
        move |error| ComposeError::Encode(format!("{context}: {error}"))
    }
}

/// Cooperative cancellation shared between the request and its worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<(), ComposeError> {
        if self.is_cancelled() {
            return Err(ComposeError::Cancelled);
        }
        Ok(())
    }
}

/// Produces a video file from a still image and an audio track.
///
/// Implementations are synchronous and may block for a long time; callers run
/// them on a blocking worker.
pub trait Composer: Send + Sync + 'static {
    fn compose(&self, job: &ComposeJob, cancel: &CancelFlag) -> Result<Composition, ComposeError>;
}
