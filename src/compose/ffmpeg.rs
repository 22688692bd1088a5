use ffmpeg_next::format::Pixel::YUV420P;
use ffmpeg_next::format::context::Output as OutputContext;
use ffmpeg_next::{Dictionary, Packet, Rational, codec, format, frame, threading};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::audio::{AacEncoder, AudioFifo, AudioInput};
use super::image;
use super::{CancelFlag, ComposeError, ComposeJob, Composer, Composition, MediaKind, VideoSpec};

static NUM_CPUS: LazyLock<usize> = LazyLock::new(|| {
    let n = num_cpus::get();
    let num = if n > 16 { 16 } else { n };
    info!(num, "Detecting CPU cores");
    num
});

/// Composer backed by the linked FFmpeg libraries: H.264 video and AAC audio
/// muxed into MP4.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegComposer;

impl FfmpegComposer {
    pub fn new() -> Self {
        Self
    }

    /// Whether the linked FFmpeg build provides the H.264 and AAC encoders.
    ///
    /// `ffmpeg_next::init` must have been called first.
    pub fn encoders_available() -> bool {
        codec::encoder::find(codec::Id::H264).is_some()
            && codec::encoder::find(codec::Id::AAC).is_some()
    }
}

impl Composer for FfmpegComposer {
    fn compose(&self, job: &ComposeJob, cancel: &CancelFlag) -> Result<Composition, ComposeError> {
        let started = Instant::now();
        let spec = &job.spec;
        debug!(image = ?job.image, audio = ?job.audio, output = ?job.output, "Composing video");

        let still = image::decode_still(&job.image)?;
        let (mut canvas, placement) = image::render_canvas(&still, spec)?;
        drop(still);

        let mut audio = AudioInput::open(&job.audio, spec.audio_rate)?;

        let mut octx = format::output_as(&job.output, "mp4")
            .map_err(|e| ComposeError::Internal(format!("Failed to create output context: {e}")))?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut video = H264Encoder::add_to(&mut octx, spec, global_header)?;
        let mut aac = AacEncoder::add_to(&mut octx, spec, global_header)?;

        octx.write_header()
            .map_err(ComposeError::encode("Output: Failed to write context header"))?;

        // Video frames trail the encoded audio clock.
        let mut fifo = AudioFifo::default();
        loop {
            cancel.check()?;
            let more = audio.read_into(&mut fifo)?;
            aac.encode_buffered(&mut fifo, &mut octx, !more)?;

            let audio_clock = aac.encoded_samples().min(audio.samples());
            let due = spec.frames_for_samples(audio_clock);
            while video.frames() < due && audio_clock > 0 {
                cancel.check()?;
                video.encode(&mut canvas, &mut octx)?;
            }

            if !more {
                break;
            }
        }

        let samples = audio.samples();
        if samples == 0 {
            return Err(ComposeError::InputDecode {
                kind: MediaKind::Audio,
                message: "no audio samples could be decoded".into(),
            });
        }

        let frames = spec.frames_for_samples(samples);
        while video.frames() < frames {
            cancel.check()?;
            video.encode(&mut canvas, &mut octx)?;
        }

        video.finish(&mut octx)?;
        aac.finish(&mut octx)?;

        octx.write_trailer()
            .map_err(ComposeError::encode("Output: Failed to write trailer"))?;

        let duration = Duration::from_secs_f64(samples as f64 / f64::from(spec.audio_rate));
        info!(
            output = ?job.output,
            duration_secs = duration.as_secs_f64(),
            frames,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Composition to MP4 (H.264/AAC) completed successfully."
        );

        Ok(Composition {
            output: job.output.clone(),
            duration,
            frames,
            placement,
        })
    }
}

/// H.264 encoder repeatedly fed the same canvas frame.
struct H264Encoder {
    encoder: codec::encoder::video::Encoder,
    stream_index: usize,
    time_base: Rational,
    frames: u64,
}

impl H264Encoder {
    #[allow(clippy::field_reassign_with_default)]
    fn add_to(
        octx: &mut OutputContext,
        spec: &VideoSpec,
        global_header: bool,
    ) -> Result<Self, ComposeError> {
        let h264 = codec::encoder::find(codec::Id::H264)
            .ok_or_else(|| ComposeError::Encode("H.264 Encoder: Codec not found".into()))?;

        let fps = spec.fps as i32;
        let time_base = Rational::new(1, fps);

        let mut config = codec::Context::new_with_codec(h264)
            .encoder()
            .video()
            .map_err(ComposeError::encode("H.264 Encoder: Failed to create config"))?;

        let mut threading_config = threading::Config::default();
        threading_config.count = *NUM_CPUS;
        threading_config.kind = threading::Type::Frame;
        config.set_threading(threading_config);

        config.set_format(YUV420P);
        config.set_width(spec.width);
        config.set_height(spec.height);
        config.set_aspect_ratio(Rational::new(1, 1));
        config.set_time_base(time_base);
        config.set_frame_rate(Some(Rational::new(fps, 1)));
        if global_header {
            config.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("preset", &spec.preset);
        opts.set("crf", &spec.crf.to_string());
        opts.set("tune", "stillimage");

        let encoder = config
            .open_with(opts)
            .map_err(ComposeError::encode("H.264 Encoder: Failed to open"))?;

        let mut stream = octx
            .add_stream(h264)
            .map_err(ComposeError::encode("Output: Failed to add video stream"))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);
        let stream_index = stream.index();

        debug!(
            stream_index,
            width = spec.width,
            height = spec.height,
            fps,
            preset = %spec.preset,
            crf = spec.crf,
            "H.264 video encoder opened"
        );

        Ok(Self {
            encoder,
            stream_index,
            time_base,
            frames: 0,
        })
    }

    fn frames(&self) -> u64 {
        self.frames
    }

    fn encode(
        &mut self,
        canvas: &mut frame::Video,
        octx: &mut OutputContext,
    ) -> Result<(), ComposeError> {
        canvas.set_pts(Some(self.frames as i64));
        self.encoder
            .send_frame(canvas)
            .map_err(ComposeError::encode("H.264 Encoder: Failed to send frame"))?;
        self.frames += 1;
        self.write_packets(octx)
    }

    fn finish(&mut self, octx: &mut OutputContext) -> Result<(), ComposeError> {
        self.encoder
            .send_eof()
            .map_err(ComposeError::encode("H.264 Encoder: Failed to send EOF"))?;
        self.write_packets(octx)
    }

    fn write_packets(&mut self, octx: &mut OutputContext) -> Result<(), ComposeError> {
        let stream_time_base = octx
            .stream(self.stream_index)
            .ok_or_else(|| {
                ComposeError::Internal(format!(
                    "Failed to get output stream for index {}",
                    self.stream_index
                ))
            })?
            .time_base();

        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.time_base, stream_time_base);
            packet
                .write_interleaved(octx)
                .map_err(ComposeError::encode("Output: Error writing video packet"))?;
        }
        Ok(())
    }
}
