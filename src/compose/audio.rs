use ffmpeg_next::format::Sample;
use ffmpeg_next::format::context::Output as OutputContext;
use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::software::resampling::Context as Resampler;
use ffmpeg_next::{ChannelLayout, Dictionary, Packet, Rational};
use ffmpeg_next::{codec, format, frame, media};
use std::path::Path;
use tracing::{debug, warn};

use super::{ComposeError, MediaKind, VideoSpec};

/// Sample format fed to the AAC encoder.
pub const TARGET_FORMAT: Sample = Sample::F32(SampleType::Planar);
const TARGET_LAYOUT: ChannelLayout = ChannelLayout::STEREO;
const TARGET_CHANNELS: usize = 2;

/// Used when the encoder does not report a frame size.
const DEFAULT_AAC_FRAME_SIZE: usize = 1024;

/// Extra room in each resampler output frame for samples held back by the
/// resampler's filter delay.
const RESAMPLE_HEADROOM: usize = 256;

/// Stereo float-planar sample buffer between the resampler and the encoder.
///
/// Decoded audio arrives in arbitrary chunk sizes while AAC wants exactly
/// `frame_size` samples per input frame.
#[derive(Debug, Default)]
pub struct AudioFifo {
    channels: [Vec<f32>; TARGET_CHANNELS],
}

impl AudioFifo {
    /// Samples buffered per channel.
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one chunk; both channels must have the same length.
    pub fn push_planes(&mut self, left: &[f32], right: &[f32]) {
        debug_assert_eq!(left.len(), right.len());
        self.channels[0].extend_from_slice(left);
        self.channels[1].extend_from_slice(right);
    }

    /// Copies up to `out.len()` samples of `channel` from the front of the
    /// buffer and zero-pads the remainder. Returns the number of samples copied.
    pub fn peek_into(&self, channel: usize, out: &mut [f32]) -> usize {
        let source = &self.channels[channel];
        let available = source.len().min(out.len());
        out[..available].copy_from_slice(&source[..available]);
        out[available..].fill(0.0);
        available
    }

    /// Drops `count` samples from the front of every channel.
    pub fn consume(&mut self, count: usize) {
        for channel in &mut self.channels {
            let count = count.min(channel.len());
            channel.drain(..count);
        }
    }

    fn push_frame(&mut self, frame: &frame::Audio) {
        if frame.samples() == 0 {
            return;
        }
        self.push_planes(frame.plane::<f32>(0), frame.plane::<f32>(1));
    }
}

/// Audio file reader producing 44.1 kHz stereo float-planar samples.
pub struct AudioInput {
    ictx: format::context::Input,
    stream_index: usize,
    decoder: codec::decoder::Audio,
    resampler: Option<Resampler>,
    rate: u32,
    samples: u64,
    skipped_packets: usize,
    finished: bool,
}

impl AudioInput {
    pub fn open(path: &Path, rate: u32) -> Result<Self, ComposeError> {
        let ictx = format::input(path).map_err(ComposeError::decode(MediaKind::Audio))?;

        let (stream_index, decoder) = {
            let stream = ictx
                .streams()
                .best(media::Type::Audio)
                .ok_or_else(|| no_audio("no audio stream found"))?;
            let context = codec::context::Context::from_parameters(stream.parameters())
                .map_err(ComposeError::decode(MediaKind::Audio))?;
            let decoder = context
                .decoder()
                .audio()
                .map_err(ComposeError::decode(MediaKind::Audio))?;
            (stream.index(), decoder)
        };

        debug!(
            ?path,
            stream_index,
            format = ?decoder.format(),
            rate = decoder.rate(),
            channels = decoder.channels(),
            "Opened audio input"
        );

        Ok(Self {
            ictx,
            stream_index,
            decoder,
            resampler: None,
            rate,
            samples: 0,
            skipped_packets: 0,
            finished: false,
        })
    }

    /// Total samples per channel delivered so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Reads the next audio packet and appends its resampled samples to `fifo`.
    ///
    /// Returns `Ok(false)` once the input is exhausted and the decoder and
    /// resampler have been drained.
    pub fn read_into(&mut self, fifo: &mut AudioFifo) -> Result<bool, ComposeError> {
        if self.finished {
            return Ok(false);
        }

        let packet = loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) if packet.stream() == self.stream_index => break packet,
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => {
                    self.drain(fifo)?;
                    self.finished = true;
                    return Ok(false);
                }
                Err(e) => return Err(ComposeError::decode(MediaKind::Audio)(e)),
            }
        };

        if let Err(error) = self.decoder.send_packet(&packet) {
            // Damaged packets are dropped, not fatal.
            self.skipped_packets += 1;
            warn!(
                %error,
                skipped = self.skipped_packets,
                "Audio Decoder: Error sending packet, skipping."
            );
            return Ok(true);
        }
        self.receive_frames(fifo)?;
        Ok(true)
    }

    fn drain(&mut self, fifo: &mut AudioFifo) -> Result<(), ComposeError> {
        self.decoder
            .send_eof()
            .map_err(ComposeError::decode(MediaKind::Audio))?;
        self.receive_frames(fifo)?;

        if let Some(resampler) = self.resampler.as_mut() {
            loop {
                let mut tail =
                    frame::Audio::new(TARGET_FORMAT, RESAMPLE_HEADROOM, TARGET_LAYOUT);
                resampler
                    .flush(&mut tail)
                    .map_err(ComposeError::decode(MediaKind::Audio))?;
                if tail.samples() == 0 {
                    break;
                }
                self.samples += tail.samples() as u64;
                fifo.push_frame(&tail);
            }
        }

        debug!(
            samples = self.samples,
            skipped_packets = self.skipped_packets,
            "Audio input drained"
        );
        Ok(())
    }

    fn receive_frames(&mut self, fifo: &mut AudioFifo) -> Result<(), ComposeError> {
        let mut decoded = frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            self.resample(&mut decoded, fifo)?;
        }
        Ok(())
    }

    fn resample(
        &mut self,
        decoded: &mut frame::Audio,
        fifo: &mut AudioFifo,
    ) -> Result<(), ComposeError> {
        if decoded.samples() == 0 {
            return Ok(());
        }

        let layout = decoded.channel_layout();
        if layout.is_empty() || layout.channels() == 0 {
            // Resampler input must carry a concrete layout.
            decoded.set_channel_layout(ChannelLayout::default(decoded.channels().into()));
        }

        let mut resampler = match self.resampler.take() {
            Some(resampler) => resampler,
            None => {
                debug!(
                    format = ?decoded.format(),
                    rate = decoded.rate(),
                    layout = ?decoded.channel_layout(),
                    target_rate = self.rate,
                    "Audio Resampler: Creating"
                );
                Resampler::get(
                    decoded.format(),
                    decoded.channel_layout(),
                    decoded.rate(),
                    TARGET_FORMAT,
                    TARGET_LAYOUT,
                    self.rate,
                )
                .map_err(ComposeError::decode(MediaKind::Audio))?
            }
        };

        let capacity = (decoded.samples() as u64 * u64::from(self.rate))
            .div_ceil(u64::from(decoded.rate().max(1))) as usize
            + RESAMPLE_HEADROOM;
        let mut resampled = frame::Audio::new(TARGET_FORMAT, capacity, TARGET_LAYOUT);
        let result = resampler.run(decoded, &mut resampled);
        self.resampler = Some(resampler);
        result.map_err(ComposeError::decode(MediaKind::Audio))?;

        self.samples += resampled.samples() as u64;
        fifo.push_frame(&resampled);
        Ok(())
    }
}

/// AAC encoder writing into one stream of the output container.
pub struct AacEncoder {
    encoder: codec::encoder::audio::Encoder,
    stream_index: usize,
    frame_size: usize,
    time_base: Rational,
    rate: u32,
    next_pts: i64,
}

impl AacEncoder {
    /// Opens the encoder and adds its stream to `octx`.
    pub fn add_to(
        octx: &mut OutputContext,
        spec: &VideoSpec,
        global_header: bool,
    ) -> Result<Self, ComposeError> {
        let aac = codec::encoder::find(codec::Id::AAC)
            .ok_or_else(|| ComposeError::Encode("AAC Encoder: Codec not found".into()))?;

        let rate = spec.audio_rate as i32;
        let time_base = Rational::new(1, rate);

        let mut config = codec::Context::new_with_codec(aac)
            .encoder()
            .audio()
            .map_err(ComposeError::encode("AAC Encoder: Failed to create config"))?;
        config.set_rate(rate);
        config.set_channel_layout(TARGET_LAYOUT);
        config.set_format(TARGET_FORMAT);
        config.set_bit_rate(spec.audio_bitrate);
        config.set_time_base(time_base);
        if global_header {
            config.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = config
            .open_with(Dictionary::new())
            .map_err(ComposeError::encode("AAC Encoder: Failed to open"))?;

        let frame_size = match encoder.frame_size() {
            0 => DEFAULT_AAC_FRAME_SIZE,
            n => n as usize,
        };

        let mut stream = octx
            .add_stream(aac)
            .map_err(ComposeError::encode("Output: Failed to add audio stream"))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);
        let stream_index = stream.index();

        debug!(stream_index, frame_size, rate, "AAC audio encoder opened");

        Ok(Self {
            encoder,
            stream_index,
            frame_size,
            time_base,
            rate: spec.audio_rate,
            next_pts: 0,
        })
    }

    /// Samples per channel handed to the encoder so far, padding included.
    pub fn encoded_samples(&self) -> u64 {
        self.next_pts as u64
    }

    /// Encodes every full frame buffered in `fifo`. With `flush` set, a
    /// trailing partial frame is zero-padded and encoded as well.
    pub fn encode_buffered(
        &mut self,
        fifo: &mut AudioFifo,
        octx: &mut OutputContext,
        flush: bool,
    ) -> Result<(), ComposeError> {
        while fifo.len() >= self.frame_size || (flush && !fifo.is_empty()) {
            let mut input = frame::Audio::new(TARGET_FORMAT, self.frame_size, TARGET_LAYOUT);
            input.set_rate(self.rate);
            input.set_pts(Some(self.next_pts));

            let taken = fifo.peek_into(0, input.plane_mut::<f32>(0));
            fifo.peek_into(1, input.plane_mut::<f32>(1));
            fifo.consume(taken);

            self.encoder
                .send_frame(&input)
                .map_err(ComposeError::encode("AAC Encoder: Failed to send frame"))?;
            self.next_pts += self.frame_size as i64;
            self.write_packets(octx)?;
        }
        Ok(())
    }

    /// Flushes the encoder.
    pub fn finish(&mut self, octx: &mut OutputContext) -> Result<(), ComposeError> {
        self.encoder
            .send_eof()
            .map_err(ComposeError::encode("AAC Encoder: Failed to send EOF"))?;
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
                .map_err(ComposeError::encode("Output: Error writing audio packet"))?;
        }
        Ok(())
    }
}

fn no_audio(message: &str) -> ComposeError {
    ComposeError::InputDecode {
        kind: MediaKind::Audio,
        message: message.to_string(),
    }
}
