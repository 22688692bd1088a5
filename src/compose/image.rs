use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::context::Context as Scaler;
use ffmpeg_next::software::scaling::flag::Flags;
use ffmpeg_next::{codec, format, frame, media};
use std::path::Path;
use tracing::debug;

use super::layout::{self, Placement};
use super::{ComposeError, MediaKind, VideoSpec};

// Limited-range (BT.601) black.
const BLACK_LUMA: u8 = 16;
const BLACK_CHROMA: u8 = 128;

/// A rectangle inside one picture plane, in samples of that plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

impl Region {
    /// Maps a luma-plane placement onto plane `index` of a YUV420P picture.
    fn for_plane(placement: &Placement, index: usize) -> Self {
        let shift = if index == 0 { 0 } else { 1 };
        Region {
            x: (placement.x >> shift) as usize,
            y: (placement.y >> shift) as usize,
            width: (placement.width >> shift) as usize,
            height: (placement.height >> shift) as usize,
        }
    }
}

/// Decodes the first frame of a still image file.
pub fn decode_still(path: &Path) -> Result<frame::Video, ComposeError> {
    let mut ictx = format::input(path).map_err(ComposeError::decode(MediaKind::Image))?;

    let (stream_index, mut decoder) = {
        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| no_picture("no picture stream found"))?;
        let context = codec::context::Context::from_parameters(stream.parameters())
            .map_err(ComposeError::decode(MediaKind::Image))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(ComposeError::decode(MediaKind::Image))?;
        (stream.index(), decoder)
    };

    let mut still = frame::Video::empty();
    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(ComposeError::decode(MediaKind::Image))?;
        if decoder.receive_frame(&mut still).is_ok() {
            debug!(
                width = still.width(),
                height = still.height(),
                format = ?still.format(),
                "Decoded still image"
            );
            return Ok(still);
        }
    }

    // Some decoders only emit the picture once drained.
    decoder
        .send_eof()
        .map_err(ComposeError::decode(MediaKind::Image))?;
    if decoder.receive_frame(&mut still).is_ok() {
        return Ok(still);
    }

    Err(no_picture("no picture could be decoded"))
}

/// Scales `still` to fit the output canvas and centers it on black.
///
/// Returns the YUV420P canvas frame together with where the picture landed.
pub fn render_canvas(
    still: &frame::Video,
    spec: &VideoSpec,
) -> Result<(frame::Video, Placement), ComposeError> {
    let placement = layout::fit(still.width(), still.height(), spec.width, spec.height)
        .ok_or_else(|| no_picture("image has no pixels"))?;
    debug!(
        src_width = still.width(),
        src_height = still.height(),
        ?placement,
        "Computed image placement"
    );

    let mut scaler = Scaler::get(
        still.format(),
        still.width(),
        still.height(),
        Pixel::YUV420P,
        placement.width,
        placement.height,
        Flags::BICUBIC,
    )
    .map_err(|e| ComposeError::Internal(format!("Image scaler: Failed to create: {e}")))?;

    let mut scaled = frame::Video::empty();
    scaler
        .run(still, &mut scaled)
        .map_err(|e| ComposeError::Internal(format!("Image scaler: Failed to scale: {e}")))?;

    let mut canvas = frame::Video::new(Pixel::YUV420P, spec.width, spec.height);
    for index in 0..3 {
        let fill = if index == 0 { BLACK_LUMA } else { BLACK_CHROMA };
        let canvas_stride = canvas.stride(index);
        let scaled_stride = scaled.stride(index);
        let plane = canvas.data_mut(index);
        plane.fill(fill);
        blit_plane(
            plane,
            canvas_stride,
            scaled.data(index),
            scaled_stride,
            Region::for_plane(&placement, index),
        );
    }

    Ok((canvas, placement))
}

/// Copies `region.width` x `region.height` samples from the top-left of `src`
/// into `dst` at (`region.x`, `region.y`).
fn blit_plane(dst: &mut [u8], dst_stride: usize, src: &[u8], src_stride: usize, region: Region) {
    for row in 0..region.height {
        let to = (region.y + row) * dst_stride + region.x;
        let from = row * src_stride;
        dst[to..to + region.width].copy_from_slice(&src[from..from + region.width]);
    }
}

fn no_picture(message: &str) -> ComposeError {
    ComposeError::InputDecode {
        kind: MediaKind::Image,
        message: message.to_string(),
    }
}
