use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use mime_guess::from_path;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::AppState;
use crate::api::{ApiError, RequestId};
use crate::compose::ComposeJob;
use crate::scratch::{OUTPUT_FILE, ScratchDir};
use crate::upload::read_upload_pair;

/// `POST /create-video`: composes the uploaded `image` and `audio` parts into
/// an MP4 and streams it back as an attachment.
#[axum::debug_handler]
pub async fn create_video(
    Extension(state): Extension<AppState>,
    Extension(request_id): Extension<RequestId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    // A body that is not multipart at all carries no file parts.
    let mut multipart = multipart.map_err(|rejection| {
        debug!(%request_id, %rejection, "Request is not multipart");
        ApiError::MissingParts
    })?;

    let pair = read_upload_pair(&mut multipart).await?;
    pair.validate()?;
    info!(
        %request_id,
        image = %pair.image.filename,
        image_size = pair.image.bytes.len(),
        audio = %pair.audio.filename,
        audio_size = pair.audio.bytes.len(),
        "Received composition request"
    );

    let scratch = Arc::new(ScratchDir::new_in(state.scratch_root())?);
    let image = scratch.stage(&pair.image).await?;
    let audio = scratch.stage(&pair.audio).await?;
    drop(pair);

    let job = ComposeJob {
        image: image.clone(),
        audio: audio.clone(),
        output: scratch.output_path(),
        spec: state.video_spec().clone(),
    };
    let result = state.compose(job, scratch.clone()).await;
    scratch.discard(&[&image, &audio]).await;

    let composition = result.inspect_err(|error| {
        error!(%request_id, %error, "Video composition failed");
    })?;
    info!(
        %request_id,
        duration_secs = composition.duration.as_secs_f64(),
        frames = composition.frames,
        placement = ?composition.placement,
        "Video composed"
    );

    let content_type = from_path(&composition.output)
        .first_or_octet_stream()
        .to_string();
    let (len, stream) = scratch.into_stream(&composition.output).await?;
    debug!(%request_id, len, "Streaming video");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{OUTPUT_FILE}\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
