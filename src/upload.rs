use axum::extract::Multipart;
use bytes::Bytes;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::api::ApiError;
use crate::compose::MediaKind;

/// One uploaded file part, with its client filename already sanitized.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct UploadPair {
    pub image: UploadedFile,
    pub audio: UploadedFile,
}

impl UploadPair {
    /// Checks both extensions against their whitelists, image first.
    pub fn validate(&self) -> Result<(), ApiError> {
        for (kind, file) in [(MediaKind::Image, &self.image), (MediaKind::Audio, &self.audio)] {
            if !has_allowed_extension(&file.filename, kind.allowed_extensions()) {
                return Err(ApiError::UnsupportedFormat(kind));
            }
        }
        Ok(())
    }
}

/// Reads the `image` and `audio` file parts out of a multipart body.
///
/// Parts without a filename are not files and are skipped, as are parts with
/// any other name. The first occurrence of a repeated name wins.
pub async fn read_upload_pair(multipart: &mut Multipart) -> Result<UploadPair, ApiError> {
    let mut image = None;
    let mut audio = None;

    while let Some(field) = multipart.next_field().await? {
        let slot = match field.name() {
            Some("image") => &mut image,
            Some("audio") => &mut audio,
            _ => continue,
        };
        if slot.is_some() {
            continue;
        }
        let Some(filename) = field.file_name().map(secure_filename) else {
            continue;
        };

        let bytes = field.bytes().await?;
        debug!(%filename, size = bytes.len(), "Received file part");
        *slot = Some(UploadedFile { filename, bytes });
    }

    match (image, audio) {
        (Some(image), Some(audio)) => Ok(UploadPair { image, audio }),
        _ => Err(ApiError::MissingParts),
    }
}

/// Reduces a client supplied filename to a safe, flat ASCII name.
///
/// The name is NFKD-normalized first, so accented letters keep their base
/// letter and full-width forms map to ASCII. Path separators turn into word breaks, whitespace runs into `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped and leading/trailing `.` and `_` are
/// trimmed. The result may be empty.
pub fn secure_filename(filename: &str) -> String {
    let flat: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    flat.split_ascii_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Lowercased text after the last `.`.
pub fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn has_allowed_extension(filename: &str, allowed: &[&str]) -> bool {
    extension(filename).is_some_and(|ext| allowed.contains(&ext.as_str()))
}
