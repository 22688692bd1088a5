use bytes::Bytes;
use futures::Stream;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tempfile::TempDir;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::upload::UploadedFile;

pub const OUTPUT_FILE: &str = "output_video.mp4";

/// Request-unique working directory, removed recursively when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Creates a fresh, uniquely named directory under `root`.
    pub fn new_in(root: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("compose-")
            .tempdir_in(root)?;
        debug!(path = ?dir.path(), "Created scratch dir");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes an upload into the directory under its sanitized filename.
    pub async fn stage(&self, file: &UploadedFile) -> io::Result<PathBuf> {
        let path = self.path().join(&file.filename);
        tokio::fs::write(&path, &file.bytes).await?;
        debug!(?path, size = file.bytes.len(), "Staged upload");
        Ok(path)
    }

    pub fn output_path(&self) -> PathBuf {
        self.path().join(OUTPUT_FILE)
    }

    /// Removes staged inputs that are no longer needed.
    ///
    /// Failures are only logged; the whole directory goes away on drop anyway.
    pub async fn discard(&self, paths: &[&Path]) {
        for path in paths {
            if let Err(error) = tokio::fs::remove_file(path).await {
                warn!(?path, %error, "Failed to remove staged input");
            }
        }
    }

    /// Opens `path` for streaming and hands this handle on the directory to
    /// the stream, so it lives at least as long as the response body.
    ///
    /// Returns the file length along with the stream.
    pub async fn into_stream(self: Arc<Self>, path: &Path) -> io::Result<(u64, ScratchStream)> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok((
            len,
            ScratchStream {
                inner: ReaderStream::new(file),
                _scratch: self,
            },
        ))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        debug!(path = ?self.dir.path(), "Removing scratch dir");
    }
}

/// File stream that keeps its [`ScratchDir`] alive until it is dropped.
pub struct ScratchStream {
    inner: ReaderStream<File>,
    _scratch: Arc<ScratchDir>,
}

impl Stream for ScratchStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn upload(filename: &str, bytes: &'static [u8]) -> UploadedFile {
        UploadedFile {
            filename: filename.to_string(),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn test_dirs_are_unique_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();

        let first = ScratchDir::new_in(root.path()).unwrap();
        let second = ScratchDir::new_in(root.path()).unwrap();
        assert_ne!(first.path(), second.path());

        let a = first.stage(&upload("cover.png", b"first")).await.unwrap();
        let b = second.stage(&upload("cover.png", b"second")).await.unwrap();
        assert_eq!(tokio::fs::read(&a).await.unwrap(), b"first");
        assert_eq!(tokio::fs::read(&b).await.unwrap(), b"second");

        let first_path = first.path().to_path_buf();
        drop(first);
        assert!(!first_path.exists());
        assert!(second.path().exists());

        drop(second);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_discard_removes_only_given_files() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new_in(root.path()).unwrap();

        let image = scratch.stage(&upload("a.png", b"png")).await.unwrap();
        let audio = scratch.stage(&upload("a.wav", b"wav")).await.unwrap();
        tokio::fs::write(scratch.output_path(), b"mp4").await.unwrap();

        scratch.discard(&[&image, &audio]).await;
        assert!(!image.exists());
        assert!(!audio.exists());
        assert!(scratch.output_path().exists());

        // Missing files are tolerated
        scratch.discard(&[&image]).await;
    }

    #[tokio::test]
    async fn test_stream_owns_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let scratch = Arc::new(ScratchDir::new_in(root.path()).unwrap());
        let output = scratch.output_path();
        tokio::fs::write(&output, b"video bytes").await.unwrap();

        let dir = scratch.path().to_path_buf();
        let (len, stream) = scratch.into_stream(&output).await.unwrap();
        assert_eq!(len, 11);
        assert!(dir.exists());

        let chunks: Vec<Bytes> = stream.map(Result::unwrap).collect().await;
        assert_eq!(chunks.concat(), b"video bytes");
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_dir_outlives_every_handle() {
        let root = tempfile::tempdir().unwrap();
        let scratch = Arc::new(ScratchDir::new_in(root.path()).unwrap());
        let output = scratch.output_path();
        tokio::fs::write(&output, b"mp4").await.unwrap();

        let dir = scratch.path().to_path_buf();
        let worker = scratch.clone();
        let (_, stream) = scratch.into_stream(&output).await.unwrap();
        drop(stream);
        assert!(dir.exists());

        drop(worker);
        assert!(!dir.exists());
    }
}
