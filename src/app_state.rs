use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::Config;
use crate::compose::{CancelFlag, ComposeError, ComposeJob, Composer, Composition, VideoSpec};
use crate::scratch::ScratchDir;

#[derive(Clone)]
pub struct AppState {
    composer: Arc<dyn Composer>,
    semaphore: Arc<Semaphore>,
    scratch_root: PathBuf,
    spec: VideoSpec,
    encode_timeout: Option<Duration>,
}

impl AppState {
    pub async fn new(config: &Config, composer: Arc<dyn Composer>) -> anyhow::Result<Self> {
        let scratch_root = config.scratch_root();
        tokio::fs::create_dir_all(&scratch_root).await?;

        let spec = VideoSpec {
            preset: config.preset.clone(),
            crf: config.crf,
            ..Default::default()
        };
        let encode_timeout = config.encode_timeout();
        info!(
            permits = config.permits,
            ?scratch_root,
            ?encode_timeout,
            preset = %spec.preset,
            crf = spec.crf,
            "App state initialized"
        );

        Ok(Self {
            composer,
            semaphore: Arc::new(Semaphore::new(config.permits)),
            scratch_root,
            spec,
            encode_timeout,
        })
    }

    pub fn scratch_root(&self) -> &Path {
        self.scratch_root.as_path()
    }

    pub fn video_spec(&self) -> &VideoSpec {
        &self.spec
    }

    /// Runs `job` on a blocking worker once a permit is free.
    ///
    /// When the encode timeout expires, or the caller stops waiting, the
    /// worker is asked to cancel. On timeout this waits for the worker to stop
    /// so the job's files are no longer in use when it returns.
    ///
    /// The worker holds `scratch` until it exits, so a caller that goes away
    /// early never removes the directory under a running encode.
    pub async fn compose(
        &self,
        job: ComposeJob,
        scratch: Arc<ScratchDir>,
    ) -> Result<Composition, ComposeError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ComposeError::Internal(format!("Composition queue closed: {e}")))?;
        debug!(available = self.semaphore.available_permits(), "Acquired permit");

        let cancel = CancelFlag::default();
        let _guard = CancelOnDrop(cancel.clone());

        let composer = self.composer.clone();
        let worker_cancel = cancel.clone();
        let mut handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _scratch = scratch;
            composer.compose(&job, &worker_cancel)
        });

        let joined = match self.encode_timeout {
            None => handle.await,
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(limit_secs = limit.as_secs(), "Composition timed out, cancelling");
                    cancel.cancel();
                    _ = handle.await;
                    return Err(ComposeError::TimedOut(limit));
                }
            },
        };

        joined.map_err(|e| ComposeError::Internal(format!("Composition worker failed: {e}")))?
    }
}

/// Raises the flag when the waiting request goes away.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
