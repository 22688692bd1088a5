#![allow(dead_code)]

use ffmpeg_next as ffmpeg;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;
use video_composer::{
    CancelFlag, ComposeError, ComposeJob, Composer, Composition, Config, MediaKind, Placement,
};

/// Test harness that runs the server on its own runtime thread
pub struct TestServer {
    _handle: JoinHandle<()>,
    port: u16,
    scratch: TempDir,
}

impl TestServer {
    pub async fn start(composer: Arc<dyn Composer>) -> Self {
        Self::start_with(Config::default(), composer).await
    }

    pub async fn start_with(config: Config, composer: Arc<dyn Composer>) -> Self {
        init();

        let port = portpicker::pick_unused_port().expect("No available port");
        let scratch = tempfile::tempdir().expect("Failed to create scratch root");

        let config = Config {
            listen_on_port: port,
            bind_address: "127.0.0.1".into(),
            scratch_dir: Some(scratch.path().to_string_lossy().into_owned()),
            ..config
        };

        // Spawn the server in a separate thread with its own runtime
        let handle = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                if let Err(error) = video_composer::run_with_composer(config, composer).await {
                    eprintln!("test server stopped: {error:#}");
                }
            });
        });

        let server = TestServer {
            _handle: handle,
            port,
            scratch,
        };

        // Poll until server is ready
        let client = server.client();
        for _ in 0..200 {
            if let Ok(response) = client.get(server.url("/create-video")).send().await
                && response.status() == 405
            {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        server
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap()
    }

    pub async fn create_video(&self, form: Form) -> reqwest::Response {
        self.client()
            .post(self.url("/create-video"))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub fn scratch_root(&self) -> &Path {
        self.scratch.path()
    }

    /// Scratch dirs are removed once the response body has been dropped on
    /// the server side, which may trail the client by a moment.
    pub async fn wait_for_empty_scratch(&self) -> bool {
        for _ in 0..200 {
            let entries = std::fs::read_dir(self.scratch_root())
                .map(|dir| dir.count())
                .unwrap_or(0);
            if entries == 0 {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Initializes tracing and FFmpeg once per test binary
pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
        ffmpeg::init().unwrap();
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    });
}

pub fn file_part(filename: &str, bytes: Vec<u8>) -> Part {
    Part::bytes(bytes).file_name(filename.to_string())
}

pub fn form(image: (&str, Vec<u8>), audio: (&str, Vec<u8>)) -> Form {
    Form::new()
        .part("image", file_part(image.0, image.1))
        .part("audio", file_part(audio.0, audio.1))
}

/// Uncompressed 24-bit BMP filled with a single RGB color
pub fn bmp(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let row_len = (width as usize * 3).div_ceil(4) * 4;
    let pixels_len = row_len * height as usize;
    let file_len = 54 + pixels_len;

    let mut out = Vec::with_capacity(file_len);
    // BITMAPFILEHEADER
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&(file_len as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&54u32.to_le_bytes());
    // BITMAPINFOHEADER
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(pixels_len as u32).to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let [r, g, b] = rgb;
    let mut row = Vec::with_capacity(row_len);
    for _ in 0..width {
        row.extend_from_slice(&[b, g, r]);
    }
    row.resize(row_len, 0);
    for _ in 0..height {
        out.extend_from_slice(&row);
    }
    out
}

/// 16-bit PCM WAV with a 440 Hz tone
pub fn wav(seconds: f64, rate: u32, channels: u16) -> Vec<u8> {
    let frames = (seconds * f64::from(rate)).round() as usize;
    let data_len = frames * usize::from(channels) * 2;

    let mut out = Vec::with_capacity(44 + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * u32::from(channels) * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());

    for i in 0..frames {
        let t = i as f64 / f64::from(rate);
        let sample = ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

fn placeholder_placement() -> Placement {
    Placement {
        width: 1920,
        height: 1080,
        x: 0,
        y: 0,
    }
}

/// Writes the image bytes followed by the audio bytes as the "video"
pub struct EchoComposer {
    pub delay: Duration,
}

impl Composer for EchoComposer {
    fn compose(&self, job: &ComposeJob, cancel: &CancelFlag) -> Result<Composition, ComposeError> {
        std::thread::sleep(self.delay);
        if cancel.is_cancelled() {
            return Err(ComposeError::Cancelled);
        }

        let io = |e: std::io::Error| ComposeError::Internal(e.to_string());
        let mut out = std::fs::read(&job.image).map_err(io)?;
        out.extend(std::fs::read(&job.audio).map_err(io)?);
        std::fs::write(&job.output, out).map_err(io)?;

        Ok(Composition {
            output: job.output.clone(),
            duration: Duration::from_secs(1),
            frames: 24,
            placement: placeholder_placement(),
        })
    }
}

/// Fails every job after leaving a partial output behind
pub enum FailingComposer {
    Decode(MediaKind),
    Encode,
}

impl Composer for FailingComposer {
    fn compose(&self, job: &ComposeJob, _: &CancelFlag) -> Result<Composition, ComposeError> {
        std::fs::write(&job.output, b"partial")
            .map_err(|e| ComposeError::Internal(e.to_string()))?;
        Err(match self {
            FailingComposer::Decode(kind) => ComposeError::InputDecode {
                kind: *kind,
                message: "Invalid data found when processing input".into(),
            },
            FailingComposer::Encode => {
                ComposeError::Encode("H.264 Encoder: Failed to open: Invalid argument".into())
            }
        })
    }
}
