use anyhow::Context as _;
use ffmpeg_next::util::log::Level as FfmpegLogLevel;
use ffmpeg_next::{self as ffmpeg};
use tracing_subscriber::EnvFilter;
use video_composer::Config;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    ffmpeg::init().context("Failed to initialize FFmpeg")?;
    // Codec chatter goes to stderr otherwise
    ffmpeg::util::log::set_level(FfmpegLogLevel::Error);

    // Load configuration from CLI and/or config file
    let config = Config::load().context("Failed to load configuration")?;
    video_composer::run(config).await
}
