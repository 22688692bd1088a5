use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// x264 presets accepted by `--preset`, fastest first.
pub const X264_PRESETS: [&str; 10] = [
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

/// Main configuration structure that can be loaded from CLI or a config file
///
/// Example configuration file content
/// # Video Composer Configuration
///
/// # Server configuration
/// listen_on_port = 8080
/// bind_address = "0.0.0.0"
/// permits = 2
/// max_upload_mb = 100
///
/// # Scratch space for staged uploads and encoded output
/// scratch_dir = "/var/tmp/video-composer"
///
/// # Encoding
/// encode_timeout_secs = 600  # 0 disables the timeout
/// preset = "medium"
/// crf = 23
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Directory under which per-request scratch directories are created
    /// (defaults to the OS temp dir)
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,

    /// Number of concurrent composition jobs
    #[arg(short, long, default_value_t = 2)]
    #[serde(default = "default_permits")]
    pub permits: usize,

    /// Maximum request body size in MiB
    #[arg(short, long, default_value_t = 100)]
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,

    /// Abort a composition after this many seconds (0 = disabled)
    #[arg(short = 't', long, default_value_t = 600)]
    #[serde(default = "default_encode_timeout_secs")]
    pub encode_timeout_secs: u64,

    /// x264 preset used for the video track
    #[arg(long, default_value = "medium")]
    #[serde(default = "default_preset")]
    pub preset: String,

    /// x264 constant rate factor (0-51)
    #[arg(long, default_value_t = 23)]
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            bind_address: default_bind_address(),
            scratch_dir: None,
            permits: default_permits(),
            max_upload_mb: default_max_upload_mb(),
            encode_timeout_secs: default_encode_timeout_secs(),
            preset: default_preset(),
            crf: default_crf(),
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.bind_address == default_bind_address() {
            self.bind_address = file_config.bind_address;
        }
        if self.permits == default_permits() {
            self.permits = file_config.permits;
        }
        if self.max_upload_mb == default_max_upload_mb() {
            self.max_upload_mb = file_config.max_upload_mb;
        }
        if self.encode_timeout_secs == default_encode_timeout_secs() {
            self.encode_timeout_secs = file_config.encode_timeout_secs;
        }
        if self.preset == default_preset() {
            self.preset = file_config.preset;
        }
        if self.crf == default_crf() {
            self.crf = file_config.crf;
        }

        if self.scratch_dir.is_none() {
            self.scratch_dir = file_config.scratch_dir;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("Bind address cannot be empty"));
        }
        self.listen_addr()?;
        if self.permits == 0 {
            return Err(anyhow::anyhow!("permits must be at least 1"));
        }
        if self.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("max_upload_mb must be at least 1"));
        }
        if self.crf > 51 {
            return Err(anyhow::anyhow!(
                "Invalid crf {}: can only be set in the range 0-51",
                self.crf
            ));
        }
        if !X264_PRESETS.contains(&self.preset.as_str()) {
            return Err(anyhow::anyhow!(
                "Unsupported preset: {}. Use one of: {}",
                self.preset,
                X264_PRESETS.join(", ")
            ));
        }
        if let Some(dir) = &self.scratch_dir
            && dir.is_empty()
        {
            return Err(anyhow::anyhow!("Scratch directory cannot be empty"));
        }

        Ok(())
    }

    /// Socket address to listen on; `bind_address` must be an IPv4 or IPv6
    /// literal.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_address.parse().map_err(|e| {
            anyhow::anyhow!("Invalid bind address {}: {e}", self.bind_address)
        })?;
        Ok(SocketAddr::new(ip, self.listen_on_port))
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn body_limit(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn encode_timeout(&self) -> Option<Duration> {
        (self.encode_timeout_secs > 0).then(|| Duration::from_secs(self.encode_timeout_secs))
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_permits() -> usize {
    2
}

fn default_max_upload_mb() -> usize {
    100
}

fn default_encode_timeout_secs() -> u64 {
    600
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u8 {
    23
}
