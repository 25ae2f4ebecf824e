use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use url::Url;

use crate::cli::Cli;
use crate::i18n::Locale;
use crate::rest::{MEDIA_BUCKET, WALL_CHANNEL};

/// Runtime configuration resolved from CLI, environment, config file and
/// defaults, in that order of precedence.
#[derive(Clone)]
pub struct Config {
    /// Backend base URL.
    pub url: Url,
    /// Public anon key sent as `apikey` on every request.
    pub anon_key: String,
    /// Access token of the signed-in member, if any.
    pub access_token: Option<String>,
    pub locale: Locale,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    pub bucket: String,
    pub channel: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url.as_str())
            .field("anon_key", &"<redacted>")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("locale", &self.locale)
            .field("logging_enabled", &self.logging_enabled)
            .field("bucket", &self.bucket)
            .field("channel", &self.channel)
            .finish()
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    backend: FileBackend,
    #[serde(default)]
    session: FileSession,
    #[serde(default)]
    ui: FileUi,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
struct FileBackend {
    url: Option<String>,
    anon_key: Option<String>,
    bucket: Option<String>,
    channel: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileSession {
    access_token: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileUi {
    locale: Option<String>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_logging() -> bool {
    true
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

/// Platform config file, e.g. `~/.config/choir-wall/wall.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "choir", "choir-wall").map(|p| p.config_dir().join("wall.toml"))
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(s)
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut url: Option<String> = None;
        let mut anon_key: Option<String> = None;
        let mut access_token: Option<String> = None;
        let mut locale: Option<String> = None;
        let mut logging = default_logging();
        let mut bucket = MEDIA_BUCKET.to_string();
        let mut channel = WALL_CHANNEL.to_string();

        // config file path precedence: CLI -> ENV -> platform default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("CHOIR_WALL_CONFIG").ok().map(PathBuf::from))
            .or_else(default_config_path);

        if let Some(path) = config_path {
            if let Ok(bytes) = fs::read(&path) {
                let contents = String::from_utf8_lossy(&bytes);
                let file_cfg: FileConfig = toml::from_str(&contents)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                url = file_cfg.backend.url;
                anon_key = file_cfg.backend.anon_key;
                bucket = file_cfg.backend.bucket.unwrap_or(bucket);
                channel = file_cfg.backend.channel.unwrap_or(channel);
                access_token = file_cfg.session.access_token;
                locale = file_cfg.ui.locale;
                logging = file_cfg.logging.enabled;
            }
        }

        // environment overrides
        if let Ok(v) = std::env::var("CHOIR_WALL_URL") {
            url = Some(v);
        }
        if let Ok(v) = std::env::var("CHOIR_WALL_ANON_KEY") {
            anon_key = Some(v);
        }
        if let Ok(v) = std::env::var("CHOIR_WALL_TOKEN") {
            access_token = Some(v);
        }
        if let Ok(v) = std::env::var("CHOIR_WALL_LOCALE") {
            locale = Some(v);
        }
        if let Ok(l) = std::env::var("CHOIR_WALL_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }

        // CLI overrides
        if let Some(v) = &cli.url {
            url = Some(v.clone());
        }
        if let Some(v) = &cli.anon_key {
            anon_key = Some(v.clone());
        }
        if let Some(v) = &cli.token {
            access_token = Some(v.clone());
        }
        if let Some(v) = &cli.locale {
            locale = Some(v.clone());
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        let url = url.and_then(non_empty).context("missing_url")?;
        let url = Url::parse(&url).context("invalid_url")?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("invalid_url_scheme");
        }
        let anon_key = anon_key.and_then(non_empty).context("missing_anon_key")?;

        Ok(Self {
            url,
            anon_key,
            access_token: access_token.and_then(non_empty),
            locale: locale.map(|l| Locale::parse_or_default(&l)).unwrap_or_default(),
            logging_enabled: logging,
            bucket,
            channel,
        })
    }
}
