//! Configuration file discovery and parsing
//!
//! Searches for `.config/playground.yaml` walking up from the current
//! directory. Values from the file are overridden by `PLAYGROUND_SERVER` /
//! `PLAYGROUND_SECURE`, which are in turn overridden by command-line flags.

use std::env;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result, WrapErr, eyre};
use facet::Facet;
use playground_session::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SERVER, Endpoints};

use crate::render::{RenderConfig, Theme};

const CONFIG_DIR: &str = ".config";
const CONFIG_FILE: &str = "playground.yaml";

pub const SERVER_ENV: &str = "PLAYGROUND_SERVER";
pub const SECURE_ENV: &str = "PLAYGROUND_SECURE";

/// Playground configuration from `.config/playground.yaml`
#[derive(Debug, Clone, Default, Facet)]
#[facet(rename_all = "snake_case")]
pub struct PlaygroundConfig {
    /// Host (and optional port) of the execution service, e.g. `localhost:8080`
    #[facet(default)]
    pub server: Option<String>,

    /// Use `wss://` and `https://` instead of `ws://` and `http://`
    #[facet(default)]
    pub secure: Option<bool>,

    /// Host share links point at, when the client is served from elsewhere
    #[facet(default)]
    pub client_host: Option<String>,

    /// Deadline for opening the execution channel
    #[facet(default)]
    pub connect_timeout_secs: Option<u64>,

    /// `dark` or `light`
    #[facet(default)]
    pub theme: Option<String>,

    /// Accent colour for status lines, `#rrggbb`
    #[facet(default)]
    pub accent: Option<String>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub secure: Option<bool>,
}

/// Configuration with every layer applied
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// File the configuration was read from, if any
    pub source: Option<Utf8PathBuf>,
    pub endpoints: Endpoints,
    pub render: RenderConfig,
}

impl ResolvedConfig {
    /// Discover configuration from the current directory and apply overrides
    pub fn discover(overrides: &Overrides) -> Result<Self> {
        let cwd = env::current_dir()?;
        let cwd = Utf8PathBuf::try_from(cwd).map_err(|e| {
            eyre!(
                "Current directory is not valid UTF-8: {}",
                e.as_path().display()
            )
        })?;
        Self::discover_from(&cwd, overrides, |key| env::var(key).ok())
    }

    /// Discover configuration walking up from `start`
    pub fn discover_from(
        start: &Utf8Path,
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let (source, config) = match find_config_file(start) {
            Some(path) => {
                let config = load_config(&path)?;
                (Some(path), config)
            }
            None => (None, PlaygroundConfig::default()),
        };
        if let Some(path) = &source {
            tracing::debug!(%path, "loaded configuration");
        }
        resolve(source, config, overrides, env)
    }
}

/// Search for `.config/playground.yaml` walking up from `start`
fn find_config_file(start: &Utf8Path) -> Option<Utf8PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn load_config(config_path: &Utf8Path) -> Result<PlaygroundConfig> {
    let content =
        fs::read_to_string(config_path).wrap_err_with(|| format!("Failed to read {config_path}"))?;
    facet_yaml::from_str(&content).map_err(|e| eyre!("Failed to parse {}: {}", config_path, e))
}

fn resolve(
    source: Option<Utf8PathBuf>,
    config: PlaygroundConfig,
    overrides: &Overrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let server = overrides
        .server
        .clone()
        .or_else(|| env(SERVER_ENV).filter(|s| !s.trim().is_empty()))
        .or(config.server)
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());

    let secure = match overrides.secure {
        Some(secure) => secure,
        None => match env(SECURE_ENV) {
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                eyre!("{SECURE_ENV} must be one of true/false/1/0/yes/no, got `{raw}`")
            })?,
            None => config.secure.unwrap_or(false),
        },
    };

    let connect_timeout = config
        .connect_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

    let mut endpoints = Endpoints::new(&server, secure)
        .wrap_err_with(|| format!("Invalid server `{server}`"))?
        .with_connect_timeout(connect_timeout);
    if let Some(client_host) = &config.client_host {
        endpoints = endpoints
            .with_client_host(client_host)
            .wrap_err_with(|| format!("Invalid client_host `{client_host}`"))?;
    }

    let theme = match config.theme.as_deref() {
        Some(raw) => raw.parse::<Theme>()?,
        None => Theme::default(),
    };
    let render = RenderConfig::new(theme, config.accent.as_deref())?;

    Ok(ResolvedConfig {
        source,
        endpoints,
        render,
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
