//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default base URL of the storefront API
const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Number of product results requested per query
const DEFAULT_RESULT_LIMIT: u32 = 8;

/// Upper bound on a single assistant query
const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;

/// Which recognition engine backs speech capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerKind {
    /// Recognition runs in the connected UI host and is relayed over IPC
    Bridge,
    /// No recognition available; the mic control is disabled
    None,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Base URL of the storefront API (the query endpoint is `{api_url}/ai/query`)
    pub api_url: String,

    /// Bearer token forwarded with assistant queries
    pub auth_token: Option<String>,

    /// Language tag for recognition and synthesis
    pub locale: String,

    /// Result-count limit sent with every query
    pub result_limit: u32,

    /// Time allowed for one query before it is reported as failed
    pub dispatch_timeout: Duration,

    /// Recognition engine selection
    pub recognizer: RecognizerKind,

    /// Program used for speech output, `None` when speech output is disabled
    pub tts_command: Option<String>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        Self::from_lookup(&home, |key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup, rooted at `home`
    fn from_lookup(home: &str, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("storefront-voice");

        let socket_path = var("STOREFRONT_VOICE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("voice.sock"));

        let api_url = var("STOREFRONT_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let auth_token = var("STOREFRONT_AUTH_TOKEN").filter(|t| !t.trim().is_empty());

        let locale = var("STOREFRONT_VOICE_LOCALE").unwrap_or_else(|| "en-US".to_string());

        let result_limit = match var("STOREFRONT_VOICE_RESULT_LIMIT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid STOREFRONT_VOICE_RESULT_LIMIT: {raw}"))?,
            None => DEFAULT_RESULT_LIMIT,
        };

        let timeout_secs = match var("STOREFRONT_VOICE_DISPATCH_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid STOREFRONT_VOICE_DISPATCH_TIMEOUT_SECS: {raw}"))?,
            None => DEFAULT_DISPATCH_TIMEOUT_SECS,
        };

        let recognizer = match var("STOREFRONT_VOICE_RECOGNIZER").as_deref() {
            None | Some("bridge") => RecognizerKind::Bridge,
            Some("none") => RecognizerKind::None,
            Some(other) => anyhow::bail!("unknown recognizer: {other}"),
        };

        let tts_command = match var("STOREFRONT_VOICE_TTS_COMMAND") {
            Some(cmd) if cmd.trim().is_empty() => None,
            Some(cmd) => Some(cmd),
            None => Some(default_tts_command().to_string()),
        };

        Ok(Self {
            socket_path,
            data_dir,
            api_url,
            auth_token,
            locale,
            result_limit,
            dispatch_timeout: Duration::from_secs(timeout_secs),
            recognizer,
            tts_command,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn default_tts_command() -> &'static str {
    if cfg!(target_os = "macos") {
        "say"
    } else {
        "espeak-ng"
    }
}
