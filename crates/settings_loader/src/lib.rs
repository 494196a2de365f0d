//! # Settings Loader
//!
//! Centralized settings loading for the kaimemo backend.
//!
//! Settings are resolved in three layers, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional JSON file named by `SETTINGS_PATH` (non-secret settings only)
//! 3. environment variables, after loading a `.env` file if one exists
//!
//! Secrets (Notion API key, LINE client secret) are only read from the
//! environment.
//!
//! ## Usage Examples
//!
//! ```rust,no_run
//! let settings = settings_loader::load_settings()?;
//! println!("listening on {}:{}", settings.host, settings.port);
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

const DEFAULT_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:4173"];

/// Accepted range for `OUTBOUND_TIMEOUT_SECS`.
pub const OUTBOUND_TIMEOUT_RANGE: RangeInclusive<u64> = 1..=300;
/// Accepted range for `SESSION_TTL_HOURS` (up to one year).
pub const SESSION_TTL_RANGE: RangeInclusive<u64> = 1..=8760;

/// Which live connections receive a snapshot after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastScope {
    /// Only connections registered under the mutating owner.
    #[default]
    Owner,
    /// Every open connection.
    Global,
}

impl FromStr for BroadcastScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(BroadcastScope::Owner),
            "global" => Ok(BroadcastScope::Global),
            other => Err(anyhow!("Unknown broadcast scope '{other}' (use 'owner' or 'global')")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionSettings {
    pub api_key: String,
    pub kaimemo_database_id: String,
    pub summary_database_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSettings {
    Notion(NotionSettings),
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub allow_origins: Vec<String>,
    pub store: StoreSettings,
    pub line: Option<LineSettings>,
    pub broadcast_scope: BroadcastScope,
    pub outbound_timeout_secs: u64,
    pub session_ttl_hours: u64,
    pub cookie_secure: bool,
}

/// Non-secret settings that may come from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub allow_origins: Option<Vec<String>>,
    pub broadcast_scope: Option<BroadcastScope>,
    pub outbound_timeout_secs: Option<u64>,
    pub session_ttl_hours: Option<u64>,
    pub cookie_secure: Option<bool>,
}

/// Loads `.env`, the optional settings file and the process environment.
pub fn load_settings() -> Result<Settings> {
    // A missing .env is the normal case in production
    let _ = dotenvy::dotenv();

    let file = match std::env::var("SETTINGS_PATH") {
        Ok(path) if !path.trim().is_empty() => load_settings_file(path)?,
        _ => FileSettings::default(),
    };

    settings_from_lookup(file, |key| std::env::var(key).ok())
}

/// Loads the non-secret settings from a JSON file
pub fn load_settings_file<P: AsRef<Path>>(path: P) -> Result<FileSettings> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Reading settings file: {}", path.display()))?;
    let settings: FileSettings = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing settings JSON in {}", path.display()))?;
    Ok(settings)
}

/// Builds [`Settings`] from file settings plus a variable lookup.
///
/// Empty variables count as unset.
pub fn settings_from_lookup<F>(file: FileSettings, lookup: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let require = |key: &str| get(key).ok_or_else(|| anyhow!("{key} is not set"));

    let host = get("HOST")
        .or(file.host)
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let port = match get("PORT") {
        Some(raw) => raw.parse::<u16>().with_context(|| format!("PORT '{raw}' is not a valid port"))?,
        None => file.port.unwrap_or(3000),
    };

    let mut allow_origins = file
        .allow_origins
        .unwrap_or_else(|| DEFAULT_ORIGINS.iter().map(|o| o.to_string()).collect());
    if let Some(frontend_url) = get("FRONTEND_URL") {
        if !allow_origins.contains(&frontend_url) {
            allow_origins.push(frontend_url);
        }
    }

    let store = match get("KAIMEMO_STORE").as_deref().unwrap_or("notion") {
        "notion" => StoreSettings::Notion(NotionSettings {
            api_key: require("NOTION_API_KEY")?,
            kaimemo_database_id: require("NOTION_DATABASE_KAIMEMO_INPUT")?,
            summary_database_id: require("NOTION_DATABASE_KAIMEMO_SUMMARY_RECORD")?,
        }),
        "memory" => StoreSettings::Memory,
        other => bail!("Unknown KAIMEMO_STORE '{other}' (use 'notion' or 'memory')"),
    };

    let line_keys = ["LINE_CLIENT_ID", "LINE_CLIENT_SECRET", "LINE_REDIRECT_URI"];
    let line_values: Vec<Option<String>> = line_keys.iter().map(|k| get(*k)).collect();
    let line = match line_values.as_slice() {
        [Some(client_id), Some(client_secret), Some(redirect_uri)] => Some(LineSettings {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            redirect_uri: redirect_uri.clone(),
        }),
        values if values.iter().all(Option::is_none) => None,
        values => {
            let missing: Vec<&str> = line_keys
                .iter()
                .zip(values)
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| *k)
                .collect();
            bail!("LINE login is partially configured; missing {}", missing.join(", "));
        }
    };

    let broadcast_scope = match get("BROADCAST_SCOPE") {
        Some(raw) => raw.parse()?,
        None => file.broadcast_scope.unwrap_or_default(),
    };

    let outbound_timeout_secs = parse_or(get("OUTBOUND_TIMEOUT_SECS"), "OUTBOUND_TIMEOUT_SECS")?
        .or(file.outbound_timeout_secs)
        .unwrap_or(10);
    let session_ttl_hours = parse_or(get("SESSION_TTL_HOURS"), "SESSION_TTL_HOURS")?
        .or(file.session_ttl_hours)
        .unwrap_or(24);
    ensure_in_range("OUTBOUND_TIMEOUT_SECS", outbound_timeout_secs, &OUTBOUND_TIMEOUT_RANGE)?;
    ensure_in_range("SESSION_TTL_HOURS", session_ttl_hours, &SESSION_TTL_RANGE)?;
    let cookie_secure = parse_or(get("COOKIE_SECURE"), "COOKIE_SECURE")?
        .or(file.cookie_secure)
        .unwrap_or(true);

    Ok(Settings {
        host,
        port,
        allow_origins,
        store,
        line,
        broadcast_scope,
        outbound_timeout_secs,
        session_ttl_hours,
        cookie_secure,
    })
}

fn ensure_in_range(key: &str, value: u64, range: &RangeInclusive<u64>) -> Result<()> {
    if !range.contains(&value) {
        bail!("{key} must be between {} and {}, got {value}", range.start(), range.end());
    }
    Ok(())
}

fn parse_or<T>(raw: Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|v| v.parse::<T>().with_context(|| format!("{key} '{v}' is invalid")))
        .transpose()
}
