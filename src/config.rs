//! Runtime configuration read from the process environment.
//! The only hardcoded endpoint is the controller's access-point address.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "http://192.168.33.1";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_WATCH_SECS: u64 = 60;
pub const DEFAULT_LAYOUT_DIR: &str = "./dashboards";

/// Everything needed to reach one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Absolute base URL without a trailing slash, e.g. `http://10.0.0.5`.
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl ConnectionOptions {
    pub fn new(host: Option<&str>) -> Self {
        ConnectionOptions {
            host: normalize_host(host),
            username: None,
            password: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Username/password pair used for both Basic and Digest. A password alone
    /// implies the controller's default account.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let password = self.password.as_deref()?;
        let username = self.username.as_deref().unwrap_or(DEFAULT_USERNAME);
        Some((username, password))
    }

    pub fn rpc_url(&self) -> String {
        format!("{}/rpc", self.host)
    }
}

/// Turn whatever the user typed into an absolute base URL.
pub fn normalize_host(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return DEFAULT_HOST.to_string();
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    with_scheme.trim_end_matches('/').to_string()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionOptions,
    /// Explicit thermostat ids; `None` means ask the controller.
    pub device_ids: Option<Vec<u32>>,
    pub include_scripts: bool,
    pub include_actions: bool,
    pub include_schedules: bool,
    /// Cadence of the `watch` loop.
    pub watch_interval: Duration,
    /// Directory holding `<dashboard-id>.json` layout documents.
    pub layout_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout_secs = parse_secs(lookup("RPC_TIMEOUT_SECS"), "RPC_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let watch_secs = parse_secs(lookup("WATCH_INTERVAL_SECS"), "WATCH_INTERVAL_SECS", DEFAULT_WATCH_SECS)?;

        let connection = ConnectionOptions::new(lookup("CONTROLLER_HOST").as_deref())
            .with_credentials(lookup("CONTROLLER_USERNAME"), lookup("CONTROLLER_PASSWORD"))
            .with_timeout(Duration::from_secs(timeout_secs));

        let device_ids = match lookup("DEVICE_IDS") {
            Some(s) if !s.trim().is_empty() => Some(parse_device_ids(&s)?),
            _ => None,
        };

        let layout_dir = lookup("LAYOUT_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LAYOUT_DIR));

        Ok(Config {
            connection,
            device_ids,
            include_scripts: parse_flag(lookup("INCLUDE_SCRIPTS")),
            include_actions: parse_flag(lookup("INCLUDE_ACTIONS")),
            include_schedules: parse_flag(lookup("INCLUDE_SCHEDULES")),
            watch_interval: Duration::from_secs(watch_secs),
            layout_dir,
        })
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    raw.map(|s| matches!(s.trim(), "1" | "true" | "TRUE")).unwrap_or(true)
}

fn parse_secs(raw: Option<String>, name: &str, default: u64) -> Result<u64, String> {
    match raw {
        Some(s) if !s.trim().is_empty() => match s.trim().parse::<u64>() {
            Ok(0) | Err(_) => Err(format!("{} must be a positive integer number of seconds", name)),
            Ok(v) => Ok(v),
        },
        _ => Ok(default),
    }
}

fn parse_device_ids(raw: &str) -> Result<Vec<u32>, String> {
    let mut ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| format!("DEVICE_IDS contains an invalid id: {}", s))
        })
        .collect::<Result<Vec<_>, _>>()?;
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Load `KEY=value` lines into the process environment. Variables already set
/// in the environment win over the file.
pub fn load_env_file(path: &Path) -> Result<(), String> {
    let text = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in text.lines().enumerate() {
        let Some((key, value)) =
            parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Safe here: called from main before any other thread exists.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name: {:?}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let inner = &raw[1..];
            let end = inner.find(q).ok_or_else(|| "unterminated quoted value".to_string())?;
            let rest = inner[end + 1..].trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err("unexpected characters after closing quote".to_string());
            }
            inner[..end].to_string()
        }
        _ => raw.split(" #").next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}
