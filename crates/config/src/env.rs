use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use listsync_common::error::{ListsyncError, ListsyncResult};
use listsync_common::job_id::validate_job_id;
use serde::Deserialize;

/// Source of configuration values, keyed by variable name.
///
/// `from_env` constructors pass [`process_env`]; tests pass a map.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Build a [`Lookup`]-compatible closure over a fixed set of pairs.
pub fn map_lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Once,
    Daemon,
}

impl FromStr for RunMode {
    type Err = ListsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(Self::Once),
            "daemon" => Ok(Self::Daemon),
            other => Err(ListsyncError::Config(format!(
                "unknown run mode '{other}', expected 'once' or 'daemon'"
            ))),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => f.write_str("once"),
            Self::Daemon => f.write_str("daemon"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub mode: RunMode,
    pub job_ids: Vec<String>,
    pub period_secs: u64,
    pub state_dir: PathBuf,
    pub health_addr: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> ListsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> ListsyncResult<Self> {
        Ok(Self {
            mode: get_var_or(lookup, "IMPORTER_MODE", "once").parse()?,
            job_ids: parse_job_ids(lookup, "IMPORTER_JOB_IDS")?,
            period_secs: parse_positive_or(lookup, "IMPORTER_PERIOD_SECS", 60)?,
            state_dir: PathBuf::from(get_var_or(lookup, "IMPORTER_STATE_DIR", "./data")),
            health_addr: lookup("IMPORTER_HEALTH_ADDR").filter(|v| !v.trim().is_empty()),
            log_level: get_var_or(lookup, "LOG_LEVEL", "info"),
        })
    }
}

/// Read a required, non-empty variable.
pub fn get_var(lookup: Lookup<'_>, key: &str) -> ListsyncResult<String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ListsyncError::Config(format!("{key} is required but not set")))
}

pub fn get_var_or(lookup: Lookup<'_>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_owned())
}

/// Parse an optional variable, falling back to `default` when unset.
/// A value that is set but does not parse is a configuration error.
pub fn parse_var_or<T>(lookup: Lookup<'_>, key: &str, default: T) -> ListsyncResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ListsyncError::Config(format!("invalid {key}: {e}"))),
        None => Ok(default),
    }
}

/// Like [`parse_var_or`], but rejects zero.
pub fn parse_positive_or<T>(lookup: Lookup<'_>, key: &str, default: T) -> ListsyncResult<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let value = parse_var_or(lookup, key, default)?;
    if value <= T::default() {
        return Err(ListsyncError::Config(format!("{key} must be at least 1")));
    }
    Ok(value)
}

/// Parse a comma-separated list from a variable.
/// Returns `Err` if the var is missing or all entries are blank after trimming.
pub fn parse_csv(lookup: Lookup<'_>, key: &str) -> ListsyncResult<Vec<String>> {
    let raw = lookup(key)
        .ok_or_else(|| ListsyncError::Config(format!("{key} is required but not set")))?;

    let mut items: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !items.iter().any(|existing| existing == item) {
            items.push(item.to_owned());
        }
    }

    if items.is_empty() {
        return Err(ListsyncError::Config(format!(
            "{key} is set but contains no values"
        )));
    }

    Ok(items)
}

/// Parse the job identifier list, rejecting any id unusable as a state file name.
fn parse_job_ids(lookup: Lookup<'_>, key: &str) -> ListsyncResult<Vec<String>> {
    let ids = parse_csv(lookup, key)?;
    for id in &ids {
        validate_job_id(id).map_err(|e| ListsyncError::Config(format!("{key}: {e}")))?;
    }
    Ok(ids)
}
