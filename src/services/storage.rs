use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::EngineError;

pub const MANIFEST_CACHE: &str = "overlaylex:manifest-cache:v1";
pub const PACKAGE_CACHE: &str = "overlaylex:package-cache:v1";
pub const USER_SWITCHES: &str = "overlaylex:user-switches:v1";
pub const DOMAIN_ALLOWLIST_CACHE: &str = "overlaylex:domain-allowlist-cache:v1";

/// Key/value persistence: one JSON file per storage key, always rewritten
/// as a whole.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LocalStore { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '.' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }

    /// Missing, unreadable or unparsable values fall back to `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }

        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                warn!(key, error = %e, "failed to read storage key");
                return None;
            }
        };

        let (text, _) = encoding_rs::UTF_8.decode_with_bom_removal(&bytes);

        match serde_json::from_str(&text) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "failed to parse storage key, using fallback");
                None
            }
        }
    }

    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.get(key).unwrap_or_default()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(value)?;
        write_atomic(&self.path_for(key), json.as_bytes())
    }

    /// Like [`LocalStore::set`], but a failed write is only logged.
    pub fn set_logged<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.set(key, value) {
            warn!(key, error = %e, "failed to persist storage key");
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let tmp = tmp_path(path);

    if let Some(parent) = tmp.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file_name = match path.file_name().and_then(|s| s.to_str()) {
        Some(n) => n.to_string(),
        None => "store".to_string(),
    };
    p.set_file_name(format!("{file_name}.tmp"));
    p
}
