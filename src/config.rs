//! Settings resolution.
//!
//! Credentials and defaults come from, in increasing precedence:
//! `~/.rackspace_cloud_credentials`, `~/.config/cumulus/config.toml`, then
//! environment variables and flags.

use anyhow::{Context, Result, bail};
use cloudkit::backend::rackspace::{Credentials, IDENTITY_URL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REGION: &str = "DFW";
const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("cumulus"))
}

/// Legacy credentials file shared with other Rackspace tools.
pub fn legacy_credentials_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".rackspace_cloud_credentials"))
}

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub credentials: Option<CredentialsSection>,
    pub region: Option<String>,
    pub identity_url: Option<String>,
    /// Seconds between status checks.
    pub interval: Option<u64>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CredentialsSection {
    pub username: Option<String>,
    pub api_key: Option<String>,
    /// Read the credentials from another file instead.
    pub file: Option<String>,
}

impl FileConfig {
    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config format in {}", path.display()))
    }
}

/// Parse a `[rackspace_cloud]` credentials file.
///
/// ```text
/// [rackspace_cloud]
/// username = demo
/// api_key = 0123456789abcdef
/// ```
pub fn parse_legacy_credentials(content: &str) -> CredentialsSection {
    let mut section = CredentialsSection::default();
    let mut in_section = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_section = line == "[rackspace_cloud]";
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((key, value)) = line.split_once(['=', ':']) else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "username" => section.username = Some(value),
            "api_key" => section.api_key = Some(value),
            _ => {}
        }
    }

    section
}

// ============================================================================
// Resolved settings
// ============================================================================

/// Values supplied on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub region: Option<String>,
    pub username: Option<String>,
    pub api_key: Option<String>,
}

/// Fully resolved settings, built once and passed down by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    pub region: String,
    pub identity_url: String,
    pub interval: Duration,
}

impl Settings {
    /// Resolve settings from the default file locations.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let config_path = match &overrides.config {
            Some(path) => PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref()),
            None => config_dir()?.join("config.toml"),
        };
        let file = FileConfig::load(&config_path)?;

        let legacy_path = match file.credentials.as_ref().and_then(|c| c.file.as_deref()) {
            Some(path) => PathBuf::from(shellexpand::tilde(path).as_ref()),
            None => legacy_credentials_path()?,
        };
        let legacy = if legacy_path.exists() {
            let content = fs::read_to_string(&legacy_path)
                .with_context(|| format!("Could not read {}", legacy_path.display()))?;
            parse_legacy_credentials(&content)
        } else {
            CredentialsSection::default()
        };

        Self::resolve(file, legacy, overrides)
    }

    /// Merge the sources; later sources win.
    pub fn resolve(file: FileConfig, legacy: CredentialsSection, overrides: &Overrides) -> Result<Self> {
        let from_file = file.credentials.unwrap_or_default();

        let username = overrides
            .username
            .clone()
            .or(from_file.username)
            .or(legacy.username);
        let api_key = overrides.api_key.clone().or(from_file.api_key).or(legacy.api_key);

        let (Some(username), Some(api_key)) = (username, api_key) else {
            bail!(
                "No credentials found. Set CUMULUS_USERNAME and CUMULUS_API_KEY, \
                 add [credentials] to ~/.config/cumulus/config.toml, \
                 or create ~/.rackspace_cloud_credentials"
            );
        };

        Ok(Self {
            credentials: Credentials { username, api_key },
            region: overrides
                .region
                .clone()
                .or(file.region)
                .unwrap_or_else(|| DEFAULT_REGION.to_string())
                .to_uppercase(),
            identity_url: file.identity_url.unwrap_or_else(|| IDENTITY_URL.to_string()),
            interval: Duration::from_secs(file.interval.unwrap_or(DEFAULT_INTERVAL_SECS)),
        })
    }

    /// Polling interval, preferring a per-command value.
    pub fn interval_or(&self, seconds: Option<u64>) -> Duration {
        seconds.map_or(self.interval, Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_legacy_credentials() {
        let section = parse_legacy_credentials(
            "[other]\nusername = nope\n\n[rackspace_cloud]\nusername = demo\napi_key = abc123\n",
        );
        assert_eq!(section.username.as_deref(), Some("demo"));
        assert_eq!(section.api_key.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_overrides_win() {
        let file = FileConfig {
            credentials: Some(CredentialsSection {
                username: Some("file-user".to_string()),
                api_key: Some("file-key".to_string()),
                file: None,
            }),
            region: Some("ord".to_string()),
            identity_url: None,
            interval: Some(10),
        };
        let overrides = Overrides {
            username: Some("flag-user".to_string()),
            ..Overrides::default()
        };

        let settings = Settings::resolve(file, CredentialsSection::default(), &overrides).unwrap();

        assert_eq!(settings.credentials.username, "flag-user");
        assert_eq!(settings.credentials.api_key, "file-key");
        assert_eq!(settings.region, "ORD");
        assert_eq!(settings.identity_url, IDENTITY_URL);
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.interval_or(Some(2)), Duration::from_secs(2));
    }

    #[test]
    fn test_legacy_fallback() {
        let legacy = parse_legacy_credentials("[rackspace_cloud]\nusername: demo\napi_key: key\n");
        let settings = Settings::resolve(FileConfig::default(), legacy, &Overrides::default()).unwrap();
        assert_eq!(settings.credentials.username, "demo");
        assert_eq!(settings.region, "DFW");
        assert_eq!(settings.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_credentials() {
        let result = Settings::resolve(
            FileConfig::default(),
            CredentialsSection::default(),
            &Overrides::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "region = \"ord\"\ninterval = 3\n\n[credentials]\nusername = \"demo\"\napi_key = \"k\""
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.region.as_deref(), Some("ord"));
        assert_eq!(config.interval, Some(3));
        assert_eq!(
            config.credentials.and_then(|c| c.username).as_deref(),
            Some("demo")
        );
    }

    #[test]
    fn test_missing_config_file_is_default() {
        let config = FileConfig::load(Path::new("/nonexistent/cumulus/config.toml")).unwrap();
        assert!(config.region.is_none());
    }
}
