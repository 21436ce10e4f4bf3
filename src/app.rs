use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, Result};
use crate::identity::{Identity, is_email_shaped};
use crate::utils::normalize_url;

pub const DEFAULT_POLL_SECS: u64 = 15;

fn default_poll() -> u64 {
    DEFAULT_POLL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Re-fetch interval for the open conversation; 0 disables polling.
    #[serde(default = "default_poll")]
    pub poll_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            email: String::new(),
            username: None,
            token: None,
            poll_interval_secs: DEFAULT_POLL_SECS,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("org", "orchid", "orchid")?;
        Some(proj.config_dir().join("orchid.toml"))
    }

    /// Reads the settings file and applies environment overrides. A missing
    /// or broken file yields defaults.
    pub fn load() -> Self {
        let mut settings = Self::config_path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default();
        settings.apply_env(|key| env::var(key).ok());
        settings
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<Settings>(&text) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("ignoring unreadable settings {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                log::debug!("no settings at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ORCHID_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("ORCHID_EMAIL") {
            self.email = v;
        }
        if let Some(v) = lookup("ORCHID_USERNAME") {
            self.username = Some(v);
        }
        if let Some(v) = lookup("ORCHID_TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = lookup("ORCHID_POLL_SECS") {
            match v.parse() {
                Ok(secs) => self.poll_interval_secs = secs,
                Err(_) => log::warn!("ORCHID_POLL_SECS={v} is not a number; keeping {}", self.poll_interval_secs),
            }
        }
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path().ok_or_else(|| ClientError::Config("no config dir".into()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Authenticated context for one run: where to talk to and as whom.
#[derive(Debug, Clone)]
pub struct Session {
    base_url: Url,
    token: Option<String>,
    identity: Identity,
}

impl Session {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.base_url.trim().is_empty() || settings.email.trim().is_empty() {
            return Err(ClientError::NotLoggedIn);
        }
        if !is_email_shaped(&settings.email) {
            return Err(ClientError::Config(format!("{} is not an email address", settings.email)));
        }
        let mut base = normalize_url(&settings.base_url);
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            base_url: Url::parse(&base)?,
            token: settings.token.clone().filter(|t| !t.is_empty()),
            identity: Identity::new(&settings.email, settings.username.as_deref()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}
