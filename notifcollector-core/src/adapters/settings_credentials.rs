//! Credential supplier backed by settings.json
//!
//! The token is re-read on every call so a login performed by another
//! process (or an edited settings file) takes effect on the next flush.

use std::path::PathBuf;

use crate::config::Config;
use crate::ports::{Credential, CredentialProvider};

pub struct SettingsCredentialProvider {
    data_dir: PathBuf,
}

impl SettingsCredentialProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl CredentialProvider for SettingsCredentialProvider {
    fn credential(&self) -> Option<Credential> {
        match Config::load(&self.data_dir) {
            Ok(config) => config.access_token.map(Credential::new),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read credential from settings");
                None
            }
        }
    }
}

/// Fixed credential, for embedding and tests
pub struct StaticCredentialProvider(Option<Credential>);

impl StaticCredentialProvider {
    pub fn new(token: Option<&str>) -> Self {
        Self(token.map(Credential::new))
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credential(&self) -> Option<Credential> {
        self.0.clone()
    }
}
