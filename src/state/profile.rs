//! Client profiles: one TOML file per profile in the profiles directory.

use std::fs;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Launch description of one game client, as shown in the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub title: String,
    pub version: String,
    #[serde(default)]
    pub asset_index: String,
    /// Update set holding the client files
    pub dir: String,
    /// Update set holding the assets
    pub asset_dir: String,
    #[serde(default)]
    pub sort_index: i32,
    pub server_address: String,
    pub server_port: u16,
    #[serde(default)]
    pub update: Vec<String>,
    #[serde(default)]
    pub update_verify: Vec<String>,
    #[serde(default)]
    pub update_exclusions: Vec<String>,
    #[serde(default)]
    pub update_fast_check: bool,
    pub main_class: String,
    #[serde(default)]
    pub class_path: Vec<String>,
    #[serde(default)]
    pub jvm_args: Vec<String>,
    #[serde(default)]
    pub client_args: Vec<String>,
}

impl Profile {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ServerError::ConfigError(format!("Malformed profile: {e}")))
    }

    /// Parse and validate a profile file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let profile = Self::from_toml(&content)
            .map_err(|e| ServerError::ConfigError(format!("{}: {e}", path.display())))?;
        profile
            .verify()
            .map_err(|e| ServerError::ConfigError(format!("{}: {e}", path.display())))?;
        Ok(profile)
    }

    /// Launcher display order: `sort_index`, then `title`. Not a total order
    /// over profiles, two different profiles may share a key.
    pub fn sort_key(&self) -> (i32, &str) {
        (self.sort_index, &self.title)
    }

    /// Structural checks; the first failure is reported.
    pub fn verify(&self) -> std::result::Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title can't be empty".into());
        }
        if self.version.trim().is_empty() {
            return Err("version can't be empty".into());
        }
        if self.main_class.trim().is_empty() {
            return Err("main class can't be empty".into());
        }
        if self.server_address.trim().is_empty() {
            return Err("server address can't be empty".into());
        }
        if self.server_port == 0 {
            return Err("server port must be non-zero".into());
        }
        verify_dir_name(&self.dir, "dir")?;
        verify_dir_name(&self.asset_dir, "asset_dir")?;
        Ok(())
    }
}

fn verify_dir_name(name: &str, field: &str) -> std::result::Result<(), String> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.starts_with('.') => Ok(()),
        _ => Err(format!("{field} must be a plain directory name, got '{name}'")),
    }
}
