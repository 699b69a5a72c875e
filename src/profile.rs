//! Profile directory and tool configuration.
//!
//! The profile holds the template cache (`templates/`), repository mirrors
//! (`repos/`) and an optional `config.json`. Each setting resolves as
//! CLI flag > environment variable > `config.json` > built-in default.
use crate::cache::ContentCache;
use crate::process::ToolCommand;
use crate::repository::RepositoryFetcher;
use crate::signing::SigningGateway;
use crate::template::TemplateResolver;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PROFILE_ENV: &str = "THEMIS_PROFILE";
pub const GIT_COMMAND_ENV: &str = "THEMIS_GIT_COMMAND";
pub const SIGNER_COMMAND_ENV: &str = "THEMIS_SIGNER_COMMAND";

const DEFAULT_GIT_COMMAND: &str = "git";
const DEFAULT_SIGNER_COMMAND: &str = "keybase";
const CONFIG_FILENAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    #[serde(default)]
    pub git_command: Option<String>,
    #[serde(default)]
    pub signer_command: Option<String>,
    #[serde(default)]
    pub signing_key_id: Option<String>,
}

/// Command-line overrides that take precedence over the profile.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<PathBuf>,
    pub git_command: Option<String>,
    pub signer_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Profile {
    root: PathBuf,
    config: ProfileConfig,
    overrides: Overrides,
}

impl Profile {
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        let root = resolve_profile_root(overrides.profile.as_deref())?;
        let config = load_config(&root.join(CONFIG_FILENAME))?;
        tracing::debug!(profile = %root.display(), "resolved profile");
        Ok(Self {
            root,
            config,
            overrides,
        })
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn git_command(&self) -> String {
        pick(
            self.overrides.git_command.as_deref(),
            GIT_COMMAND_ENV,
            self.config.git_command.as_deref(),
            DEFAULT_GIT_COMMAND,
        )
    }

    pub fn signer_command(&self) -> String {
        pick(
            self.overrides.signer_command.as_deref(),
            SIGNER_COMMAND_ENV,
            self.config.signer_command.as_deref(),
            DEFAULT_SIGNER_COMMAND,
        )
    }

    /// Signing key: explicit flag, else the profile default, else the
    /// signing service's own default.
    pub fn signing_key_id(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.config.signing_key_id.clone())
    }

    pub fn resolver(&self) -> Result<TemplateResolver> {
        let cache = ContentCache::init(self.templates_dir())
            .with_context(|| format!("open template cache in {}", self.root.display()))?;
        let git = ToolCommand::parse(&self.git_command()).context("parse git command")?;
        Ok(TemplateResolver::new(
            Some(cache),
            RepositoryFetcher::new(git, self.repos_dir()),
        ))
    }

    pub fn signing_gateway(&self) -> Result<SigningGateway> {
        let signer = ToolCommand::parse(&self.signer_command()).context("parse signer command")?;
        Ok(SigningGateway::new(signer))
    }
}

fn pick(explicit: Option<&str>, env_var: &str, configured: Option<&str>, default: &str) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| non_empty_env(env_var))
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| default.to_string())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_profile_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = non_empty_env(PROFILE_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".themis").join("contract"))
}

fn load_config(path: &Path) -> Result<ProfileConfig> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ProfileConfig::default()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}
