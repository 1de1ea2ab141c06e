//! Layered configuration loading with figment.
//!
//! Sources, lowest priority first:
//!
//! | # | Source | Example |
//! |---|--------|---------|
//! | 1 | built-in defaults | |
//! | 2 | [`ConfigLoader::merge`] overrides | |
//! | 3 | profile file | `yuzu.production.toml` |
//! | 4 | main file | `yuzu.toml`, `config.toml` |
//! | 5 | `YUZU_*` variables, `.env` included | `YUZU_BOT__PREFIX=!` |
//!
//! TOML is read with the default `toml-config` feature, YAML (`.yaml`/`.yml`)
//! with `yaml-config`. An explicit [`ConfigLoader::file`] replaces the search.
//! Nested keys are joined with `__`, so `YUZU_PLUGINS__CHAT__DISABLED=true`
//! sets `plugins.chat.disabled`.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new().profile("prod").load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::YuzuConfig;
use super::validation::validate_config;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "YUZU_";

const PROFILE_VAR: &str = "YUZU_PROFILE";

/// File stems searched in each directory, in order.
const FILE_STEMS: [&str; 2] = ["yuzu", "config"];

/// Selects the `yuzu.{profile}.*` file merged under the main file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `YUZU_PROFILE`.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|name| Self::from(name.as_str()))
            .unwrap_or_default()
    }
}

impl From<&str> for Profile {
    fn from(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "dev" | "development" => Self::Development,
            "prod" | "production" => Self::Production,
            _ => Self::Custom(name),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Toml,
    Yaml,
}

impl FileFormat {
    const ALL: [Self; 2] = [Self::Toml, Self::Yaml];

    fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Toml => &["toml"],
            Self::Yaml => &["yaml", "yml"],
        }
    }

    fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&ext.as_str()))
    }

    fn enabled(self) -> bool {
        match self {
            Self::Toml => cfg!(feature = "toml-config"),
            Self::Yaml => cfg!(feature = "yaml-config"),
        }
    }

    #[allow(unused_variables, unreachable_patterns)]
    fn merge(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(Yaml::file(path)),
            _ => figment,
        }
    }
}

/// Builds a [`YuzuConfig`] from defaults, files and the environment.
#[derive(Debug)]
pub struct ConfigLoader {
    profile: Profile,
    search_paths: Vec<PathBuf>,
    file: Option<PathBuf>,
    overrides: Vec<YuzuConfig>,
    env: bool,
    dotenv: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            file: None,
            overrides: Vec::new(),
            env: true,
            dotenv: true,
        }
    }

    /// Sets the profile; `dev` and `prod` are accepted as short forms.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::from(profile.as_ref());
        self
    }

    /// Adds a directory to search. Without any, the working directory and
    /// the user config directory are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds `<config dir>/yuzu`, e.g. `~/.config/yuzu`.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("yuzu")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    /// Ignores both process variables and `.env`.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self.dotenv = false;
        self
    }

    pub fn without_dotenv(mut self) -> Self {
        self.dotenv = false;
        self
    }

    /// Layers `config` over the defaults, below every file.
    pub fn merge(mut self, config: YuzuConfig) -> Self {
        self.overrides.push(config);
        self
    }

    /// Files that will be merged, lowest priority first.
    pub fn files(&self) -> ConfigResult<Vec<PathBuf>> {
        if let Some(path) = &self.file {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            return match FileFormat::of(path) {
                Some(format) if format.enabled() => Ok(vec![path.clone()]),
                _ => Err(ConfigError::UnsupportedFormat(path.clone())),
            };
        }

        let dirs = self.search_dirs();
        let files: Vec<PathBuf> = FileFormat::ALL
            .into_iter()
            .filter(|format| format.enabled())
            .flat_map(|format| self.search(&dirs, format))
            .collect();
        if files.is_empty() {
            debug!(dirs = ?dirs, "No configuration file found, using defaults");
        }
        Ok(files)
    }

    /// Profile and main file of `format` from the first directory holding a
    /// main file. Profile files seen on the way are kept.
    fn search(&self, dirs: &[PathBuf], format: FileFormat) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for dir in dirs {
            for stem in FILE_STEMS {
                for ext in format.extensions() {
                    let profiled = dir.join(format!("{stem}.{}.{ext}", self.profile));
                    if profiled.is_file() {
                        found.push(profiled);
                    }
                    let main = dir.join(format!("{stem}.{ext}"));
                    if main.is_file() {
                        found.push(main);
                        return found;
                    }
                }
            }
        }
        found
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("yuzu")))
            .collect()
    }

    /// The merged sources, before extraction.
    pub fn figment(&self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(YuzuConfig::default()));
        for config in &self.overrides {
            figment = figment.merge(Serialized::defaults(config));
        }

        for path in self.files()? {
            info!(path = %path.display(), "Loading configuration file");
            if let Some(format) = FileFormat::of(&path) {
                figment = format.merge(figment, &path);
            }
        }

        if self.dotenv {
            load_dotenv()?;
        }
        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        Ok(figment)
    }

    /// Extracts and validates the configuration.
    pub fn load(&self) -> ConfigResult<YuzuConfig> {
        let config: YuzuConfig = self.figment()?.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %self.profile,
            level = %config.logging.level,
            prefix = %config.bot.prefix,
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Loads `.env` from the working directory into the process environment.
fn load_dotenv() -> ConfigResult<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "Loaded .env file");
            Ok(())
        }
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
