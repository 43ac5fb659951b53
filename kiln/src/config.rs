use std::{
    collections::BTreeMap,
    fmt, io,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::Serialize;
use serde_yaml::Value;

/// Name of the config file in the user's home directory.
pub const CONFIG_FILE_NAME: &str = ".kiln";

/// Connection parameters shared between invocations.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BuildConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Keys we do not know about. Kept so that merging never drops them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BuildConfig {
    /// Overlays every field that is set in `partial` onto `self`.
    pub fn overlay(&mut self, partial: &BuildConfig) {
        fn set(
            extra: &mut BTreeMap<String, Value>,
            key: &str,
            target: &mut Option<String>,
            value: &Option<String>,
        ) {
            if let Some(value) = value {
                // A known key that was stored with an unusable value sits in `extra`.
                extra.remove(key);
                *target = Some(value.clone());
            }
        }

        set(&mut self.extra, "app", &mut self.app, &partial.app);
        set(&mut self.extra, "host", &mut self.host, &partial.host);
        set(&mut self.extra, "secret", &mut self.secret, &partial.secret);
        self.extra
            .extend(partial.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Parses a config file, treating anything that is not a mapping as empty. Known keys take
    /// any scalar value in its string form. Whatever else is stored ends up in `extra`.
    fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        let mapping = match serde_yaml::from_str::<Value>(contents)? {
            Value::Mapping(mapping) => mapping,
            _ => return Ok(Self::default()),
        };

        let mut config = Self::default();
        for (key, value) in mapping {
            let Some(key) = scalar_string(&key) else {
                debug!("skipping config entry with non-scalar key {key:?}");
                continue;
            };
            let field = match key.as_str() {
                "app" => Some(&mut config.app),
                "host" => Some(&mut config.host),
                "secret" => Some(&mut config.secret),
                _ => None,
            };
            match (field, value) {
                (Some(_), Value::Null) => {}
                (Some(field), value) => match scalar_string(&value) {
                    Some(value) => *field = Some(value),
                    None => {
                        config.extra.insert(key, value);
                    }
                },
                (None, value) => {
                    config.extra.insert(key, value);
                }
            }
        }
        Ok(config)
    }

    /// A copy with the secret masked, for showing to the user.
    pub fn redacted(&self) -> Self {
        Self {
            secret: self.secret.as_ref().map(|_| "********".to_owned()),
            ..self.clone()
        }
    }
}

/// The string form of a plain scalar, `None` for anything structured.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    NoHomeDir,
    Serialize(serde_yaml::Error),
    Write { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoHomeDir => write!(f, "failed to determine home directory"),
            ConfigError::Serialize(error) => write!(f, "failed to serialize config: {error}"),
            ConfigError::Write { path, source } => {
                write!(f, "failed to write config to {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::NoHomeDir => None,
            ConfigError::Serialize(error) => Some(error),
            ConfigError::Write { source, .. } => Some(source),
        }
    }
}

pub trait ConfigStore {
    /// Returns the stored config. Never fails: a missing or malformed store reads as empty.
    fn load(&self) -> BuildConfig;

    /// Overlays `partial` onto the stored config and persists the union.
    fn merge(&self, partial: &BuildConfig) -> Result<(), ConfigError>;
}

/// Stores the config as YAML in a single file. Reads and writes are not synchronized between
/// processes, the last writer wins.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store at `~/.kiln`.
    pub fn user_default() -> Result<Self, ConfigError> {
        let home_dir = home::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::new(home_dir.join(CONFIG_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> BuildConfig {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("no config at {}", self.path.display());
                return BuildConfig::default();
            }
            Err(error) => {
                warn!(
                    "Ignoring unreadable config at {}: {error}",
                    self.path.display()
                );
                return BuildConfig::default();
            }
        };

        BuildConfig::parse(&contents).unwrap_or_else(|error| {
            warn!("Ignoring invalid config at {}: {error}", self.path.display());
            BuildConfig::default()
        })
    }

    fn merge(&self, partial: &BuildConfig) -> Result<(), ConfigError> {
        let mut config = self.load();
        config.overlay(partial);

        let contents = serde_yaml::to_string(&config).map_err(ConfigError::Serialize)?;
        std::fs::write(&self.path, contents).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!("wrote config to {}", self.path.display());
        Ok(())
    }
}

/// Keeps the config in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryConfigStore(std::cell::RefCell<BuildConfig>);

#[cfg(test)]
impl MemoryConfigStore {
    pub fn new(config: BuildConfig) -> Self {
        Self(std::cell::RefCell::new(config))
    }
}

#[cfg(test)]
impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> BuildConfig {
        self.0.borrow().clone()
    }

    fn merge(&self, partial: &BuildConfig) -> Result<(), ConfigError> {
        self.0.borrow_mut().overlay(partial);
        Ok(())
    }
}
