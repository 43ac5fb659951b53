use std::{
    fmt,
    path::{Path, PathBuf},
};

use reqwest::Url;

use super::{BuildError, BuildId};
use crate::config::BuildConfig;

/// Environment variable that, when set, overrides the build server endpoint.
pub const MAKE_SERVER_ENV: &str = "MAKE_SERVER";

/// Base URL of a build server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(Url);

impl Endpoint {
    /// Parses an `http` or `https` base URL. A bare `host[:port]` is taken to mean `http://host[:port]`.
    pub fn parse(value: &str) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidEndpoint {
            value: value.to_owned(),
            reason,
        };

        let url = if value.contains("://") {
            Url::parse(value)
        } else {
            Url::parse(&format!("http://{value}"))
        }
        .map_err(|error| invalid(error.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }
        if url.cannot_be_a_base() || url.host().is_none() {
            return Err(invalid("missing host".to_owned()));
        }

        Ok(Self(url))
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.0.clone();
        // `parse` rejects urls that cannot be a base, so this always matches.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Where builds are submitted.
    pub fn make_url(&self) -> Url {
        self.join(&["make"])
    }

    /// Where the artifact of a finished build is served.
    pub fn output_url(&self, build_id: &BuildId) -> Url {
        self.join(&["output", build_id.as_str()])
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str().trim_end_matches('/'))
    }
}

/// Build options as given on the command line. Anything left out is derived by [`BuildParams::resolve`].
#[derive(Debug, Default, Clone)]
pub struct BuildParams {
    pub command: Option<String>,
    pub name: Option<String>,
    pub output: Option<PathBuf>,
    pub prefix: Option<String>,
    pub source: Option<PathBuf>,
    pub verbose: bool,
}

/// Process state that feeds into parameter resolution.
#[derive(Debug, Clone)]
pub struct Environment {
    pub make_server: Option<String>,
    pub current_dir: PathBuf,
}

impl Environment {
    pub fn from_process() -> std::io::Result<Self> {
        Ok(Self {
            make_server: std::env::var(MAKE_SERVER_ENV).ok(),
            current_dir: std::env::current_dir()?,
        })
    }
}

/// A fully resolved build. Nothing in here changes once the build starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub command: String,
    pub name: String,
    pub output_path: PathBuf,
    pub install_prefix: String,
    pub source_dir: PathBuf,
    pub endpoint: Endpoint,
    pub verbose: bool,
}

pub fn default_command(prefix: &str) -> String {
    format!("./configure --prefix {prefix} && make install")
}

pub fn default_output(name: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/{name}.tgz"))
}

pub fn default_prefix(name: &str) -> String {
    format!("/app/vendor/{name}")
}

fn dir_name(dir: &Path) -> Option<String> {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn endpoint(config: &BuildConfig, app: &str, make_server: Option<&str>) -> Result<Endpoint, BuildError> {
    match make_server.filter(|value| !value.trim().is_empty()) {
        Some(value) => Endpoint::parse(value.trim()),
        None => match config.host.as_deref() {
            Some(host) => Endpoint::parse(host),
            None => Endpoint::parse(&format!("http://{app}.herokuapp.com")),
        },
    }
}

impl BuildParams {
    /// Fills in every option, preferring explicit values over derived defaults. Fails if no app has
    /// been configured, before anything else is looked at.
    pub fn resolve(self, config: &BuildConfig, env: &Environment) -> Result<BuildRequest, BuildError> {
        let app = config.app.as_deref().ok_or(BuildError::NoApp)?;

        let Self {
            command,
            name,
            output,
            prefix,
            source,
            verbose,
        } = self;

        let name = match name {
            Some(name) => name,
            None => dir_name(&env.current_dir).ok_or_else(|| BuildError::NoName {
                dir: env.current_dir.clone(),
            })?,
        };
        let install_prefix = prefix.unwrap_or_else(|| default_prefix(&name));
        let command = command.unwrap_or_else(|| default_command(&install_prefix));
        let output_path = env
            .current_dir
            .join(output.unwrap_or_else(|| default_output(&name)));
        let source_dir = match source {
            Some(source) => env.current_dir.join(source),
            None => env.current_dir.clone(),
        };
        let endpoint = endpoint(config, app, env.make_server.as_deref())?;

        Ok(BuildRequest {
            command,
            name,
            output_path,
            install_prefix,
            source_dir,
            endpoint,
            verbose,
        })
    }
}
