//! Runs a build against a remote build server: package the source, upload it, stream the build
//! output, and download the artifact.

mod params;
mod stage;

use std::{
    error::Error,
    fmt,
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use reqwest::{header::HeaderMap, Url};

pub use params::*;
pub use stage::*;

use crate::{
    archive::{self, Archive, ArchiveError},
    config::ConfigStore,
    process::Runner,
    transport::{self, BuildForm, BuildResponse, Transport, TransportError, BUILD_ID_HEADER},
};

/// Upper bound on the size of a single chunk of build output forwarded to the console.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Identifies one build on the build server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildId(String);

impl BuildId {
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        (!value.is_empty()).then_some(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors that end a build.
#[derive(Debug)]
pub enum BuildError {
    NoApp,
    NoName {
        dir: PathBuf,
    },
    InvalidEndpoint {
        value: String,
        reason: String,
    },
    Archive(ArchiveError),
    Connection {
        endpoint: Endpoint,
        source: Box<dyn Error + Send + Sync>,
    },
    Upload {
        endpoint: Endpoint,
        source: TransportError,
    },
    MissingBuildId,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::NoApp => write!(f, "need a server first, use kiln create"),
            BuildError::NoName { dir } => write!(
                f,
                "can not derive a library name from {}, pass --name",
                dir.display()
            ),
            BuildError::InvalidEndpoint { value, reason } => {
                write!(f, "invalid build server `{value}`: {reason}")
            }
            BuildError::Archive(error) => write!(f, "{error}"),
            BuildError::Connection { endpoint, .. } => {
                write!(f, "could not connect to build server: {endpoint}")
            }
            BuildError::Upload { endpoint, source } => {
                write!(f, "failed to upload build to {endpoint}: {source}")
            }
            BuildError::MissingBuildId => write!(f, "unknown error, no build output given"),
        }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BuildError::Archive(error) => Some(error),
            BuildError::Connection { source, .. } => Some(source.as_ref()),
            BuildError::Upload { source, .. } => Some(source),
            BuildError::NoApp
            | BuildError::NoName { .. }
            | BuildError::InvalidEndpoint { .. }
            | BuildError::MissingBuildId => None,
        }
    }
}

impl From<ArchiveError> for BuildError {
    fn from(error: ArchiveError) -> Self {
        BuildError::Archive(error)
    }
}

/// The artifact of a finished build could not be downloaded. The build itself succeeded, the
/// download can be retried by hand.
#[derive(Debug)]
pub struct DownloadError {
    pub url: Url,
    pub output_path: PathBuf,
    pub source: TransportError,
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not download build artifacts from {url} to {output}: {source}",
            url = self.url,
            output = self.output_path.display(),
            source = self.source
        )
    }
}

impl Error for DownloadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// A build that produced a build id. `warning` is set when the artifact could not be downloaded.
#[derive(Debug)]
pub struct BuildOutcome {
    pub build_id: BuildId,
    pub output_path: PathBuf,
    pub warning: Option<DownloadError>,
}

/// Reads the build id the server assigned from the response headers.
pub fn resolve_build_id(headers: &HeaderMap) -> Result<BuildId, BuildError> {
    headers
        .get(BUILD_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| BuildId::new(value.trim()))
        .ok_or(BuildError::MissingBuildId)
}

/// Drives a single build through [`Stage`]s in order. Every step runs at most once, nothing is
/// retried.
pub struct Builder<'a> {
    runner: &'a dyn Runner,
    transport: &'a dyn Transport,
    config: &'a dyn ConfigStore,
    console: &'a mut dyn Write,
    stages: Vec<Stage>,
}

impl<'a> Builder<'a> {
    pub fn new(
        runner: &'a dyn Runner,
        transport: &'a dyn Transport,
        config: &'a dyn ConfigStore,
        console: &'a mut dyn Write,
    ) -> Self {
        Self {
            runner,
            transport,
            config,
            console,
            stages: Vec::new(),
        }
    }

    /// The stages entered by the last call to [`Builder::run`]. When the build failed, the last
    /// stage is the one that failed.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn enter(&mut self, stage: Stage) {
        let current = self.stages.last().copied();
        debug_assert!(
            Stage::can_enter(current, stage),
            "illegal build stage transition from {current:?} to {stage:?}"
        );
        debug!("entering stage {stage}");
        self.stages.push(stage);
    }

    pub fn run(&mut self, params: BuildParams, env: &Environment) -> Result<BuildOutcome, BuildError> {
        self.stages.clear();

        self.enter(Stage::ResolvingParams);
        let request = params.resolve(&self.config.load(), env)?;
        debug!("resolved build request: {request:?}");

        self.enter(Stage::Packaging);
        info!("Packaging local directory");
        debug!(
            "packaging {} from {}",
            request.name,
            request.source_dir.display()
        );
        let archive = archive::pack(self.runner, &request.source_dir)?;

        self.enter(Stage::Uploading);
        let BuildResponse {
            status,
            headers,
            body,
        } = self.upload(&request, &archive)?;
        debug!("build server responded with status {status}");
        // The archive was sent in full before the server responded.
        drop(archive);

        self.enter(Stage::StreamingOutput);
        let streamed = self.stream(&request, body)?;
        debug!("received {streamed} bytes of build output");

        self.enter(Stage::ResolvingId);
        let build_id = resolve_build_id(&headers)?;
        debug!("build id: {build_id}");

        self.enter(Stage::Downloading);
        let url = request.endpoint.output_url(&build_id);
        info!(
            "Downloading build artifacts to: {}",
            request.output_path.display()
        );
        let warning = match self.download(&url, &request.output_path) {
            Ok(bytes) => {
                debug!("downloaded {bytes} bytes from {url}");
                None
            }
            Err(error) => {
                warn!("{error}");
                Some(error)
            }
        };

        self.enter(Stage::Done);
        Ok(BuildOutcome {
            build_id,
            output_path: request.output_path,
            warning,
        })
    }

    fn upload(&self, request: &BuildRequest, archive: &Archive) -> Result<BuildResponse, BuildError> {
        info!("Uploading code for build");
        if let Ok(size) = archive.size() {
            debug!("archive size: {size} bytes");
        }
        info!("Building with: {}", request.command);

        self.transport
            .submit(
                &request.endpoint.make_url(),
                BuildForm {
                    archive: archive.path(),
                    command: &request.command,
                    prefix: &request.install_prefix,
                },
            )
            .map_err(|error| match error {
                TransportError::Connect(source) => BuildError::Connection {
                    endpoint: request.endpoint.clone(),
                    source,
                },
                source => BuildError::Upload {
                    endpoint: request.endpoint.clone(),
                    source,
                },
            })
    }

    /// Reads the build output as it arrives. It is forwarded to the console chunk by chunk when
    /// the request is verbose and drained otherwise. If the console goes away the rest of the
    /// output is drained so the build can still finish.
    fn stream(&mut self, request: &BuildRequest, mut body: Box<dyn Read>) -> Result<u64, BuildError> {
        let mut buffer = vec![0; CHUNK_SIZE];
        let mut total = 0;
        let mut forward = request.verbose;
        loop {
            let read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    return Err(BuildError::Connection {
                        endpoint: request.endpoint.clone(),
                        source: error.into(),
                    })
                }
            };
            total += read as u64;
            if forward {
                if let Err(error) = self
                    .console
                    .write_all(&buffer[..read])
                    .and_then(|()| self.console.flush())
                {
                    warn!("Failed to write build output, no longer showing it: {error}");
                    forward = false;
                }
            }
        }
        Ok(total)
    }

    /// Writes the artifact at `url` to `output_path`. The file is only touched once the server
    /// has answered successfully.
    fn download(&self, url: &Url, output_path: &Path) -> Result<u64, DownloadError> {
        let fail = |source: TransportError| DownloadError {
            url: url.clone(),
            output_path: output_path.to_owned(),
            source,
        };

        let mut body = self.transport.fetch(url).map_err(fail)?;
        let mut file = File::create(output_path).map_err(|error| fail(TransportError::Io(error)))?;
        io::copy(&mut body, &mut file).map_err(|error| {
            fail(if transport::is_connection_lost(&error) {
                TransportError::Connect(error.into())
            } else {
                TransportError::Io(error)
            })
        })
    }
}
