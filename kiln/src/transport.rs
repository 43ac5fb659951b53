//! HTTP plumbing between the client and the build server.

#[cfg(test)]
pub(crate) mod stub;

use std::{error::Error, fmt, io, path::Path};

use log::debug;
use reqwest::{
    blocking::{multipart, Client},
    header::HeaderMap,
    Url,
};

use crate::archive::ARCHIVE_FILE_NAME;

/// Response header carrying the identifier of a build, `X-Make-Id` on the wire. Must match the build
/// server exactly. Lowercase because header names are normalized that way.
pub const BUILD_ID_HEADER: &str = "x-make-id";

/// The fields of a build submission.
#[derive(Debug, Clone, Copy)]
pub struct BuildForm<'a> {
    pub archive: &'a Path,
    pub command: &'a str,
    pub prefix: &'a str,
}

/// The response to a build submission. The body is live: reading it blocks until the server sends
/// more output.
pub struct BuildResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Box<dyn io::Read>,
}

impl fmt::Debug for BuildResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum TransportError {
    /// The server could not be reached or dropped the connection.
    Connect(Box<dyn Error + Send + Sync>),
    /// The server answered with a non-success status.
    Status(u16),
    /// Local I/O failed, for example reading the archive or writing the artifact.
    Io(io::Error),
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(error) => write!(f, "connection failed: {error}"),
            TransportError::Status(status) => write!(f, "server responded with status {status}"),
            TransportError::Io(error) => write!(f, "{error}"),
            TransportError::Other(error) => write!(f, "{error}"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Connect(error) | TransportError::Other(error) => Some(error.as_ref()),
            TransportError::Io(error) => Some(error),
            TransportError::Status(_) => None,
        }
    }
}

/// Whether an I/O error means the connection to the server is gone.
pub fn is_connection_lost(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let lost = {
            let mut source = error.source();
            let mut lost = false;
            while let Some(cause) = source {
                if let Some(io_error) = cause.downcast_ref::<io::Error>() {
                    lost |= is_connection_lost(io_error);
                }
                source = cause.source();
            }
            lost
        };

        if error.is_connect() || lost {
            TransportError::Connect(error.into())
        } else if let Some(status) = error.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Other(error.into())
        }
    }
}

/// The two requests the client makes against a build server.
pub trait Transport {
    /// Sends a single multipart build request. No retries.
    fn submit(&self, url: &Url, form: BuildForm<'_>) -> Result<BuildResponse, TransportError>;

    /// Requests `url` and returns the body of a successful response.
    fn fetch(&self, url: &Url) -> Result<Box<dyn io::Read>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            // Remote builds take as long as they take.
            .timeout(None)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn submit(&self, url: &Url, form: BuildForm<'_>) -> Result<BuildResponse, TransportError> {
        let BuildForm {
            archive,
            command,
            prefix,
        } = form;

        let code = multipart::Part::file(archive)
            .map_err(TransportError::Io)?
            .file_name(ARCHIVE_FILE_NAME)
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new()
            .part("code", code)
            .text("command", command.to_owned())
            .text("prefix", prefix.to_owned());

        debug!("POST {url}");
        let response = self
            .client
            .post(url.clone())
            .multipart(form)
            .send()
            .map_err(|error| {
                // The archive is streamed, so a refused or dropped connection can surface as a
                // failure to send the request body rather than as a connect error.
                if error.is_connect() || error.is_request() || error.is_body() {
                    TransportError::Connect(error.into())
                } else {
                    TransportError::from(error)
                }
            })?;
        let status = response.status().as_u16();
        debug!("POST {url} responded with status {status}");

        Ok(BuildResponse {
            status,
            headers: response.headers().clone(),
            body: Box::new(response),
        })
    }

    fn fetch(&self, url: &Url) -> Result<Box<dyn io::Read>, TransportError> {
        debug!("GET {url}");
        let response = self.client.get(url.clone()).send()?;
        let status = response.status();
        debug!("GET {url} responded with status {status}");
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(Box::new(response))
    }
}
