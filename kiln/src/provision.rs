//! Setting up the remote build server on a hosting platform.

mod heroku;

use std::{fmt, io, path::PathBuf};

pub use heroku::*;

use crate::process;

/// A freshly created hosting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub app: String,
    /// Host, and port if non-default, under which the application is reachable.
    pub host: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Deployment<'a> {
    pub app: &'a str,
    pub secret: &'a str,
    /// Directory holding the build server codebase.
    pub server_source: &'a std::path::Path,
}

#[derive(Debug)]
pub enum ProvisionError {
    MissingServerSource(PathBuf),
    Process(process::Error),
    Io(io::Error),
    InvalidOutput(String),
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionError::MissingServerSource(path) => write!(
                f,
                "build server source {} is not a directory",
                path.display()
            ),
            ProvisionError::Process(error) => write!(f, "{error}"),
            ProvisionError::Io(error) => write!(f, "{error}"),
            ProvisionError::InvalidOutput(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProvisionError::Process(error) => Some(error),
            ProvisionError::Io(error) => Some(error),
            ProvisionError::MissingServerSource(_) | ProvisionError::InvalidOutput(_) => None,
        }
    }
}

impl From<process::Error> for ProvisionError {
    fn from(error: process::Error) -> Self {
        ProvisionError::Process(error)
    }
}

impl From<io::Error> for ProvisionError {
    fn from(error: io::Error) -> Self {
        ProvisionError::Io(error)
    }
}

pub trait Provisioner {
    /// Creates the application that will host the build server.
    fn create_app(&self, name: &str) -> Result<AppInfo, ProvisionError>;

    /// Deploys the build server codebase to the application and configures it with the shared
    /// secret.
    fn deploy(&self, deployment: Deployment<'_>) -> Result<(), ProvisionError>;
}
