pub(crate) mod archive;
pub(crate) mod build;
pub(crate) mod config;
pub(crate) mod process;
pub(crate) mod provision;
pub(crate) mod temp_dir;
pub(crate) mod transport;

pub mod cli;

pub(crate) type Result<T, E = Box<dyn std::error::Error + Send + Sync + 'static>> =
    std::result::Result<T, E>;
