mod build;
mod config;
mod server;

use std::fmt;

use clap::{Parser, Subcommand};
use log::warn;

use crate::{
    config::FileConfigStore,
    process::SystemRunner,
    provision::HerokuProvisioner,
    temp_dir, Result,
};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a piece of software on the build server. If no command is given, a sensible default
    /// is chosen for you.
    Build(build::BuildArgs),

    /// Create a build server on Heroku
    #[command(arg_required_else_help = true)]
    Create(server::CreateArgs),

    /// Update the build server
    Update(server::UpdateArgs),

    /// Show the stored configuration
    Config,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        if let Err(error) = temp_dir::install_interrupt_handler() {
            warn!("Unable to install interrupt handler, temporary files may be left behind: {error}");
        }

        let store = FileConfigStore::user_default()?;

        match self.command {
            Commands::Build(args) => {
                build::build(&store, args)?;
            }
            Commands::Create(args) => {
                server::create(&store, &HerokuProvisioner::new(&SystemRunner), args)?;
            }
            Commands::Update(args) => {
                server::update(&store, &HerokuProvisioner::new(&SystemRunner), args)?;
            }
            Commands::Config => {
                config::show(&store)?;
            }
        }

        Ok(())
    }
}

/// The line printed on stderr when a command fails.
pub fn error_line(error: &dyn fmt::Display) -> String {
    format!("!! {error}")
}
