use std::{
    io::{self, Write},
    path::PathBuf,
};

use clap::Args;
use constcat::concat;
use log::{debug, info, warn};

use crate::{
    build::{BuildParams, Builder, Environment, MAKE_SERVER_ENV},
    config::ConfigStore,
    process::{Runner, SystemRunner},
    transport::{HttpTransport, Transport},
    Result,
};

#[derive(Debug, Args)]
#[command(after_help = concat!(
    "The build server is the configured host unless the `",
    MAKE_SERVER_ENV,
    "` environment variable is set."
))]
pub struct BuildArgs {
    /// The command to run for compilation.
    #[arg(short = 'c', long = "command")]
    pub command: Option<String>,

    /// The name of the library, defaults to the name of the current directory.
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,

    /// Write the build artifacts to this file, defaults to `/tmp/<name>.tgz`.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// The build/install `--prefix` of the software, defaults to `/app/vendor/<name>`.
    #[arg(short = 'p', long = "prefix")]
    pub prefix: Option<String>,

    /// The source directory to build from, defaults to the current directory.
    #[arg(short = 's', long = "source")]
    pub source: Option<PathBuf>,

    /// Show the full build output.
    #[arg(short = 'v', long = "verbose", default_value_t)]
    pub verbose: bool,
}

impl From<BuildArgs> for BuildParams {
    fn from(args: BuildArgs) -> Self {
        let BuildArgs {
            command,
            name,
            output,
            prefix,
            source,
            verbose,
        } = args;
        BuildParams {
            command,
            name,
            output,
            prefix,
            source,
            verbose,
        }
    }
}

pub fn build(store: &dyn ConfigStore, args: BuildArgs) -> Result<()> {
    let env = Environment::from_process()?;
    let transport = HttpTransport::new()?;
    let mut console = io::stdout().lock();

    run(&SystemRunner, &transport, store, &mut console, args.into(), &env)
}

/// Runs one build. A failed artifact download is only reported, the command still succeeds.
fn run(
    runner: &dyn Runner,
    transport: &dyn Transport,
    store: &dyn ConfigStore,
    console: &mut dyn Write,
    params: BuildParams,
    env: &Environment,
) -> Result<()> {
    let mut builder = Builder::new(runner, transport, store, console);
    let result = builder.run(params, env);
    debug!("build went through stages {:?}", builder.stages());
    let outcome = result?;

    match outcome.warning {
        Some(warning) => warn!(
            "Build {id} finished but its artifacts were not downloaded, fetch {url} manually",
            id = outcome.build_id,
            url = warning.url
        ),
        None => info!(
            "Build {id} finished, artifacts written to {path}",
            id = outcome.build_id,
            path = outcome.output_path.display()
        ),
    }

    Ok(())
}
