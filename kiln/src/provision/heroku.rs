use log::{debug, info};
use reqwest::Url;

use super::{AppInfo, Deployment, ProvisionError, Provisioner};
use crate::{
    process::{self, Runner},
    temp_dir::TempDir,
};

pub const HEROKU_STACK: &str = "heroku-22";

const GITIGNORE: &str = ".env\nnode_modules\n";

/// Provisions the build server on Heroku through the `heroku` and `git` command line tools.
pub struct HerokuProvisioner<'a> {
    runner: &'a dyn Runner,
}

impl<'a> HerokuProvisioner<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Reads the host out of the `web_url=...` line printed by `heroku apps:info --shell`.
    fn web_host(&self, app: &str) -> Result<Option<String>, ProvisionError> {
        let output = self
            .runner
            .output(process::command!("heroku", "apps:info", "--app", app, "--shell"))?;
        let stdout = output
            .stdout_str()
            .map_err(|error| ProvisionError::InvalidOutput(format!("heroku output: {error}")))?;

        Ok(stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix("web_url="))
            .and_then(|value| Url::parse(value).ok())
            .and_then(|url| {
                let host = url.host_str()?.to_owned();
                Some(match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                })
            }))
    }

    fn api_key(&self) -> Result<String, ProvisionError> {
        let output = self
            .runner
            .output(process::command!("heroku", "auth:token"))?;
        let token = output
            .stdout_str()
            .map_err(|error| ProvisionError::InvalidOutput(format!("heroku output: {error}")))?;
        if token.is_empty() {
            return Err(ProvisionError::InvalidOutput(
                "`heroku auth:token` printed nothing, are you logged in?".to_owned(),
            ));
        }
        Ok(token.to_owned())
    }
}

pub fn git_url(app: &str) -> String {
    format!("https://git.heroku.com/{app}.git")
}

impl Provisioner for HerokuProvisioner<'_> {
    fn create_app(&self, name: &str) -> Result<AppInfo, ProvisionError> {
        // Run outside of the user's working directory so heroku does not add a git remote to
        // whatever repository they happen to be in.
        let scratch = TempDir::new("kiln-create-")?;
        self.runner.status(
            process::command!("heroku", "create", name, "--stack", HEROKU_STACK)
                .current_dir(scratch.path()),
        )?;

        let host = match self.web_host(name)? {
            Some(host) => host,
            None => format!("{name}.herokuapp.com"),
        };
        debug!("app {name} is served from {host}");

        Ok(AppInfo {
            app: name.to_owned(),
            host,
        })
    }

    fn deploy(&self, deployment: Deployment<'_>) -> Result<(), ProvisionError> {
        let Deployment {
            app,
            secret,
            server_source,
        } = deployment;

        if !server_source.is_dir() {
            return Err(ProvisionError::MissingServerSource(server_source.to_owned()));
        }

        let api_key = self.api_key()?;

        let repo = TempDir::new("kiln-deploy-")?;
        let git = |command: process::Command| command.current_dir(repo.path());

        info!("Preparing build server from {}", server_source.display());
        self.runner
            .output(git(process::command!("git", "init", "--quiet")))?;
        self.runner.output(process::command!(
            "cp",
            "-R",
            server_source.join("."),
            repo.path()
        ))?;
        std::fs::write(repo.path().join(".gitignore"), GITIGNORE)?;
        self.runner
            .output(git(process::command!("git", "add", "--all")))?;
        self.runner.output(git(process::command!(
            "git",
            "-c",
            "user.name=kiln",
            "-c",
            "user.email=kiln@localhost",
            "commit",
            "--quiet",
            "--message",
            "Deploy build server",
        )))?;

        info!("Pushing build server to {app}");
        self.runner.status(git(process::command!(
            "git",
            "push",
            "--force",
            git_url(app),
            "HEAD:main",
        )))?;

        info!("Configuring build server {app}");
        // Captured rather than inherited, `config:set` echoes the values back.
        self.runner.output(process::command!(
            "heroku",
            "config:set",
            "--app",
            app,
            format!("SECRET={secret}"),
            "SPAWN_ENV=heroku",
            format!("HEROKU_APP={app}"),
            format!("HEROKU_API_KEY={api_key}"),
        ))?;

        Ok(())
    }
}
