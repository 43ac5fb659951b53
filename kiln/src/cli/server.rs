use std::path::PathBuf;

use clap::Args;
use log::info;
use rand::distributions::{Alphanumeric, DistString};

use crate::{
    config::{BuildConfig, ConfigStore},
    provision::{AppInfo, Deployment, Provisioner},
    Result,
};

const SECRET_LEN: usize = 40;

#[derive(Debug, Args)]
pub struct ServerSourceArgs {
    /// Directory containing the build server codebase to deploy.
    #[arg(long = "server-source", value_name = "DIR")]
    pub server_source: PathBuf,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Name of the Heroku app to create.
    pub app_name: String,

    #[command(flatten)]
    pub server: ServerSourceArgs,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub server: ServerSourceArgs,
}

fn generate_secret() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), SECRET_LEN)
}

pub fn create(store: &dyn ConfigStore, provisioner: &dyn Provisioner, args: CreateArgs) -> Result<()> {
    let CreateArgs { app_name, server } = args;

    info!("Creating app {app_name}");
    let AppInfo { app, host } = provisioner.create_app(&app_name)?;
    store.merge(&BuildConfig {
        app: Some(app),
        host: Some(host),
        secret: Some(generate_secret()),
        ..Default::default()
    })?;

    update(store, provisioner, UpdateArgs { server })
}

pub fn update(store: &dyn ConfigStore, provisioner: &dyn Provisioner, args: UpdateArgs) -> Result<()> {
    let config = store.load();
    let app = config.app.as_deref().ok_or("no app yet, create first")?;
    let secret = config
        .secret
        .as_deref()
        .ok_or("no secret configured, create first")?;

    provisioner.deploy(Deployment {
        app,
        secret,
        server_source: &args.server.server_source,
    })?;
    info!("Build server {app} is up to date");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{config::MemoryConfigStore, provision::ProvisionError};

    #[derive(Default)]
    struct FakeProvisioner {
        created: RefCell<Vec<String>>,
        deployed: RefCell<Vec<(String, String, PathBuf)>>,
    }

    impl Provisioner for FakeProvisioner {
        fn create_app(&self, name: &str) -> Result<AppInfo, ProvisionError> {
            self.created.borrow_mut().push(name.to_owned());
            Ok(AppInfo {
                app: name.to_owned(),
                host: format!("{name}-1a2b.herokuapp.com"),
            })
        }

        fn deploy(&self, deployment: Deployment<'_>) -> Result<(), ProvisionError> {
            self.deployed.borrow_mut().push((
                deployment.app.to_owned(),
                deployment.secret.to_owned(),
                deployment.server_source.to_owned(),
            ));
            Ok(())
        }
    }

    fn server_source() -> ServerSourceArgs {
        ServerSourceArgs {
            server_source: PathBuf::from("server"),
        }
    }

    #[test]
    fn create_stores_config_and_deploys() {
        let store = MemoryConfigStore::new(BuildConfig {
            extra: [("color".to_owned(), serde_yaml::Value::from("blue"))].into(),
            ..Default::default()
        });
        let provisioner = FakeProvisioner::default();

        create(
            &store,
            &provisioner,
            CreateArgs {
                app_name: "forge".to_owned(),
                server: server_source(),
            },
        )
        .unwrap();

        let config = store.load();
        assert_eq!(config.app.as_deref(), Some("forge"));
        assert_eq!(config.host.as_deref(), Some("forge-1a2b.herokuapp.com"));
        let secret = config.secret.unwrap();
        assert_eq!(secret.len(), SECRET_LEN);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(config.extra.contains_key("color"));

        assert_eq!(*provisioner.created.borrow(), ["forge"]);
        assert_eq!(
            *provisioner.deployed.borrow(),
            [("forge".to_owned(), secret, PathBuf::from("server"))]
        );
    }

    #[test]
    fn update_without_app_fails() {
        let store = MemoryConfigStore::default();
        let provisioner = FakeProvisioner::default();

        let error = update(&store, &provisioner, UpdateArgs { server: server_source() }).unwrap_err();

        assert_eq!(error.to_string(), "no app yet, create first");
        assert!(provisioner.deployed.borrow().is_empty());
    }

    #[test]
    fn update_deploys_stored_secret() {
        let store = MemoryConfigStore::new(BuildConfig {
            app: Some("forge".to_owned()),
            secret: Some("s3cret".to_owned()),
            ..Default::default()
        });
        let provisioner = FakeProvisioner::default();

        update(&store, &provisioner, UpdateArgs { server: server_source() }).unwrap();

        assert_eq!(
            *provisioner.deployed.borrow(),
            [("forge".to_owned(), "s3cret".to_owned(), PathBuf::from("server"))]
        );
    }

    #[test]
    fn secrets_differ() {
        assert_ne!(generate_secret(), generate_secret());
    }
}
