//! Target selection: local machine, a configured SSH host, or a Vagrant VM

use eyre::{WrapErr, bail};
use kiln_exec::{Connection, ConnectionConfig, LocalConnection, RemoteConnection};
use tracing::{debug, instrument};

use crate::config::Config;

/// Connection chosen on the command line
pub enum Target {
    Local(LocalConnection),
    Remote(RemoteConnection),
}

impl Target {
    /// Resolve a target name
    ///
    /// `local` is the machine kiln runs on, `vagrant` asks Vagrant for the
    /// ssh-config of `machine`, anything else is looked up in the config file.
    ///
    /// # Errors
    /// Returns error for unknown names or unusable connection settings
    pub async fn resolve(
        name: &str,
        machine: Option<&str>,
        config: &Config,
    ) -> eyre::Result<Self> {
        match name {
            "local" => Ok(Target::Local(LocalConnection::new())),
            "vagrant" => {
                let local = LocalConnection::new();
                let ssh_config = vagrant_ssh_config(&local, machine).await?;
                Ok(Target::Remote(RemoteConnection::new(ssh_config)?))
            }
            other => match config.target(other) {
                Some(target) => Ok(Target::Remote(RemoteConnection::new(
                    target.connection_config(),
                )?)),
                None => bail!("unknown target `{other}`"),
            },
        }
    }

    /// The remote connection, for operations that only make sense remotely
    ///
    /// # Errors
    /// Returns error when the target is the local machine
    pub fn remote(&self) -> eyre::Result<&RemoteConnection> {
        match self {
            Target::Remote(remote) => Ok(remote),
            Target::Local(_) => bail!("this command needs a remote target"),
        }
    }

    /// Close the SSH session of a remote target
    ///
    /// # Errors
    /// Returns error if the disconnect fails
    pub async fn close(&self) -> eyre::Result<()> {
        if let Target::Remote(remote) = self {
            remote.disconnect().await?;
        }
        Ok(())
    }
}

/// Ask Vagrant how to reach a machine over SSH
///
/// # Errors
/// Returns error if `vagrant ssh-config` fails
#[instrument(skip(local))]
pub async fn vagrant_ssh_config(
    local: &LocalConnection,
    machine: Option<&str>,
) -> eyre::Result<ConnectionConfig> {
    let command = match machine {
        Some(machine) => format!("vagrant ssh-config {machine}"),
        None => "vagrant ssh-config".to_string(),
    };
    let output = local
        .run(&command)
        .await
        .wrap_err("vagrant ssh-config failed")?;

    let config = ConnectionConfig::parse_ssh_config(&output);
    debug!(host = ?config.get("hostname"), "parsed vagrant ssh-config");
    Ok(config)
}
