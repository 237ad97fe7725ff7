//! File transfer between a local and a remote target through `rsync`

use tracing::{info, instrument};

use crate::error::ExecError;
use crate::local::LocalConnection;
use crate::shell::{quote, quote_path};
use crate::ssh::RemoteConnection;
use crate::traits::Connection;

/// Render the `rsync` invocation copying `src` to `dst`
///
/// The ssh transport gets every configuration key of `remote` as a `-o`
/// option, except `host`, which is only an alias in ssh-config output.
/// Option values are double-quoted for rsync's own splitting of `-e`, and
/// every argument is single-quoted for the local shell.
#[must_use]
pub fn rsync_command(remote: &RemoteConnection, src: &str, dst: &str) -> String {
    let options = remote
        .configuration()
        .iter()
        .filter(|(key, _)| *key != "host")
        .map(|(key, value)| {
            let option = format!("{key}={value}").replace('\\', "\\\\").replace('"', "\\\"");
            format!("-o \"{option}\"")
        })
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "rsync -e {} {} {}",
        quote(&format!("ssh {options}")),
        quote_path(src),
        quote_path(dst)
    )
}

/// Copy a local path to the remote target
///
/// # Errors
/// Returns the `ExecError` of the `rsync` run
#[instrument(skip(local, remote))]
pub async fn push(
    local: &LocalConnection,
    remote: &RemoteConnection,
    path: &str,
    remote_path: &str,
) -> Result<(), ExecError> {
    let command = rsync_command(remote, &local.file_name(path), &remote.file_name(remote_path));
    local.run(&command).await?;
    info!(path, remote_path, "pushed");
    Ok(())
}

/// Copy a remote path to the local machine
///
/// # Errors
/// Returns the `ExecError` of the `rsync` run
#[instrument(skip(local, remote))]
pub async fn pull(
    local: &LocalConnection,
    remote: &RemoteConnection,
    remote_path: &str,
    path: &str,
) -> Result<(), ExecError> {
    let command = rsync_command(remote, &remote.file_name(remote_path), &local.file_name(path));
    local.run(&command).await?;
    info!(remote_path, path, "pulled");
    Ok(())
}
