use std::sync::Mutex;

use async_trait::async_trait;

use kiln_exec::shell::quote_path;
use kiln_exec::{CommandResult, Connection, ConnectionConfig, ExecError};
use kiln_require::{DownloadCache, Provider, RequireError, VirtualEnvironment};

// Mock implementations
struct FinishedResult {
    status: i32,
    stdout: String,
    stderr: String,
}

#[async_trait]
impl CommandResult for FinishedResult {
    async fn wait(&mut self) -> Result<(), ExecError> {
        Ok(())
    }

    async fn exit_status(&mut self) -> Result<i32, ExecError> {
        Ok(self.status)
    }

    async fn stdout(&mut self) -> Result<String, ExecError> {
        Ok(std::mem::take(&mut self.stdout))
    }

    async fn stderr(&mut self) -> Result<String, ExecError> {
        Ok(std::mem::take(&mut self.stderr))
    }
}

/// Records every command and answers with the status of the first matching
/// rule, 0 otherwise
#[derive(Default)]
struct RecordingConnection {
    config: ConnectionConfig,
    prefixes: Vec<String>,
    rules: Vec<(&'static str, i32)>,
    log: Mutex<Vec<String>>,
}

impl RecordingConnection {
    fn with_rules(rules: Vec<(&'static str, i32)>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn configuration(&self) -> &ConnectionConfig {
        &self.config
    }

    fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn file_name(&self, path: &str) -> String {
        path.to_string()
    }

    fn with_prefix<I, S>(&self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes = self.prefixes.clone();
        prefixes.extend(fragments.into_iter().map(Into::into));
        Self {
            config: self.config.clone(),
            prefixes,
            rules: self.rules.clone(),
            log: Mutex::new(Vec::new()),
        }
    }

    async fn run_result(&self, command: &str) -> Result<Box<dyn CommandResult>, ExecError> {
        let command = self.compose(command);
        let status = self
            .rules
            .iter()
            .find(|(needle, _)| command.contains(needle))
            .map_or(0, |(_, status)| *status);
        self.log.lock().unwrap().push(command);

        Ok(Box::new(FinishedResult {
            status,
            stdout: String::new(),
            stderr: if status == 0 {
                String::new()
            } else {
                "simulated failure".to_string()
            },
        }))
    }
}

#[tokio::test]
async fn test_download_satisfied_issues_no_mutation() {
    let cache = DownloadCache::new("http://example/test.txt");
    let conn = RecordingConnection::default();

    assert!(!cache.require(&conn).await.unwrap());

    let commands = conn.commands();
    assert_eq!(
        commands,
        vec![
            "mkdir -p ~/'.cache/kiln/downloads'".to_string(),
            format!("test -r {}", quote_path(&cache.download_location())),
        ]
    );
}

#[tokio::test]
async fn test_download_unsatisfied_fetches() {
    let cache = DownloadCache::new("http://example/test.txt");
    let conn = RecordingConnection::with_rules(vec![("test -r", 1)]);

    assert!(cache.require(&conn).await.unwrap());

    let commands = conn.commands();
    assert_eq!(commands.len(), 3);
    let location = cache.download_location();
    assert!(commands[2].starts_with("curl -fsSL 'http://example/test.txt' -o "));
    assert!(commands[2].ends_with(&format!(
        "&& mv {} {}",
        quote_path(&format!("{location}.part")),
        quote_path(&location)
    )));
}

#[tokio::test]
async fn test_download_url_with_query_is_one_word() {
    let url = "https://example.com/dist/app.zip?a=1&b=2;c='3'";
    let cache = DownloadCache::new(url).with_cache_root("/var/cache/my downloads");
    let conn = RecordingConnection::with_rules(vec![("test -r", 1)]);

    assert!(cache.require(&conn).await.unwrap());

    let commands = conn.commands();
    assert_eq!(commands[0], "mkdir -p '/var/cache/my downloads'");
    assert!(commands[2].starts_with(
        "curl -fsSL 'https://example.com/dist/app.zip?a=1&b=2;c='\"'\"'3'\"'\"'' \
         -o '/var/cache/my downloads/"
    ));
    assert!(cache.download_location().ends_with("_app.zip"));
}

#[tokio::test]
async fn test_failed_preparation_aborts() {
    let cache = DownloadCache::new("http://example/test.txt");
    let conn = RecordingConnection::with_rules(vec![("mkdir", 1)]);

    let err = cache.require(&conn).await.unwrap_err();

    assert_eq!(err.exec_error().unwrap().status(), Some(1));
    assert_eq!(conn.commands().len(), 1);
}

#[tokio::test]
async fn test_failed_fetch_propagates_diagnostics() {
    let cache = DownloadCache::new("http://example/missing.txt");
    let conn = RecordingConnection::with_rules(vec![("test -r", 1), ("curl", 22)]);

    let err = cache.require(&conn).await.unwrap_err();

    match err {
        RequireError::Exec(ExecError::CommandFailed { status, stderr, .. }) => {
            assert_eq!(status, 22);
            assert_eq!(stderr, "simulated failure");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_venv_matching_version_is_untouched() {
    let venv = VirtualEnvironment::new("/tmp/somevirtualenv");
    let conn = RecordingConnection::default();

    assert!(!venv.require(&conn).await.unwrap());
    assert_eq!(conn.commands(), vec![venv.check_command()]);
}

#[tokio::test]
async fn test_venv_mismatch_is_replaced() {
    let venv = VirtualEnvironment::new("/tmp/somevirtualenv").with_interpreter("python3.5");
    let conn = RecordingConnection::with_rules(vec![("test -r /tmp/somevirtualenv/bin/python", 1)]);

    assert!(venv.require(&conn).await.unwrap());

    let commands = conn.commands();
    assert_eq!(
        &commands[1..],
        &[
            "rm -rf /tmp/somevirtualenv.kiln-previous && if [ -e /tmp/somevirtualenv ]; \
             then mv /tmp/somevirtualenv /tmp/somevirtualenv.kiln-previous; fi"
                .to_string(),
            "python3.5 -m venv /tmp/somevirtualenv".to_string(),
            "rm -rf /tmp/somevirtualenv.kiln-previous".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_venv_failed_create_restores_previous() {
    let venv = VirtualEnvironment::new("/tmp/somevirtualenv");
    let conn = RecordingConnection::with_rules(vec![("test -r", 1), ("-m venv", 1)]);

    let err = venv.require(&conn).await.unwrap_err();

    assert!(matches!(err, RequireError::Exec(_)));
    let commands = conn.commands();
    assert_eq!(
        commands.last().unwrap(),
        "rm -rf /tmp/somevirtualenv && if [ -e /tmp/somevirtualenv.kiln-previous ]; \
         then mv /tmp/somevirtualenv.kiln-previous /tmp/somevirtualenv; fi"
    );
}

#[tokio::test]
async fn test_venv_failed_restore_is_reported() {
    let venv = VirtualEnvironment::new("/tmp/somevirtualenv");
    let conn = RecordingConnection::with_rules(vec![
        ("test -r", 1),
        ("-m venv", 1),
        ("rm -rf /tmp/somevirtualenv &&", 1),
    ]);

    let err = venv.require(&conn).await.unwrap_err();

    assert!(matches!(err, RequireError::RollbackFailed { .. }));
}

#[tokio::test]
async fn test_venv_without_location_runs_nothing() {
    let conn = RecordingConnection::default();

    for location in ["", "/", "//"] {
        let venv = VirtualEnvironment::new(location);

        let err = venv.require(&conn).await.unwrap_err();
        assert!(matches!(err, RequireError::InvalidLocation(_)));
        assert!(err.exec_error().is_none());

        let err = venv.delete(&conn).await.unwrap_err();
        assert!(matches!(err, RequireError::InvalidLocation(_)));

        let err = venv.create(&conn).await.unwrap_err();
        assert!(matches!(err, RequireError::InvalidLocation(_)));
    }

    assert!(conn.commands().is_empty());
}

#[tokio::test]
async fn test_prefixed_connection_wraps_provider_commands() {
    let venv = VirtualEnvironment::new("/srv/env");
    let conn = RecordingConnection::default().with_prefix([venv.prefix()]);
    let cache = DownloadCache::new("http://example/test.txt");

    cache.require(&conn).await.unwrap();

    assert!(
        conn.commands()
            .iter()
            .all(|c| c.starts_with(". /srv/env/bin/activate && "))
    );
}
