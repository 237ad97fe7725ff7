use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use kiln_exec::{Connection, LocalConnection};
use kiln_require::{DownloadCache, Provider, ResourceLocks, VirtualEnvironment};

/// Stand-in for a Python interpreter: reports a fixed version and builds a
/// minimal sandbox for `-m venv DIR`
fn fake_python(dir: &Path, name: &str, version: &str, venv_works: bool) -> PathBuf {
    let path = dir.join(name);
    let create = if venv_works {
        "mkdir -p \"$3/bin\" && cp \"$0\" \"$3/bin/python\" \
         && echo 'export KILN_FAKE_VENV=active' > \"$3/bin/activate\""
    } else {
        "mkdir -p \"$3/bin\" && exit 1"
    };
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"--version\" ]; then echo \"Python {version}\"; exit 0; fi\n\
         if [ \"$1\" = \"-m\" ] && [ \"$2\" = \"venv\" ]; then {create}; exit $?; fi\n\
         exit 2\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn stale_venv(location: &Path, version: &str) {
    let bin = location.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let python = bin.join("python");
    std::fs::write(&python, format!("#!/bin/sh\necho \"Python {version}\"\n")).unwrap();
    std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn venv_version(location: &Path) -> String {
    let output = std::process::Command::new(location.join("bin/python"))
        .arg("--version")
        .output()
        .unwrap();
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

#[tokio::test]
async fn test_end_to_end_local() {
    let conn = LocalConnection::new();

    assert_eq!(conn.run("echo foo").await.unwrap(), "foo\n");
    assert!(!conn.test("false").await.unwrap());
}

#[tokio::test]
async fn test_venv_created_then_noop() {
    let dir = tempfile::tempdir().unwrap();
    let python = fake_python(dir.path(), "python-fake", "3.99.1", true);
    let location = dir.path().join("env");
    let venv = VirtualEnvironment::new(location.to_str().unwrap())
        .with_interpreter(python.to_str().unwrap());
    let conn = LocalConnection::new();

    assert!(venv.require(&conn).await.unwrap());
    assert!(!venv.require(&conn).await.unwrap());
    assert_eq!(venv_version(&location), "Python 3.99.1");
}

#[tokio::test]
async fn test_venv_version_mismatch_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let python = fake_python(dir.path(), "python-fake", "3.99.1", true);
    let location = dir.path().join("env");
    stale_venv(&location, "2.7.18");
    let venv = VirtualEnvironment::new(location.to_str().unwrap())
        .with_interpreter(python.to_str().unwrap());
    let conn = LocalConnection::new();

    assert!(!venv.is_satisfied(&conn).await.unwrap());
    assert!(venv.require(&conn).await.unwrap());
    assert_eq!(venv_version(&location), "Python 3.99.1");
    assert!(!dir.path().join("env.kiln-previous").exists());
}

#[tokio::test]
async fn test_venv_failed_replace_keeps_old_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let python = fake_python(dir.path(), "python-broken", "3.99.1", false);
    let location = dir.path().join("env");
    stale_venv(&location, "2.7.18");
    let venv = VirtualEnvironment::new(location.to_str().unwrap())
        .with_interpreter(python.to_str().unwrap());
    let conn = LocalConnection::new();

    let err = venv.require(&conn).await.unwrap_err();

    assert_eq!(err.exec_error().unwrap().status(), Some(1));
    assert_eq!(venv_version(&location), "Python 2.7.18");
    assert!(!dir.path().join("env.kiln-previous").exists());
}

#[tokio::test]
async fn test_venv_prefix_activates() {
    let dir = tempfile::tempdir().unwrap();
    let python = fake_python(dir.path(), "python-fake", "3.99.1", true);
    let location = dir.path().join("env");
    let venv = VirtualEnvironment::new(location.to_str().unwrap())
        .with_interpreter(python.to_str().unwrap());
    let conn = LocalConnection::new();

    venv.require(&conn).await.unwrap();
    let inside = conn.with_prefix([venv.prefix()]);

    assert_eq!(inside.run("echo $KILN_FAKE_VENV").await.unwrap(), "active\n");
    assert_eq!(conn.run("echo \"x$KILN_FAKE_VENV\"").await.unwrap(), "x\n");
}

#[tokio::test]
async fn test_venv_delete() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("env");
    stale_venv(&location, "3.99.1");
    let venv = VirtualEnvironment::new(location.to_str().unwrap());

    venv.delete(&LocalConnection::new()).await.unwrap();

    assert!(!location.exists());
}

#[tokio::test]
async fn test_locked_requires_change_once() {
    let dir = tempfile::tempdir().unwrap();
    let python = fake_python(dir.path(), "python-fake", "3.99.1", true);
    let location = dir.path().join("env");
    let venv = VirtualEnvironment::new(location.to_str().unwrap())
        .with_interpreter(python.to_str().unwrap());
    let conn = LocalConnection::new();
    let locks = ResourceLocks::new();

    let (a, b) = tokio::join!(
        venv.require_locked(&conn, &locks),
        venv.require_locked(&conn, &locks),
    );

    let changed = [a.unwrap(), b.unwrap()];
    assert_eq!(changed.iter().filter(|c| **c).count(), 1);
    assert!(locks.is_empty());
}

#[tokio::test]
async fn test_download_cache_idempotent() {
    let conn = LocalConnection::new();
    if !conn.test("command -v curl").await.unwrap() {
        eprintln!("curl not available, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("test.txt");
    std::fs::write(&source, "cached content\n").unwrap();
    let cache_root = dir.path().join("cache");
    let cache = DownloadCache::new(format!("file://{}", source.display()))
        .with_cache_root(cache_root.to_str().unwrap());

    assert!(cache.require(&conn).await.unwrap());
    assert!(!cache.require(&conn).await.unwrap());

    let location = PathBuf::from(cache.download_location());
    assert!(location.starts_with(&cache_root));
    assert!(location.to_str().unwrap().ends_with("_test.txt"));
    assert_eq!(std::fs::read_to_string(&location).unwrap(), "cached content\n");

    cache.delete(&conn).await.unwrap();
    assert!(!location.exists());
    assert!(cache.require(&conn).await.unwrap());
}

#[tokio::test]
async fn test_download_failure_leaves_no_entry() {
    let conn = LocalConnection::new();
    if !conn.test("command -v curl").await.unwrap() {
        eprintln!("curl not available, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let cache = DownloadCache::new(format!("file://{}/missing.txt", dir.path().display()))
        .with_cache_root(dir.path().join("cache").to_str().unwrap());

    assert!(cache.require(&conn).await.is_err());
    assert!(!cache.is_satisfied(&conn).await.unwrap());
}

/// Stand-in for `curl -fsSL URL -o FILE`: writes the URL it was given to FILE
fn fake_curl(dir: &Path) -> PathBuf {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let path = bin.join("curl");
    std::fs::write(&path, "#!/bin/sh\nprintf '%s' \"$2\" > \"$4\"\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    bin
}

#[tokio::test]
async fn test_download_url_with_query_reaches_curl_intact() {
    let dir = tempfile::tempdir().unwrap();
    let bin = fake_curl(dir.path());
    let conn = LocalConnection::new()
        .with_prefix([format!("export PATH='{}':\"$PATH\"", bin.display())]);
    let url = "https://example.com/dist/app.zip?token=abc&sig=1";
    let cache = DownloadCache::new(url)
        .with_cache_root(dir.path().join("cache dir").to_str().unwrap());

    assert!(cache.require(&conn).await.unwrap());
    assert!(!cache.require(&conn).await.unwrap());

    let location = PathBuf::from(cache.download_location());
    assert_eq!(std::fs::read_to_string(&location).unwrap(), url);
    assert!(!PathBuf::from(format!("{}.part", location.display())).exists());
}
