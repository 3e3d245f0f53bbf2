use super::*;
use tempfile::tempdir;

#[test]
fn expands_tilde_to_home_watch_dir() {
    let home = PathBuf::from("/tmp/home-user");
    assert_eq!(
        expand_with_home("~/Fotodrop", &home),
        PathBuf::from("/tmp/home-user/Fotodrop")
    );
    assert_eq!(expand_with_home("~", &home), home);
    assert_eq!(
        expand_with_home("/absolute/dir", &home),
        PathBuf::from("/absolute/dir")
    );
}

#[test]
fn reads_intervals_from_env_or_default() {
    assert_eq!(read_u64_env("NO_SUCH_ENV_FOR_TEST", 42), 42);
}

#[tokio::test]
async fn bootstrap_creates_the_watch_directory() {
    let dir = tempdir().unwrap();
    let watch_dir = dir.path().join("incoming");
    let config = DaemonConfig {
        api_base: Some("http://127.0.0.1:9".to_string()),
        api_token: "test-token".to_string(),
        event_id: "ev-1".to_string(),
        watch_dir: watch_dir.clone(),
        engine: EngineConfig::default(),
        status_interval: Duration::from_secs(1),
    };

    let _runtime = DaemonRuntime::bootstrap(config).await.unwrap();
    assert!(watch_dir.is_dir());
}
