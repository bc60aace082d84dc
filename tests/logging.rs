mod support;

use mailtriage::config::LoggingSettings;
use mailtriage::logging;
use support::config_env::ConfigHomeGuard;

#[test]
fn file_logging_creates_launch_file_once() {
    let home = tempfile::tempdir().unwrap();
    let _guard = ConfigHomeGuard::set_config_home(home.path().to_path_buf());
    let settings = LoggingSettings {
        level: "debug".to_string(),
        log_to_file: true,
        max_log_files: 2,
    };

    logging::init(&settings).unwrap();
    tracing::info!("first launch");
    // Later calls keep the installed subscriber.
    logging::init(&settings).unwrap();

    let logs = home.path().join(".mailtriage").join("logs");
    let files: Vec<_> = std::fs::read_dir(&logs)
        .unwrap()
        .flatten()
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "log"))
        .collect();
    assert_eq!(files.len(), 1);
    assert!(
        files[0]
            .file_name()
            .to_string_lossy()
            .starts_with("mailtriage_")
    );
}
