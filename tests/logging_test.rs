use msa_pipeline::logging::init_logging;
use std::path::Path;

#[test]
fn logging_installs_console_and_file_layers() {
    let guard = init_logging();
    tracing::info!("logging initialized");

    assert!(guard.is_some());
    assert!(Path::new("logs").is_dir());
}
