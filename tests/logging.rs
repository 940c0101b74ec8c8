use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::Result;
use serial_relay::logging::{self, LOG_FILE_PREFIX};
use tracing::{info, Level};

// Logging is global, so this is the only test in its binary.
#[tokio::test]
async fn shutdown_flushes_the_file_log() -> Result<()> {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    let dir = std::env::temp_dir().join(format!("serial-relay-logs-{nanos}"));
    std::fs::create_dir_all(&dir)?;

    logging::init(Level::INFO, Some((Level::DEBUG, dir.clone()))).await;
    info!("written before shutdown");

    logging::shutdown();

    let mut contents = String::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX) {
            contents += &std::fs::read_to_string(entry.path())?;
        }
    }

    assert!(contents.contains("written before shutdown"), "{contents:?}");

    // A second shutdown has nothing left to flush.
    logging::shutdown();

    std::fs::remove_dir_all(&dir)?;

    Ok(())
}
