//! Config command implementation.

use docwal_core::WalConfig;
use std::path::Path;
use tracing::info;

/// Runs the config command.
pub fn run(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration {:?}", file);

    let config = load(file)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();
    println!("✓ Configuration is valid");
    Ok(())
}

/// Loads and validates a configuration file. Missing keys take their
/// defaults.
pub fn load(file: &Path) -> Result<WalConfig, Box<dyn std::error::Error>> {
    let config = WalConfig::from_json_file(file)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_partial_config() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("wal.json");
        std::fs::write(&file, r#"{"directory": "/var/lib/wal", "logfileSize": 1048576}"#).unwrap();

        let config = load(&file).unwrap();
        assert_eq!(config.logfile_size, 1_048_576);
    }

    #[test]
    fn rejects_small_logfiles() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("wal.json");
        std::fs::write(&file, r#"{"directory": "/var/lib/wal", "logfileSize": 1024}"#).unwrap();

        assert!(load(&file).is_err());
    }
}
