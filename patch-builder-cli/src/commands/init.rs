//! Init command - write the configuration file.

use std::path::Path;

use patch_builder::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Run the init command.
///
/// Existing settings are kept; missing keys are filled with defaults.
pub fn run(file: Option<&Path>) -> Result<(), CliError> {
    let path = file.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    let existed = path.exists();

    let config = ConfigFile::load_from(&path)?;
    config.save_to(&path)?;

    if existed {
        println!("Updated configuration file: {}", path.display());
    } else {
        println!("Created configuration file: {}", path.display());
    }
    println!();
    println!("Edit this file to customize patch-builder settings.");
    println!("CLI arguments override config file values when specified.");
    Ok(())
}
