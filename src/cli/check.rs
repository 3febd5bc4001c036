//! Handler for the `check` command.

use crate::cli::{load_config, ConfigPathArg};
use crate::error::Result;

/// Validate the configuration and print the effective settings as JSON.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or validated.
pub fn execute(args: &ConfigPathArg) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
