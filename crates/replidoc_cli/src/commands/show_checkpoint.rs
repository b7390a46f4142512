//! Show-checkpoint command implementation.

use std::path::Path;

use replidoc_engine::load_checkpoint;

/// Runs the show-checkpoint command.
pub fn run(dir: &Path, identifier: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = dir.join(format!("{identifier}.checkpoint"));
    let checkpoint = match load_checkpoint(&path)? {
        Some(checkpoint) => checkpoint,
        None => return Err(format!("No checkpoint found at {:?}", path).into()),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        }
        _ => {
            println!("Checkpoint: {}", path.display());
            println!("  lastUpdate: {}", checkpoint.last_update.to_rfc3339());
            println!(
                "  lastId:     {}",
                checkpoint.last_id.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}
