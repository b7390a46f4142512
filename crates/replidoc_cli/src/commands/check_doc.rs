//! Check-doc command implementation.

use std::fs;
use std::io::Read;
use std::path::Path;

use replidoc_protocol::{validate_document, Document};

/// Runs the check-doc command.
pub fn run(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let raw = if file == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(file)?
    };

    let document: Document = serde_json::from_str(&raw)?;

    println!("Document:");
    println!("  passportId: {}", document.passport_id);
    println!("  name:       {} {}", document.first_name, document.last_name);
    println!("  age:        {}", document.age);
    println!("  updated:    {}", document.updated.to_rfc3339());
    println!("  deleted:    {}", document.deleted);
    println!();

    match validate_document(&document) {
        Ok(()) => {
            println!("✓ Document passes validation");
            Ok(())
        }
        Err(err) => {
            println!("✗ {err}");
            Err("Validation failed".into())
        }
    }
}
