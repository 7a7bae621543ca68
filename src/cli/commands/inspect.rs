//! Inspect command implementation
//!
//! Implements `usbforge --inspect PATH` to show a directory or file from
//! the images without modifying them.

use anyhow::Result;

use crate::cli::output::OutputConfig;
use crate::core::inspect::{self, InspectRequest, Inspection};
use crate::infra::guestfish::GuestfishService;

/// Execute the inspect command
pub async fn execute(request: InspectRequest) -> Result<()> {
    let output = OutputConfig::current();
    let inspection =
        tokio::task::spawn_blocking(move || inspect::inspect(&request, GuestfishService::start))
            .await??;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    match inspection {
        Inspection::Directory { entries, .. } => {
            for entry in entries {
                println!("{entry}");
            }
        }
        Inspection::File { content, .. } => print!("{content}"),
    }
    Ok(())
}
