//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use anyhow::Result;
use clap::{ArgAction, ArgGroup, Parser};
use std::path::PathBuf;

use crate::core::global_config::GlobalConfig;
use crate::core::inspect::InspectRequest;
use crate::core::plan::PlanRequest;
use crate::core::profile::Profile;

/// usbforge - Bootable USB images from installer ISOs
///
/// Converts an isolinux-booted ISO into a raw disk image with a single
/// bootable partition managed by syslinux, or updates such an image.
#[derive(Parser, Debug)]
#[command(name = "usbforge")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["create", "update", "inspect"])))]
#[command(group(ArgGroup::new("profile").args(["defaults", "minimal", "centos7", "iso_based"])))]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long)]
    pub json: bool,

    /// Source ISO image
    #[arg(short = 'i', long = "iso", value_name = "ISO")]
    pub iso: Option<PathBuf>,

    /// Target USB disk image
    #[arg(short = 'o', long = "out", value_name = "IMAGE")]
    pub out: Option<PathBuf>,

    /// Build a new image
    #[arg(long)]
    pub create: bool,

    /// Modify an existing image
    #[arg(long)]
    pub update: bool,

    /// Show a directory listing or file from the images
    #[arg(long, value_name = "PATH")]
    pub inspect: Option<String>,

    /// Overwrite the target image if it exists
    #[arg(short, long)]
    pub force: bool,

    /// Image size in megabytes
    #[arg(long, value_name = "MB")]
    pub size: Option<u64>,

    /// Volume label (default: taken from the ISO)
    #[arg(long, conflicts_with = "no_label")]
    pub label: Option<String>,

    /// Leave the volume label alone
    #[arg(long)]
    pub no_label: bool,

    /// Target filesystem type
    #[arg(long, value_name = "TYPE")]
    pub fstype: Option<String>,

    /// Convert the bootloader, label from the ISO and copy the whole ISO
    #[arg(long)]
    pub defaults: bool,

    /// Apply only explicit --copy and --edit directives
    #[arg(long)]
    pub minimal: bool,

    /// Like --defaults, checking the CentOS 7 tree is present
    #[arg(long)]
    pub centos7: bool,

    /// Convert the bootloader and copy `images` plus the ISO file itself
    #[arg(long)]
    pub iso_based: bool,

    /// Drop the profile's copy and edit directives
    #[arg(long)]
    pub clear: bool,

    /// Copy a file or directory (./path or /path from the host, otherwise from the ISO)
    #[arg(long = "copy", value_name = "SPEC")]
    pub copies: Vec<String>,

    /// File on the target to edit; pair each with a --sed
    #[arg(long = "edit", value_name = "PATH")]
    pub edits: Vec<String>,

    /// On lines containing MATCH, replace every SEARCH with REPLACE
    #[arg(
        long = "sed",
        num_args = 3,
        value_names = ["MATCH", "SEARCH", "REPLACE"],
        action = ArgAction::Append,
        allow_hyphen_values = true
    )]
    pub seds: Vec<String>,

    /// Convert the bootloader in update mode
    #[arg(long)]
    pub convert_bootloader: bool,

    /// Do not rewrite LABEL= references in the bootloader config
    #[arg(long)]
    pub no_label_patch: bool,

    /// Directory holding the host's syslinux files
    #[arg(long, value_name = "DIR")]
    pub syslinux_dir: Option<PathBuf>,

    /// Configuration file (default: ~/.config/usbforge/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        if let Some(path) = self.inspect.clone() {
            return commands::inspect::execute(InspectRequest {
                image_path: self.out,
                source_image_path: self.iso,
                path,
            })
            .await;
        }

        let config = match &self.config {
            Some(path) => GlobalConfig::load_from_path(path)?,
            None => GlobalConfig::load()?,
        };
        commands::build::execute(self.plan_request(&config)).await
    }

    /// Selected profile
    pub fn profile(&self) -> Profile {
        if self.defaults {
            Profile::Defaults
        } else if self.minimal {
            Profile::Minimal
        } else if self.centos7 {
            Profile::Centos7
        } else if self.iso_based {
            Profile::IsoBased
        } else {
            Profile::None
        }
    }

    /// `--sed` values grouped into (match, search, replace) triples
    pub fn sed_triples(&self) -> Vec<[String; 3]> {
        self.seds
            .chunks_exact(3)
            .map(|c| [c[0].clone(), c[1].clone(), c[2].clone()])
            .collect()
    }

    /// Build request from flags, falling back to config values
    pub fn plan_request(&self, config: &GlobalConfig) -> PlanRequest {
        PlanRequest {
            update: self.update,
            profile: self.profile(),
            image_path: self.out.clone(),
            source_image_path: self.iso.clone(),
            force: self.force,
            fstype: self.fstype.clone().or_else(|| config.build.fstype.clone()),
            size_mb: self.size.or(config.build.size_mb),
            label: self.label.clone(),
            no_label: self.no_label,
            no_label_patch: self.no_label_patch,
            clear: self.clear,
            convert_bootloader: self.convert_bootloader,
            copies: self.copies.clone(),
            edit_paths: self.edits.clone(),
            seds: self.sed_triples(),
            syslinux: config.syslinux_assets(self.syslinux_dir.as_deref()),
        }
    }
}
