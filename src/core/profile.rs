//! Build profiles
//!
//! A profile is a named preset expanding to a fixed set of directives. The
//! expansion happens once, when the build plan is constructed.

use serde::Serialize;
use std::fmt;

/// Named build preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// No preset; only explicit directives
    #[default]
    None,
    /// Explicitly minimal: only explicit directives
    Minimal,
    /// Convert the bootloader, autolabel, copy the whole ISO
    Defaults,
    /// Like `Defaults`, checking the CentOS 7 tree is present
    Centos7,
    /// Convert the bootloader and ship the ISO file itself
    IsoBased,
}

/// Edit carried by a profile template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditTemplate {
    /// File on the target
    pub target_path: &'static str,
    /// Line selector
    pub match_token: &'static str,
    /// Text to replace
    pub search: &'static str,
    /// Replacement
    pub replace: &'static str,
}

/// Directives a profile expands to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileTemplate {
    /// Copy directives, applied before explicit ones
    pub copies: &'static [&'static str],
    /// Edit directives, applied before explicit ones
    pub edits: &'static [EditTemplate],
    /// Copy every top-level source entry except isolinux
    pub bulk_copy: bool,
    /// Leave the bootloader alone
    pub skip_bootloader: bool,
    /// Derive the volume label from the source
    pub autolabel: bool,
    /// Entries expected in the source root
    pub required_entries: &'static [&'static str],
}

const EMPTY: ProfileTemplate = ProfileTemplate {
    copies: &[],
    edits: &[],
    bulk_copy: false,
    skip_bootloader: true,
    autolabel: false,
    required_entries: &[],
};

const DEFAULTS: ProfileTemplate = ProfileTemplate {
    copies: &[],
    edits: &[],
    bulk_copy: true,
    skip_bootloader: false,
    autolabel: true,
    required_entries: &[],
};

const CENTOS7: ProfileTemplate = ProfileTemplate {
    required_entries: &["images", "repodata", "Packages", ".discinfo", ".treeinfo"],
    ..DEFAULTS
};

const ISO_BASED: ProfileTemplate = ProfileTemplate {
    copies: &["images", crate::config::defaults::ISOFILE_DIRECTIVE],
    edits: &[],
    bulk_copy: false,
    skip_bootloader: false,
    autolabel: false,
    required_entries: &[],
};

impl Profile {
    /// Directives this profile expands to
    pub fn template(self) -> ProfileTemplate {
        match self {
            Self::None | Self::Minimal => EMPTY,
            Self::Defaults => DEFAULTS,
            Self::Centos7 => CENTOS7,
            Self::IsoBased => ISO_BASED,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Defaults => "defaults",
            Self::Centos7 => "centos7",
            Self::IsoBased => "iso-based",
        };
        f.write_str(name)
    }
}
