//! Build plan
//!
//! The immutable description of one build, produced from command-line input
//! with the selected profile already expanded.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::patch::LineEdit;
use super::profile::Profile;
use super::syslinux::SyslinuxAssets;
use crate::config::defaults::{
    DEFAULT_FSTYPE, DEFAULT_IMAGE_SIZE_MB, ISOFILE_DIRECTIVE, MAX_IMAGE_SIZE_MB,
};
use crate::error::PlanError;

/// Whether a new image is built or an existing one changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Build a fresh image
    Create,
    /// Modify a previously built image
    Update,
}

/// A file or directory to copy onto the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopySpec {
    /// Path as given
    pub source_path: String,
    /// True for host paths (`./` or `/` prefix), false for paths on the ISO
    pub is_host_path: bool,
}

impl CopySpec {
    /// Classify a copy argument
    pub fn parse(spec: &str) -> Self {
        Self {
            source_path: spec.to_string(),
            is_host_path: spec.starts_with("./") || spec.starts_with('/'),
        }
    }

    /// Copy of a host file
    pub fn host(path: &Path) -> Self {
        Self {
            source_path: path.display().to_string(),
            is_host_path: true,
        }
    }
}

/// A patch applied to one file on the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditSpec {
    /// File on the target
    pub target_path: String,
    /// Line selector
    pub match_token: String,
    /// Text to replace
    pub search: String,
    /// Replacement
    pub replace: String,
}

impl EditSpec {
    /// The line edit this directive performs
    pub fn line_edit(&self) -> LineEdit {
        LineEdit::new(&self.match_token, &self.search, &self.replace)
    }
}

/// How the volume label is handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Take the label from the source image
    Auto,
    /// Use the given label
    Explicit(String),
    /// Leave the label alone
    Suppressed,
}

/// Raw build request, as parsed from the command line
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Build or update
    pub update: bool,
    /// Preset to expand
    pub profile: Profile,
    /// Target image
    pub image_path: Option<PathBuf>,
    /// Source ISO
    pub source_image_path: Option<PathBuf>,
    /// Overwrite an existing target in create mode
    pub force: bool,
    /// Target filesystem type
    pub fstype: Option<String>,
    /// Target image size
    pub size_mb: Option<u64>,
    /// Requested volume label
    pub label: Option<String>,
    /// Never touch the label
    pub no_label: bool,
    /// Do not rewrite label references in the bootloader config
    pub no_label_patch: bool,
    /// Drop the profile's copy and edit directives
    pub clear: bool,
    /// Convert the bootloader even in update mode
    pub convert_bootloader: bool,
    /// Copy arguments in order
    pub copies: Vec<String>,
    /// Edit target paths in order
    pub edit_paths: Vec<String>,
    /// (match, search, replace) triples paired with `edit_paths`
    pub seds: Vec<[String; 3]>,
    /// Host syslinux files
    pub syslinux: SyslinuxAssets,
}

/// Immutable build configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    /// Build or update
    pub mode: Mode,
    /// Expanded preset
    pub profile: Profile,
    /// Target image
    pub image_path: PathBuf,
    /// Source ISO
    pub source_image_path: Option<PathBuf>,
    /// Overwrite an existing target in create mode
    pub force_overwrite: bool,
    /// Target filesystem type
    pub filesystem_type: String,
    /// Target image size
    pub image_size_mb: u64,
    /// Copies in application order
    pub copy_specs: Vec<CopySpec>,
    /// Edits in application order
    pub edit_specs: Vec<EditSpec>,
    /// Label handling
    pub label: LabelPolicy,
    /// Rewrite label references in the bootloader config
    pub patch_config_labels: bool,
    /// Copy every top-level source entry except isolinux
    pub bulk_copy: bool,
    /// Run the bootloader conversion stage
    pub convert_bootloader: bool,
    /// Entries expected in the source root
    pub required_source_entries: Vec<String>,
    /// Host syslinux files
    #[serde(skip)]
    pub syslinux: SyslinuxAssets,
}

impl BuildPlan {
    /// Expand a request into a plan
    ///
    /// Checks the request's own consistency; the state of the filesystem is
    /// checked separately by [`BuildPlan::preflight`].
    pub fn from_request(request: PlanRequest) -> Result<Self, PlanError> {
        let mode = if request.update {
            Mode::Update
        } else {
            Mode::Create
        };
        let template = request.profile.template();

        let image_path = request.image_path.ok_or_else(|| PlanError::MissingPath {
            what: "output image (-o)".to_string(),
        })?;
        if mode == Mode::Create && request.source_image_path.is_none() {
            return Err(PlanError::MissingPath {
                what: "source ISO (-i)".to_string(),
            });
        }

        let image_size_mb = request.size_mb.unwrap_or(DEFAULT_IMAGE_SIZE_MB);
        if mode == Mode::Create && !(1..=MAX_IMAGE_SIZE_MB).contains(&image_size_mb) {
            return Err(PlanError::InvalidSize {
                size_mb: image_size_mb,
                max_mb: MAX_IMAGE_SIZE_MB,
            });
        }

        if request.edit_paths.len() != request.seds.len() {
            return Err(PlanError::UnpairedEdit {
                edits: request.edit_paths.len(),
                seds: request.seds.len(),
            });
        }

        let mut copy_args: Vec<String> = Vec::new();
        let mut edit_specs: Vec<EditSpec> = Vec::new();
        if !request.clear {
            copy_args.extend(template.copies.iter().map(ToString::to_string));
            edit_specs.extend(template.edits.iter().map(|e| EditSpec {
                target_path: e.target_path.to_string(),
                match_token: e.match_token.to_string(),
                search: e.search.to_string(),
                replace: e.replace.to_string(),
            }));
        }
        copy_args.extend(request.copies);

        let copy_specs = copy_args
            .iter()
            .map(|arg| match (arg.as_str(), &request.source_image_path) {
                (ISOFILE_DIRECTIVE, Some(iso)) => Ok(CopySpec::host(iso)),
                (ISOFILE_DIRECTIVE, None) => Err(PlanError::MissingPath {
                    what: "source ISO (-i) for :isofile".to_string(),
                }),
                _ => Ok(CopySpec::parse(arg)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (path, [match_token, search, replace]) in request.edit_paths.into_iter().zip(request.seds)
        {
            if path.trim().is_empty() {
                return Err(PlanError::InvalidEdit {
                    path,
                    reason: "empty target path".to_string(),
                });
            }
            edit_specs.push(EditSpec {
                target_path: path,
                match_token,
                search,
                replace,
            });
        }

        let label = match request.label {
            _ if request.no_label => LabelPolicy::Suppressed,
            Some(label) if !label.is_empty() => LabelPolicy::Explicit(label),
            _ if template.autolabel => LabelPolicy::Auto,
            _ => LabelPolicy::Suppressed,
        };

        let convert_bootloader = match mode {
            Mode::Create => !template.skip_bootloader || request.convert_bootloader,
            Mode::Update => request.convert_bootloader,
        };

        Ok(Self {
            mode,
            profile: request.profile,
            image_path,
            source_image_path: request.source_image_path,
            force_overwrite: request.force,
            filesystem_type: request
                .fstype
                .unwrap_or_else(|| DEFAULT_FSTYPE.to_string()),
            image_size_mb,
            copy_specs,
            edit_specs,
            label,
            patch_config_labels: !request.no_label_patch,
            bulk_copy: template.bulk_copy && !request.clear,
            convert_bootloader,
            required_source_entries: template
                .required_entries
                .iter()
                .map(ToString::to_string)
                .collect(),
            syslinux: request.syslinux,
        })
    }

    /// Whether any stage reads from the source ISO
    pub fn needs_source(&self) -> bool {
        self.bulk_copy
            || self.convert_bootloader
            || self.label == LabelPolicy::Auto
            || !self.required_source_entries.is_empty()
            || self.copy_specs.iter().any(|c| !c.is_host_path)
    }

    /// Whether the source ISO should be attached
    pub fn attach_source(&self) -> bool {
        self.source_image_path.as_deref().is_some_and(Path::exists)
    }

    /// Check the plan against the host filesystem
    ///
    /// Runs before the disk service is started, so a rejected plan never
    /// touches the target.
    pub fn preflight(&self) -> Result<(), PlanError> {
        let source_exists = self.attach_source();

        match self.mode {
            Mode::Create => {
                if self.image_path.exists() && !self.force_overwrite {
                    return Err(PlanError::TargetExists {
                        path: self.image_path.clone(),
                    });
                }
                if !source_exists {
                    return Err(self.source_missing());
                }
            }
            Mode::Update => {
                if !self.image_path.is_file() {
                    return Err(PlanError::TargetMissing {
                        path: self.image_path.clone(),
                    });
                }
                if self.needs_source() && !source_exists {
                    return Err(self.source_missing());
                }
            }
        }
        Ok(())
    }

    fn source_missing(&self) -> PlanError {
        match &self.source_image_path {
            Some(path) => PlanError::SourceMissing { path: path.clone() },
            None => PlanError::MissingPath {
                what: "source ISO (-i)".to_string(),
            },
        }
    }
}
