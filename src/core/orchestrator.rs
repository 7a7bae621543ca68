//! Build orchestration
//!
//! Runs a [`BuildPlan`] as a linear sequence of stages against a Disk Image
//! Service. Any fatal error aborts the remaining stages; the session is
//! released on every exit path and a cleanup failure never replaces the
//! error that caused the abort.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use super::label::{self, AppliedLabel};
use super::plan::{BuildPlan, CopySpec, EditSpec, LabelPolicy, Mode};
use super::profile::Profile;
use super::selection::{self, Origin};
use super::session::{BuildSession, StageRecord, StageStatus};
use super::syslinux;
use crate::config::defaults::{SOURCE_MOUNT, TARGET_MOUNT};
use crate::error::{BuildError, BuildWarning, DiskError};
use crate::infra::disk::{join, partition_index, Access, DiskImageService};
use crate::infra::filesystem;

/// Build pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildState {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "prepare")]
    Prepared,
    #[serde(rename = "partition")]
    Partitioned,
    #[serde(rename = "mount")]
    Mounted,
    #[serde(rename = "bootloader")]
    BootloaderConverted,
    #[serde(rename = "label")]
    Labeled,
    #[serde(rename = "copy")]
    FilesCopied,
    #[serde(rename = "edit")]
    Edited,
    #[serde(rename = "cleanup")]
    CleanedUp,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error,
}

impl BuildState {
    /// The state following this one on the success path
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Prepared),
            Self::Prepared => Some(Self::Partitioned),
            Self::Partitioned => Some(Self::Mounted),
            Self::Mounted => Some(Self::BootloaderConverted),
            Self::BootloaderConverted => Some(Self::Labeled),
            Self::Labeled => Some(Self::FilesCopied),
            Self::FilesCopied => Some(Self::Edited),
            Self::Edited | Self::Error => Some(Self::CleanedUp),
            Self::CleanedUp => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Prepared => "prepare",
            Self::Partitioned => "partition",
            Self::Mounted => "mount",
            Self::BootloaderConverted => "bootloader",
            Self::Labeled => "label",
            Self::FilesCopied => "copy",
            Self::Edited => "edit",
            Self::CleanedUp => "cleanup",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Target image
    pub image_path: PathBuf,
    /// Build or update
    pub mode: Mode,
    /// Expanded preset
    pub profile: Profile,
    /// Stage log
    pub stages: Vec<StageRecord>,
    /// Label written to the target, if any
    pub label: Option<AppliedLabel>,
    /// Copy directives that succeeded
    pub copies_applied: usize,
    /// Edits that changed a file
    pub edits_applied: usize,
    /// Non-fatal conditions, in the order they occurred
    pub warnings: Vec<BuildWarning>,
}

impl BuildReport {
    fn new(plan: &BuildPlan) -> Self {
        Self {
            image_path: plan.image_path.clone(),
            mode: plan.mode,
            profile: plan.profile,
            stages: Vec::new(),
            label: None,
            copies_applied: 0,
            edits_applied: 0,
            warnings: Vec::new(),
        }
    }

    /// Whether a copy or edit failed
    pub fn has_failures(&self) -> bool {
        self.warnings.iter().any(BuildWarning::is_failure)
    }

    fn warn(&mut self, warning: BuildWarning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }
}

type Observer = Box<dyn Fn(BuildState) + Send>;

/// Map a service error to a failure of `stage`
pub(crate) fn failed(stage: BuildState) -> impl Fn(DiskError) -> BuildError + Copy {
    move |source| BuildError::Stage { stage, source }
}

/// Runs a build plan
pub struct Orchestrator {
    plan: BuildPlan,
    observer: Option<Observer>,
}

impl Orchestrator {
    /// Create an orchestrator for a plan
    pub fn new(plan: BuildPlan) -> Self {
        Self {
            plan,
            observer: None,
        }
    }

    /// Be notified as each state is entered
    #[must_use]
    pub fn with_observer(mut self, observer: impl Fn(BuildState) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Run every stage
    ///
    /// `start` launches the Disk Image Service. It is only called once the
    /// plan has passed its preflight checks, so a configuration error never
    /// touches the disk.
    pub fn run<S, F>(self, start: F) -> Result<BuildReport, BuildError>
    where
        S: DiskImageService,
        F: FnOnce() -> Result<S, DiskError>,
    {
        self.enter(BuildState::Init);
        tracing::debug!("Build plan: {:?}", self.plan);
        if let Err(e) = self.plan.preflight() {
            self.enter(BuildState::Error);
            return Err(e.into());
        }

        let service = match start() {
            Ok(service) => service,
            Err(e) => {
                self.enter(BuildState::Error);
                return Err(failed(BuildState::Prepared)(e));
            }
        };

        let mut session = BuildSession::new(service);
        let mut report = BuildReport::new(&self.plan);
        let result = self.run_stages(&mut session, &mut report);
        if result.is_err() {
            self.enter(BuildState::Error);
        }

        self.enter(BuildState::CleanedUp);
        let cleanup = session.close();

        match (result, cleanup) {
            (Err(e), Err(cleanup_error)) => {
                tracing::warn!("Cleanup after failed build also failed: {}", cleanup_error);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(cleanup_error)) => Err(BuildError::Cleanup(cleanup_error)),
            (Ok(()), Ok(())) => {
                session.record(BuildState::CleanedUp, StageStatus::Completed);
                self.enter(BuildState::Done);
                report.stages = session.stages().to_vec();
                report.label = session.label().cloned();
                Ok(report)
            }
        }
    }

    fn enter(&self, state: BuildState) {
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }

    fn run_stages<S: DiskImageService>(
        &self,
        session: &mut BuildSession<S>,
        report: &mut BuildReport,
    ) -> Result<(), BuildError> {
        self.stage(session, report, BuildState::Prepared, Self::prepare)?;
        self.stage(session, report, BuildState::Partitioned, Self::partition)?;
        self.stage(session, report, BuildState::Mounted, Self::mount)?;
        self.stage(session, report, BuildState::BootloaderConverted, Self::convert_bootloader)?;
        self.stage(session, report, BuildState::Labeled, Self::label)?;
        self.stage(session, report, BuildState::FilesCopied, Self::copy_files)?;
        self.stage(session, report, BuildState::Edited, Self::edit_files)?;
        Ok(())
    }

    fn stage<S, F>(
        &self,
        session: &mut BuildSession<S>,
        report: &mut BuildReport,
        state: BuildState,
        run: F,
    ) -> Result<(), BuildError>
    where
        S: DiskImageService,
        F: FnOnce(&Self, &mut BuildSession<S>, &mut BuildReport) -> Result<StageStatus, BuildError>,
    {
        self.enter(state);
        tracing::info!("Stage '{}'", state);
        let status = run(self, session, report)?;
        if status == StageStatus::Skipped {
            tracing::info!("Stage '{}' skipped", state);
        }
        session.record(state, status);
        Ok(())
    }

    fn prepare<S: DiskImageService>(
        &self,
        session: &mut BuildSession<S>,
        _report: &mut BuildReport,
    ) -> Result<StageStatus, BuildError> {
        let fail = failed(BuildState::Prepared);
        let plan = &self.plan;

        if plan.mode == Mode::Create {
            if plan.image_path.exists() {
                tracing::info!("Overwriting {}", plan.image_path.display());
                filesystem::remove_file(&plan.image_path).map_err(fail)?;
            }
            tracing::info!(
                "Creating {} ({} MB)",
                plan.image_path.display(),
                plan.image_size_mb
            );
            session
                .service()
                .create_image(&plan.image_path, plan.image_size_mb)
                .map_err(fail)?;
        }
        session
            .service()
            .attach_image(&plan.image_path, Access::ReadWrite)
            .map_err(fail)?;

        let source = plan
            .source_image_path
            .as_deref()
            .filter(|_| plan.attach_source());
        if let Some(source) = source {
            tracing::info!("Opening {} read-only", source.display());
            session
                .service()
                .attach_image(source, Access::ReadOnly)
                .map_err(fail)?;
        }

        session.service().launch().map_err(fail)?;

        let devices = session.service().list_devices().map_err(fail)?;
        let mut devices = devices.into_iter();
        let target = devices.next().ok_or_else(|| {
            fail(DiskError::Protocol {
                message: "no device for the target image".to_string(),
            })
        })?;
        session.set_target_device(target);
        if source.is_some() {
            let iso = devices.next().ok_or_else(|| {
                fail(DiskError::Protocol {
                    message: "no device for the source image".to_string(),
                })
            })?;
            session.set_source_device(iso);
        }

        Ok(StageStatus::Completed)
    }

    fn partition<S: DiskImageService>(
        &self,
        session: &mut BuildSession<S>,
        _report: &mut BuildReport,
    ) -> Result<StageStatus, BuildError> {
        let fail = failed(BuildState::Partitioned);
        let device = session.target_device().map_err(fail)?.to_string();

        if self.plan.mode == Mode::Create {
            let partition = session
                .service()
                .create_partition_table(&device)
                .map_err(fail)?;
            let index = partition_index(&partition).ok_or_else(|| {
                fail(DiskError::Protocol {
                    message: format!("unexpected partition name '{partition}'"),
                })
            })?;
            session
                .service()
                .set_bootable(&device, index, true)
                .map_err(fail)?;
            tracing::info!("Created bootable partition {}", partition);
            session.set_target_partition(partition);
            return Ok(StageStatus::Completed);
        }

        let invalid = |reason: &str| BuildError::InvalidImage {
            path: self.plan.image_path.clone(),
            reason: reason.to_string(),
        };

        let partition = session
            .service()
            .list_partitions()
            .map_err(fail)?
            .into_iter()
            .find(|p| p.starts_with(&device))
            .ok_or_else(|| invalid("no partition found"))?;
        let index = partition_index(&partition).ok_or_else(|| invalid("no partition found"))?;

        if !session
            .service()
            .is_bootable(&device, index)
            .map_err(fail)?
        {
            return Err(invalid("partition is not marked bootable"));
        }
        let fstype = session
            .service()
            .filesystem_type(&partition)
            .map_err(fail)?;
        if fstype.is_empty() {
            return Err(invalid("partition is not formatted"));
        }

        tracing::info!("Found existing {} partition {}", fstype, partition);
        session.set_target_partition(partition);
        Ok(StageStatus::Skipped)
    }

    fn mount<S: DiskImageService>(
        &self,
        session: &mut BuildSession<S>,
        _report: &mut BuildReport,
    ) -> Result<StageStatus, BuildError> {
        let fail = failed(BuildState::Mounted);
        let partition = session.target_partition().map_err(fail)?.to_string();

        if self.plan.mode == Mode::Create {
            tracing::info!(
                "Formatting {} as {}",
                partition,
                self.plan.filesystem_type
            );
            session
                .service()
                .format_filesystem(&partition, &self.plan.filesystem_type)
                .map_err(fail)?;
        }

        session
            .mount(&partition, TARGET_MOUNT, Access::ReadWrite)
            .map_err(fail)?;
        if let Some(source) = session.source_device().map(ToString::to_string) {
            session
                .mount(&source, SOURCE_MOUNT, Access::ReadOnly)
                .map_err(fail)?;
        }
        Ok(StageStatus::Completed)
    }

    fn convert_bootloader<S: DiskImageService>(
        &self,
        session: &mut BuildSession<S>,
        report: &mut BuildReport,
    ) -> Result<StageStatus, BuildError> {
        if !self.plan.convert_bootloader {
            return Ok(StageStatus::Skipped);
        }
        let warnings = syslinux::convert(session, &self.plan.syslinux)
            .map_err(failed(BuildState::BootloaderConverted))?;
        for warning in warnings {
            report.warn(warning);
        }
        Ok(StageStatus::Completed)
    }

    fn label<S: DiskImageService>(
        &self,
        session: &mut BuildSession<S>,
        report: &mut BuildReport,
    ) -> Result<StageStatus, BuildError> {
        let fail = failed(BuildState::Labeled);
        let requested = match &self.plan.label {
            LabelPolicy::Suppressed => return Ok(StageStatus::Skipped),
            LabelPolicy::Explicit(label) => Some(label.as_str()),
            LabelPolicy::Auto => None,
        };

        let mut candidate = String::new();
        if requested.is_none() {
            if let Some(source) = session.source_device().map(ToString::to_string) {
                candidate = session
                    .service()
                    .read_volume_label(&source)
                    .map_err(fail)?;
            }
            if candidate.trim().is_empty() {
                tracing::info!("Source has no volume label, checking bootloader config");
                let config = syslinux::find_config(session).map_err(fail)?;
                match config.map(|(_, content)| label::label_from_config(&content)) {
                    Some(Ok(Some(found))) => candidate = found,
                    Some(Err(warning)) => {
                        report.warn(warning);
                        return Ok(StageStatus::Skipped);
                    }
                    Some(Ok(None)) | None => {}
                }
            }
        }

        let fstype = match self.plan.mode {
            Mode::Create => self.plan.filesystem_type.clone(),
            Mode::Update => {
                let partition = session.target_partition().map_err(fail)?.to_string();
                session
                    .service()
                    .filesystem_type(&partition)
                    .map_err(fail)?
            }
        };

        let Some(applied) = label::resolve_label(requested, &candidate, &fstype) else {
            tracing::info!("No volume label available, leaving it unchanged");
            return Ok(StageStatus::Skipped);
        };
        if let Some(warning) = label::truncation_warning(&applied, &fstype) {
            report.warn(warning);
        }

        let warnings =
            label::apply_label(session, &applied, self.plan.patch_config_labels).map_err(fail)?;
        for warning in warnings {
            report.warn(warning);
        }
        session.set_label(applied);
        Ok(StageStatus::Completed)
    }

    fn copy_files<S: DiskImageService>(
        &self,
        session: &mut BuildSession<S>,
        report: &mut BuildReport,
    ) -> Result<StageStatus, BuildError> {
        let fail = failed(BuildState::FilesCopied);
        let plan = &self.plan;
        if !plan.bulk_copy && plan.copy_specs.is_empty() && plan.required_source_entries.is_empty() {
            return Ok(StageStatus::Skipped);
        }

        for entry in &plan.required_source_entries {
            if !session
                .service()
                .exists(&join(SOURCE_MOUNT, entry))
                .map_err(fail)?
            {
                report.warn(BuildWarning::MissingSourceEntry {
                    entry: entry.clone(),
                });
            }
        }

        if plan.bulk_copy {
            let entries = session
                .service()
                .list_directory(SOURCE_MOUNT)
                .map_err(fail)?;
            for entry in selection::bulk_entries(&entries) {
                tracing::info!("Copying {}", entry);
                if let Err(e) = session
                    .service()
                    .copy_tree(&join(SOURCE_MOUNT, &entry), TARGET_MOUNT)
                {
                    report.warn(BuildWarning::CopyFailure {
                        source_path: entry,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for spec in &plan.copy_specs {
            match copy_one(session, spec) {
                Ok(()) => report.copies_applied += 1,
                Err(e) => report.warn(BuildWarning::CopyFailure {
                    source_path: spec.source_path.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        Ok(StageStatus::Completed)
    }

    fn edit_files<S: DiskImageService>(
        &self,
        session: &mut BuildSession<S>,
        report: &mut BuildReport,
    ) -> Result<StageStatus, BuildError> {
        if self.plan.edit_specs.is_empty() {
            return Ok(StageStatus::Skipped);
        }

        for spec in &self.plan.edit_specs {
            match edit_one(session, spec) {
                Ok(None) => report.edits_applied += 1,
                Ok(Some(warning)) => report.warn(warning),
                Err(e) => report.warn(BuildWarning::EditFailure {
                    path: spec.target_path.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        Ok(StageStatus::Completed)
    }
}

fn copy_one<S: DiskImageService>(
    session: &mut BuildSession<S>,
    spec: &CopySpec,
) -> Result<(), DiskError> {
    let resolved = selection::resolve_source(spec);
    match resolved.origin {
        Origin::HostFs => {
            let host = resolved.host_path();
            tracing::info!("Copying {} from host", host.display());
            filesystem::upload(session.service(), &host, TARGET_MOUNT)?;
        }
        Origin::SourceImageFs => {
            let source = resolved.appliance_path();
            if !session.service().exists(&source)? {
                return Err(DiskError::NotFound { path: source });
            }
            let destination = resolved.destination_dir();
            tracing::info!("Copying {} to {}", source, destination);
            session.service().make_dir(&destination)?;
            session.service().copy_tree(&source, &destination)?;
        }
    }
    Ok(())
}

/// Read-modify-write one edit; a warning means nothing was written
fn edit_one<S: DiskImageService>(
    session: &mut BuildSession<S>,
    spec: &EditSpec,
) -> Result<Option<BuildWarning>, DiskError> {
    let path = selection::target_path(&spec.target_path);
    if !session.service().exists(&path)? {
        return Err(DiskError::NotFound { path });
    }
    if session.service().is_dir(&path)? {
        return Ok(Some(BuildWarning::EditFailure {
            path,
            reason: "is a directory".to_string(),
        }));
    }

    let bytes = session.service().read_file(&path)?;
    let Ok(content) = String::from_utf8(bytes) else {
        return Ok(Some(BuildWarning::EditFailure {
            path,
            reason: "not a text file".to_string(),
        }));
    };

    let outcome = spec.line_edit().apply(&content);
    if outcome.lines_matched == 0 {
        return Ok(Some(BuildWarning::PatchNotApplicable {
            path,
            match_token: spec.match_token.clone(),
        }));
    }
    if outcome.is_noop() {
        return Ok(Some(BuildWarning::NoReplacements {
            path,
            match_token: spec.match_token.clone(),
            search: spec.search.clone(),
        }));
    }

    tracing::info!("Edited {} lines of {}", outcome.lines_changed, path);
    session
        .service()
        .write_file(&path, outcome.content.as_bytes())?;
    Ok(None)
}
