//! Volume label management
//!
//! Derives the target volume label (explicitly requested or taken from the
//! source image), fits it to the filesystem's length limit, writes it to the
//! partition and keeps `LABEL=` references in the bootloader config in step.

use serde::Serialize;

use super::patch::PatchOutcome;
use super::session::BuildSession;
use super::syslinux;
use crate::error::{BuildWarning, DiskError};
use crate::infra::disk::DiskImageService;

/// Token that introduces a label reference in syslinux config lines
pub const LABEL_TOKEN: &str = "LABEL=";

/// Escaped form of a space inside syslinux config values
const ESCAPED_SPACE: &str = "\\x20";

/// The label actually written to the target filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedLabel {
    /// Label as written to disk
    pub label: String,
    /// Candidate before truncation
    pub original: String,
    /// Whether truncation happened
    pub truncated: bool,
}

/// Maximum label length for a filesystem type, if it has one
pub fn max_label_len(fstype: &str) -> Option<usize> {
    match fstype.to_ascii_lowercase().as_str() {
        "vfat" | "fat" | "msdos" | "fat12" | "fat16" | "fat32" | "exfat" => Some(11),
        "xfs" => Some(12),
        "ext2" | "ext3" | "ext4" => Some(16),
        "ntfs" => Some(128),
        "btrfs" => Some(255),
        _ => None,
    }
}

/// Shorten `label` to the filesystem's limit
///
/// Returns the (possibly shortened) label and whether it was cut.
pub fn truncate_label(label: &str, fstype: &str) -> (String, bool) {
    match max_label_len(fstype) {
        Some(max) if label.chars().count() > max => (label.chars().take(max).collect(), true),
        _ => (label.to_string(), false),
    }
}

/// Decide the label to apply
///
/// An explicit request wins over the source volume label. Returns `None`
/// when neither yields a non-empty candidate.
pub fn resolve_label(
    requested: Option<&str>,
    source_volume_label: &str,
    fstype: &str,
) -> Option<AppliedLabel> {
    let candidate = requested
        .filter(|l| !l.is_empty())
        .unwrap_or(source_volume_label)
        .trim_end();
    if candidate.is_empty() {
        return None;
    }

    let (label, truncated) = truncate_label(candidate, fstype);
    Some(AppliedLabel {
        label,
        original: candidate.to_string(),
        truncated,
    })
}

/// Warning for a truncated label, if any
pub fn truncation_warning(applied: &AppliedLabel, fstype: &str) -> Option<BuildWarning> {
    applied.truncated.then(|| BuildWarning::LabelTruncated {
        original: applied.original.clone(),
        truncated: applied.label.clone(),
        max: max_label_len(fstype).unwrap_or(applied.label.len()),
        fstype: fstype.to_string(),
    })
}

/// Escape a label for use inside a syslinux config line
pub fn escape_label(label: &str) -> String {
    label.replace(' ', ESCAPED_SPACE)
}

/// Undo [`escape_label`]
pub fn unescape_label(value: &str) -> String {
    value.replace(ESCAPED_SPACE, " ")
}

/// Distinct `LABEL=` values referenced by a bootloader config, in order
pub fn find_config_labels(content: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();

    for word in content.split_whitespace() {
        let Some((_, value)) = word.split_once(LABEL_TOKEN) else {
            continue;
        };
        let value = unescape_label(value.split(':').next().unwrap_or_default());
        if !value.is_empty() && !labels.contains(&value) {
            labels.push(value);
        }
    }

    labels
}

/// Fallback autolabel from the bootloader config
///
/// A single distinct `LABEL=` value is the candidate; several are
/// ambiguous.
pub fn label_from_config(content: &str) -> Result<Option<String>, BuildWarning> {
    let mut labels = find_config_labels(content);
    match labels.len() {
        0 => Ok(None),
        1 => Ok(labels.pop()),
        _ => Err(BuildWarning::AmbiguousLabel { candidates: labels }),
    }
}

/// Which referenced label the new one replaces
fn previous_label<'a>(referenced: &'a [String], applied: &AppliedLabel) -> Option<&'a String> {
    referenced
        .iter()
        .find(|l| **l == applied.original)
        .or_else(|| (referenced.len() == 1).then(|| &referenced[0]))
}

/// Rewrite `LABEL=<old>` references into `LABEL=<new>`
///
/// A reference only matches when the value ends right after `old`: at
/// whitespace, a `:` or the end of the line. A longer label that merely
/// starts with `old` is left alone.
pub fn rewrite_label_references(content: &str, old: &str, new: &str) -> PatchOutcome {
    let search = format!("{LABEL_TOKEN}{}", escape_label(old));
    let replace = format!("{LABEL_TOKEN}{}", escape_label(new));
    let mut out = String::with_capacity(content.len());
    let mut lines_matched = 0;
    let mut lines_changed = 0;

    for line in content.split_inclusive('\n') {
        if !line.contains(LABEL_TOKEN) {
            out.push_str(line);
            continue;
        }
        lines_matched += 1;

        let rewritten = replace_whole_values(line, &search, &replace);
        if rewritten != line {
            lines_changed += 1;
        }
        out.push_str(&rewritten);
    }

    PatchOutcome {
        content: out,
        lines_matched,
        lines_changed,
    }
}

fn replace_whole_values(line: &str, search: &str, replace: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(start) = rest.find(search) {
        let end = start + search.len();
        let ends_value = rest[end..]
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == ':');
        out.push_str(&rest[..start]);
        out.push_str(if ends_value { replace } else { search });
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

/// Write the label to the target partition and patch the bootloader config
///
/// The previous label is read from the config before anything is written.
pub fn apply_label<S: DiskImageService>(
    session: &mut BuildSession<S>,
    applied: &AppliedLabel,
    patch_config: bool,
) -> Result<Vec<BuildWarning>, DiskError> {
    let mut warnings = Vec::new();
    let partition = session.target_partition()?.to_string();

    let config = syslinux::find_config(session)?;
    let referenced = match &config {
        Some((_, content)) => find_config_labels(content),
        None => Vec::new(),
    };
    let previous = previous_label(&referenced, applied).cloned();

    tracing::info!("Setting volume label of {} to '{}'", partition, applied.label);
    session
        .service()
        .set_volume_label(&partition, &applied.label)?;

    let (Some((path, content)), Some(previous)) = (config, previous) else {
        tracing::info!("No label references in bootloader config to update");
        return Ok(warnings);
    };
    if previous == applied.label {
        return Ok(warnings);
    }
    if !patch_config {
        tracing::warn!(
            "Filesystem label '{}' differs from '{}' referenced by {} but config patching is disabled",
            applied.label,
            previous,
            path
        );
        return Ok(warnings);
    }

    let outcome = rewrite_label_references(&content, &previous, &applied.label);
    if outcome.is_noop() {
        warnings.push(BuildWarning::NoReplacements {
            path,
            match_token: LABEL_TOKEN.to_string(),
            search: format!("{LABEL_TOKEN}{}", escape_label(&previous)),
        });
    } else {
        tracing::info!(
            "Rewrote label '{}' -> '{}' on {} lines of {}",
            previous,
            applied.label,
            outcome.lines_changed,
            path
        );
        session
            .service()
            .write_file(&path, outcome.content.as_bytes())?;
    }

    Ok(warnings)
}
