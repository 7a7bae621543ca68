//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a volume label as found on distribution ISOs
    pub fn volume_label() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_-]{0,10}( [A-Za-z0-9_-]{1,8}){0,3}"
    }

    /// Generate a filesystem type the label manager knows about
    pub fn fstype() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("vfat".to_string()),
            Just("xfs".to_string()),
            Just("ext4".to_string()),
            Just("ntfs".to_string()),
            Just("btrfs".to_string()),
        ]
    }

    /// Generate a syslinux config line
    pub fn config_line() -> impl Strategy<Value = String> {
        prop_oneof![
            "label [a-z]{1,8}",
            "  menu label \\^[A-Za-z ]{1,16}",
            "  kernel vmlinuz",
            "[A-Za-z0-9]{1,8}".prop_map(|label| {
                format!("  append initrd=initrd.img inst.stage2=hd:LABEL={label} quiet")
            }),
            Just(String::new()),
        ]
    }

    /// Generate a copy directive: host paths (`./x`, `/x`) or image paths
    pub fn copy_spec() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,8}(/[a-z]{1,8}){0,2}".prop_map(|p| format!("./{p}")),
            "[a-z]{1,8}(/[a-z]{1,8}){0,2}".prop_map(|p| format!("/{p}")),
            "\\.?[A-Za-z][A-Za-z0-9_]{0,8}(/[a-z]{1,8}){0,2}",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_volume_label_generator(label in volume_label()) {
            prop_assert!(!label.is_empty());
            prop_assert_eq!(label.trim_end(), label.as_str());
        }

        #[test]
        fn test_config_line_generator(line in config_line()) {
            prop_assert!(!line.contains('\n'));
        }

        #[test]
        fn test_copy_spec_generator(spec in copy_spec()) {
            prop_assert!(!spec.is_empty());
            prop_assert!(!spec.ends_with('/'));
        }
    }
}
