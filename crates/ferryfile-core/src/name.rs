//! File name validation.

use crate::OpsError;

/// Longest name most filesystems accept, in bytes.
const MAX_NAME_BYTES: usize = 255;

#[cfg(not(target_os = "windows"))]
const FORBIDDEN: &[char] = &['/', '\0'];

#[cfg(target_os = "windows")]
const FORBIDDEN: &[char] = &['/', '\0', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// DOS device names, reserved on Windows with or without an extension.
#[cfg(target_os = "windows")]
const RESERVED_DEVICES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Check that `name` can be used as a single path component.
///
/// Used for renames, new items and names chosen while resolving conflicts.
pub fn validate_filename(name: &str) -> Result<(), OpsError> {
    let reason = match name {
        "" => Some("name cannot be empty".to_string()),
        "." | ".." => Some(format!("'{name}' refers to a directory, not a name")),
        _ if name.len() > MAX_NAME_BYTES => {
            Some(format!("name is longer than {MAX_NAME_BYTES} bytes"))
        }
        _ => name
            .chars()
            .find(|c| FORBIDDEN.contains(c))
            .map(|c| format!("name cannot contain {c:?}"))
            .or_else(|| {
                (name.trim() != name).then(|| "name cannot start or end with spaces".to_string())
            })
            .or_else(|| name.ends_with('.').then(|| "name cannot end with a dot".to_string()))
            .or_else(|| is_reserved_device(name).then(|| "name is reserved".to_string())),
    };

    match reason {
        Some(reason) => Err(OpsError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(target_os = "windows")]
fn is_reserved_device(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or_default();
    RESERVED_DEVICES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(stem))
}

#[cfg(not(target_os = "windows"))]
fn is_reserved_device(_name: &str) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_ordinary_names() {
        for name in ["report.txt", "my-file", ".hidden", "two words", "doc (1).txt"] {
            assert!(validate_filename(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_unusable_names() {
        let too_long = "x".repeat(256);
        for name in ["", ".", "..", "a/b", "nul\0byte", " lead", "trail ", "dot.", &too_long] {
            assert!(
                matches!(validate_filename(name), Err(OpsError::InvalidName { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_reason_names_the_character() {
        let err = validate_filename("a/b").unwrap_err();
        assert_eq!(err.to_string(), "Invalid name 'a/b': name cannot contain '/'");
    }
}
