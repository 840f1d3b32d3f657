use std::path::{Component, Path};

use crate::TransferError;

/// Validates a file name announced by a remote peer before it is used to
/// create a file locally.
///
/// The name must be a single plain path component. Rejects:
/// - Empty names
/// - Names containing a path separator
/// - `.` and `..`
/// - Absolute paths and Windows prefixes (`C:`, `\\server`)
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidFileName("empty name".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidFileName(format!(
            "path separator not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidFileName(format!(
            "not a plain file name: {name}"
        ))),
    }
}
