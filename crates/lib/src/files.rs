//! File descriptors sent with `file` frames, plus attachment validation.
//!
//! Only metadata travels over the connection; file contents never do.

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Largest attachment accepted (10 MiB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Longest accepted file name, in characters.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// MIME types accepted as attachments.
pub const ALLOWED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "text/plain",
    "text/csv",
    "text/markdown",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Attachment metadata (wire: `{ id, name, type, size, lastModified? }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    /// Unix ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileError {
    #[error("file name is missing")]
    MissingName,
    #[error("file type is missing")]
    MissingType,
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("file is too large ({0} bytes); the limit is {} bytes", MAX_FILE_SIZE)]
    TooLarge(u64),
    #[error("file name is too long")]
    NameTooLong,
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("reading file metadata: {0}")]
    Io(String),
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            last_modified: None,
        }
    }

    /// Build a descriptor from a file on disk and validate it.
    pub fn from_path(path: &Path) -> Result<Self, FileError> {
        let meta = std::fs::metadata(path).map_err(|e| FileError::Io(e.to_string()))?;
        if !meta.is_file() {
            return Err(FileError::Io(format!("{} is not a regular file", path.display())));
        }
        let name = path
            .file_name()
            .map(|n| sanitize_file_name(&n.to_string_lossy()))
            .ok_or(FileError::MissingName)?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        let descriptor = Self {
            id: Uuid::new_v4(),
            mime_type: guess_mime_type(&name),
            name,
            size: meta.len(),
            last_modified,
        };
        validate(&descriptor)?;
        Ok(descriptor)
    }

    pub fn size_formatted(&self) -> String {
        format_file_size(self.size)
    }
}

/// Check that a descriptor is complete and acceptable as an attachment.
pub fn validate(file: &FileDescriptor) -> Result<(), FileError> {
    if file.name.trim().is_empty() {
        return Err(FileError::MissingName);
    }
    if file.mime_type.trim().is_empty() {
        return Err(FileError::MissingType);
    }
    if !ALLOWED_TYPES.contains(&file.mime_type.as_str()) {
        return Err(FileError::UnsupportedType(file.mime_type.clone()));
    }
    if file.size > MAX_FILE_SIZE {
        return Err(FileError::TooLarge(file.size));
    }
    validate_name(&file.name)
}

fn validate_name(name: &str) -> Result<(), FileError> {
    if name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(FileError::NameTooLong);
    }
    if name.contains("..") || name.contains(FORBIDDEN_NAME_CHARS) {
        return Err(FileError::InvalidName(name.to_string()));
    }
    if RESERVED_NAMES.iter().any(|r| name.eq_ignore_ascii_case(r)) {
        return Err(FileError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Guess a MIME type from the file extension. Unknown extensions map to
/// `application/octet-stream`, which validation rejects.
pub fn guess_mime_type(path: impl AsRef<Path>) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Replace characters that are not allowed in file names with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Human-readable size: "0 Bytes", "512 Bytes", "1.5 KB", "10 MB".
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
