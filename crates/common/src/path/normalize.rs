// Request path validation: clean, relative, no traversal, 4096 byte max.

use thiserror::Error;

/// Maximum allowed path length in bytes.
const MAX_PATH_BYTES: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path exceeds maximum length of {MAX_PATH_BYTES} bytes")]
    TooLong,

    #[error("path is absolute")]
    Absolute,

    #[error("path contains an empty segment")]
    EmptySegment,

    #[error("path contains directory traversal component: {0}")]
    Traversal(String),

    #[error("path contains null byte")]
    NullByte,

    #[error("path contains invalid component: {0}")]
    InvalidComponent(String),
}

/// Validate a path relative to the root of a virtual filesystem.
///
/// Rules:
/// - Reject empty paths
/// - Reject null bytes and backslashes
/// - Reject absolute paths (leading `/`)
/// - Reject empty segments (`a//b`, trailing `/`)
/// - Reject `.` and `..` segments
/// - Enforce max 4096 byte limit
///
/// The path is never rewritten: a path that is not already clean is invalid.
pub fn validate_path(path: &str) -> Result<&str, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    if path.contains('\0') {
        return Err(PathError::NullByte);
    }

    if path.len() > MAX_PATH_BYTES {
        return Err(PathError::TooLong);
    }

    if path.starts_with('/') {
        return Err(PathError::Absolute);
    }

    if path.contains('\\') {
        return Err(PathError::InvalidComponent("\\".to_string()));
    }

    for segment in path.split('/') {
        match segment {
            "" => return Err(PathError::EmptySegment),
            "." | ".." => return Err(PathError::Traversal(segment.to_string())),
            _ => {}
        }
    }

    Ok(path)
}

/// Returns true when `path` passes [`validate_path`].
pub fn is_valid_path(path: &str) -> bool {
    validate_path(path).is_ok()
}

/// Map an HTTP request path onto a filesystem-relative path.
///
/// Exactly one leading `/` is stripped before validation, so `//etc` stays
/// absolute and is rejected.
pub fn request_path(raw: &str) -> Result<&str, PathError> {
    validate_path(raw.strip_prefix('/').unwrap_or(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Valid paths
    #[test]
    fn test_simple_path() {
        assert_eq!(validate_path("docs/readme.md"), Ok("docs/readme.md"));
    }

    #[test]
    fn test_single_filename() {
        assert_eq!(validate_path("index.html"), Ok("index.html"));
    }

    #[test]
    fn test_request_path_strips_one_leading_slash() {
        assert_eq!(request_path("/css/site.css"), Ok("css/site.css"));
    }

    #[test]
    fn test_request_path_without_leading_slash() {
        assert_eq!(request_path("css/site.css"), Ok("css/site.css"));
    }

    // Traversal attacks
    #[test]
    fn test_reject_dotdot() {
        assert_eq!(
            validate_path("docs/../etc/passwd"),
            Err(PathError::Traversal("..".to_string()))
        );
    }

    #[test]
    fn test_reject_leading_dotdot_request() {
        assert_eq!(
            request_path("/../etc/passwd"),
            Err(PathError::Traversal("..".to_string()))
        );
    }

    #[test]
    fn test_reject_dot_component() {
        assert_eq!(
            validate_path("docs/./file.md"),
            Err(PathError::Traversal(".".to_string()))
        );
    }

    #[test]
    fn test_reject_backslash_traversal() {
        assert_eq!(
            validate_path("docs\\..\\etc\\passwd"),
            Err(PathError::InvalidComponent("\\".to_string()))
        );
    }

    #[test]
    fn test_reject_double_leading_slash_request() {
        assert_eq!(request_path("//etc/passwd"), Err(PathError::Absolute));
    }

    // Edge cases
    #[test]
    fn test_reject_empty() {
        assert_eq!(validate_path(""), Err(PathError::Empty));
    }

    #[test]
    fn test_reject_root_request() {
        assert_eq!(request_path("/"), Err(PathError::Empty));
    }

    #[test]
    fn test_reject_empty_segment() {
        assert_eq!(validate_path("docs//file.md"), Err(PathError::EmptySegment));
    }

    #[test]
    fn test_reject_trailing_slash() {
        assert_eq!(validate_path("docs/"), Err(PathError::EmptySegment));
    }

    #[test]
    fn test_reject_null_byte() {
        assert_eq!(validate_path("docs/file\0.md"), Err(PathError::NullByte));
    }

    #[test]
    fn test_max_length_exactly() {
        let path = "a".repeat(MAX_PATH_BYTES);
        assert!(is_valid_path(&path));
    }

    #[test]
    fn test_over_max_length() {
        let path = "a".repeat(MAX_PATH_BYTES + 1);
        assert_eq!(validate_path(&path), Err(PathError::TooLong));
    }

    // Filenames that look dangerous but are valid
    #[test]
    fn test_dotfile_allowed() {
        assert_eq!(validate_path(".gitignore"), Ok(".gitignore"));
    }

    #[test]
    fn test_dots_in_filename_allowed() {
        assert_eq!(validate_path("file.backup.2024.md"), Ok("file.backup.2024.md"));
    }

    #[test]
    fn test_triple_dot_filename_allowed() {
        assert_eq!(validate_path("docs/..."), Ok("docs/..."));
    }
}
