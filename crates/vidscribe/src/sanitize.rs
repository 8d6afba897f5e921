//! Helpers for keeping full filesystem paths out of tracing span fields.
//!
//! Upload directories often embed user names or tenant ids; spans only need
//! the file name to be useful.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/home/alice/uploads/ab12/lecture.mp4")),
            "lecture.mp4"
        );
    }

    #[test]
    fn test_redact_path_without_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }
}
