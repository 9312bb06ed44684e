//! Tree path normalization.
//!
//! Tree paths are always `/`-separated. Host separators are accepted on
//! input, and empty and `.` segments are dropped, so `"b/c//./"`, `"b/c"`
//! and (on Windows) `"b\\c"` all name the same entry.

use crate::error::{Error, Result};

/// Split a path into its normalized segments. The root is `[]`.
pub fn segments(path: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split(is_separator) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::invalid_path(
                    path,
                    "parent directory segments are not allowed",
                ));
            }
            s if s.contains('\0') => {
                return Err(Error::invalid_path(path, "contains a null byte"));
            }
            s => segments.push(s),
        }
    }
    Ok(segments)
}

/// Normalize a path to `a/b/c` form. The root normalizes to `""`.
pub fn normalize(path: &str) -> Result<String> {
    Ok(segments(path)?.join("/"))
}

/// Join a normalized parent path and a child name.
pub(crate) fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == std::path::MAIN_SEPARATOR
}
