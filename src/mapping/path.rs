//! Separator-agnostic path handling for virtual roots.
//!
//! Virtual roots are compared segment by segment, splitting on both `\` and `/`, so the same
//! table logic works for native Windows paths and for paths built on other hosts.

use crate::config::types::{BindError, Result};
use std::path::{Path, PathBuf};

/// Split a path into normalized segments.
///
/// Empty and `.` segments are dropped; `..` is rejected because a virtual root must name one
/// location unambiguously.
pub fn segments(path: &Path) -> Result<Vec<String>> {
    let text = path.to_string_lossy();
    let mut out = Vec::new();
    for segment in text.split(['\\', '/']) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(BindError::InvalidParameter(format!(
                    "path may not contain '..': {}",
                    path.display()
                )))
            }
            s => out.push(s.to_string()),
        }
    }

    if out.is_empty() {
        return Err(BindError::InvalidParameter(format!(
            "empty path: '{}'",
            path.display()
        )));
    }
    Ok(out)
}

fn fold(segment: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        segment.to_lowercase()
    } else {
        segment.to_string()
    }
}

/// Canonical lookup key for a path
pub fn key(path: &Path, case_insensitive: bool) -> Result<String> {
    Ok(segments(path)?
        .iter()
        .map(|s| fold(s, case_insensitive))
        .collect::<Vec<_>>()
        .join("\\"))
}

/// Segments of `child` below `root`, or `None` when `child` is not inside `root`.
/// An identical path yields an empty remainder.
pub fn remainder(child: &Path, root: &Path, case_insensitive: bool) -> Result<Option<Vec<String>>> {
    let child = segments(child)?;
    let root = segments(root)?;
    if child.len() < root.len() {
        return Ok(None);
    }

    let inside = child
        .iter()
        .zip(root.iter())
        .all(|(c, r)| fold(c, case_insensitive) == fold(r, case_insensitive));
    if !inside {
        return Ok(None);
    }
    Ok(Some(child[root.len()..].to_vec()))
}

/// True when `child` lies strictly below `root`
pub fn is_strict_descendant(child: &Path, root: &Path, case_insensitive: bool) -> Result<bool> {
    Ok(matches!(
        remainder(child, root, case_insensitive)?,
        Some(rest) if !rest.is_empty()
    ))
}

/// Parent of a virtual root, `None` for a bare volume
pub fn parent(path: &Path) -> Result<Option<PathBuf>> {
    let segs = segments(path)?;
    if segs.len() < 2 {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(segs[..segs.len() - 1].join("\\"))))
}

/// Volume component (drive or first segment) used to key filter attachment
pub fn volume(path: &Path) -> Result<String> {
    Ok(segments(path)?[0].to_ascii_uppercase())
}

/// Append segments to a base path using the Windows separator
pub fn join(base: &Path, rest: &[String]) -> PathBuf {
    let mut text = base.to_string_lossy().trim_end_matches(['\\', '/']).to_string();
    for segment in rest {
        text.push('\\');
        text.push_str(segment);
    }
    PathBuf::from(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_mixed_separators() {
        let segs = segments(Path::new("D:\\vfs-testing-root/physical1\\.\\")).unwrap();
        assert_eq!(segs, vec!["D:", "vfs-testing-root", "physical1"]);
    }

    #[test]
    fn test_segments_rejects_parent_and_empty() {
        assert!(segments(Path::new("D:\\a\\..\\b")).is_err());
        assert!(segments(Path::new("\\\\")).is_err());
    }

    #[test]
    fn test_strict_descendant() {
        let root = Path::new("D:\\root\\virtual");
        assert!(is_strict_descendant(Path::new("D:\\root\\virtual\\sub"), root, false).unwrap());
        assert!(!is_strict_descendant(Path::new("D:\\root\\virtual"), root, false).unwrap());
        assert!(!is_strict_descendant(Path::new("D:\\root\\virtualx"), root, false).unwrap());
        assert!(!is_strict_descendant(Path::new("D:\\root\\VIRTUAL\\sub"), root, false).unwrap());
        assert!(is_strict_descendant(Path::new("D:\\root\\VIRTUAL\\sub"), root, true).unwrap());
    }

    #[test]
    fn test_parent_volume_and_join() {
        assert_eq!(
            parent(Path::new("D:\\a\\b")).unwrap(),
            Some(PathBuf::from("D:\\a"))
        );
        assert_eq!(parent(Path::new("D:\\")).unwrap(), None);
        assert_eq!(volume(Path::new("d:\\a\\b")).unwrap(), "D:");
        assert_eq!(
            join(Path::new("D:\\phys\\"), &["x".to_string(), "y.txt".to_string()]),
            PathBuf::from("D:\\phys\\x\\y.txt")
        );
    }

    #[test]
    fn test_key_case_folding() {
        assert_eq!(key(Path::new("D:/A/b"), true).unwrap(), "d:\\a\\b");
        assert_eq!(key(Path::new("D:/A/b"), false).unwrap(), "D:\\A\\b");
    }
}
