//! Virtual path handling.
//!
//! Virtual paths are `/`-separated. Normalization resolves `.` and `..`
//! segments, collapses duplicate separators, and clamps `..` at the root,
//! matching `path.resolve` semantics in Node.

/// Split a path into normalized segments, resolving `.` and `..`.
///
/// Relative paths are resolved against the root. `..` above the root is
/// dropped rather than an error.
pub fn segments(path: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            _ => out.push(seg.to_string()),
        }
    }
    out
}

/// Normalize a path to its canonical absolute form.
pub fn normalize(path: &str) -> String {
    let segs = segments(path);
    if segs.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segs.join("/"))
    }
}

/// Join a relative path onto an absolute base directory and normalize.
///
/// An absolute `rel` ignores `base` entirely.
pub fn join(base: &str, rel: &str) -> String {
    if rel.starts_with('/') {
        normalize(rel)
    } else {
        normalize(&format!("{}/{}", base, rel))
    }
}

/// The directory component of a normalized path (`/` for top-level entries).
pub fn dirname(path: &str) -> String {
    let norm = normalize(path);
    match norm.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => norm[..idx].to_string(),
    }
}

/// The final component of a path, or `""` for the root.
pub fn basename(path: &str) -> String {
    let norm = normalize(path);
    match norm.rfind('/') {
        Some(idx) => norm[idx + 1..].to_string(),
        None => norm,
    }
}

/// The extension of the final component including the dot, or `""`.
pub fn extname(path: &str) -> String {
    let base = basename(path);
    match base.rfind('.') {
        // A leading dot (`.gitignore`) is a hidden file, not an extension.
        Some(idx) if idx > 0 => base[idx..].to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/a/b/../c"), "/a/c");
        assert_eq!(normalize("a//b/./c/"), "/a/b/c");
        assert_eq!(normalize("/../../x"), "/x");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/a/b", "c.js"), "/a/b/c.js");
        assert_eq!(join("/a/b", "../c.js"), "/a/c.js");
        assert_eq!(join("/a/b", "/abs.js"), "/abs.js");
        assert_eq!(join("/", "./x"), "/x");
    }

    #[test]
    fn test_dirname_basename() {
        assert_eq!(dirname("/a/b/c.js"), "/a/b");
        assert_eq!(dirname("/c.js"), "/");
        assert_eq!(dirname("/"), "/");
        assert_eq!(basename("/a/b/c.js"), "c.js");
        assert_eq!(basename("/"), "");
    }

    #[test]
    fn test_extname() {
        assert_eq!(extname("/a/mod.test.js"), ".js");
        assert_eq!(extname("/a/.gitignore"), "");
        assert_eq!(extname("/a/Makefile"), "");
    }
}
