use std::path::{Path, PathBuf};

use crate::bagit::consts::*;

/// Replaces all backslashes with forward slashes. All of the path comparisons
/// within a bag operate on forward-slash form, regardless of platform.
pub fn standardize<S: AsRef<str>>(path: S) -> String {
    path.as_ref().replace('\\', "/")
}

/// Lexically resolves `.` and `..` segments without touching the filesystem.
/// A leading `/` or drive letter is preserved, and a `..` that would climb out
/// of a rooted path is consumed.
pub fn canonicalize<S: AsRef<str>>(path: S) -> String {
    let path = standardize(path);

    let (prefix, rest) = split_root(&path);
    let mut segments: Vec<&str> = Vec::new();

    for segment in rest.split('/') {
        match segment {
            "" | "." => (),
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    let mut canonical = String::with_capacity(path.len());
    canonical.push_str(prefix);
    canonical.push_str(&segments.join("/"));
    canonical
}

/// Resolves `path` to an absolute path under `base_dir`. Paths that are
/// already below `base_dir` are returned as-is.
pub fn make_absolute<B: AsRef<Path>, S: AsRef<str>>(base_dir: B, path: S) -> PathBuf {
    let base = standardize(base_dir.as_ref().to_string_lossy());
    let path = standardize(path);

    if path == base || path.starts_with(&format!("{base}/")) {
        return PathBuf::from(path);
    }

    PathBuf::from(canonicalize(format!("{base}/{path}")))
}

/// Returns the forward-slash path of `path` relative to `base_dir`, or an
/// empty string when the path does not live below `base_dir`. The empty
/// string is the sentinel for "outside the bag".
pub fn make_relative<B: AsRef<Path>, P: AsRef<Path>>(base_dir: B, path: P) -> String {
    let base = canonicalize(base_dir.as_ref().to_string_lossy());
    let path = canonicalize(path.as_ref().to_string_lossy());

    match path.strip_prefix(&format!("{base}/")) {
        Some(relative) => relative.into(),
        None => "".into(),
    }
}

/// Prefixes the path with `data/` unless it is already rooted there
pub fn base_in_data<S: AsRef<str>>(path: S) -> String {
    let path = standardize(path);
    if path == DATA || path.starts_with("data/") {
        path
    } else {
        format!("{DATA}/{path}")
    }
}

/// True if the final component of the path is a basename Windows reserves
pub fn is_reserved_basename<S: AsRef<str>>(path: S) -> bool {
    let path = standardize(path);
    match path.rsplit('/').next() {
        Some(name) => WINDOWS_RESERVED_MATCHER.is_match(name),
        None => false,
    }
}

/// Splits off a leading `/` or a drive letter prefix such as `C:/`
fn split_root(path: &str) -> (&str, &str) {
    if let Some(rest) = path.strip_prefix('/') {
        ("/", rest)
    } else if path.len() >= 3
        && path.as_bytes()[1] == b':'
        && path.as_bytes()[2] == b'/'
        && path.as_bytes()[0].is_ascii_alphabetic()
    {
        path.split_at(3)
    } else {
        ("", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_resolves_dots() {
        assert_eq!("a/c", canonicalize("a/b/../c"));
        assert_eq!("a/b", canonicalize("./a/./b/"));
        assert_eq!("/a/b", canonicalize("/a//b"));
        assert_eq!("b", canonicalize("a/../../b"));
        assert_eq!("/b", canonicalize("/../../b"));
        assert_eq!("C:/b", canonicalize("C:/a/../../b"));
    }

    #[test]
    fn canonicalize_standardizes_separators() {
        assert_eq!("a/b/c", canonicalize("a\\b\\c"));
    }

    #[test]
    fn make_relative_returns_empty_when_outside() {
        assert_eq!("data/file.txt", make_relative("/bag", "/bag/data/file.txt"));
        assert_eq!("", make_relative("/bag", "/elsewhere/file.txt"));
        assert_eq!("", make_relative("/bag", "/bag/../file.txt"));
        assert_eq!("", make_relative("/bag", "/bag"));
    }

    #[test]
    fn make_absolute_joins_and_resolves() {
        assert_eq!(
            PathBuf::from("/bag/data/file.txt"),
            make_absolute("/bag", "data/file.txt")
        );
        assert_eq!(
            PathBuf::from("/bag/data/file.txt"),
            make_absolute("/bag", "/bag/data/file.txt")
        );
        assert_eq!(
            PathBuf::from("/bag/file.txt"),
            make_absolute("/bag", "data/../file.txt")
        );
    }

    #[test]
    fn base_in_data_prefixes_once() {
        assert_eq!("data/a.txt", base_in_data("a.txt"));
        assert_eq!("data/a.txt", base_in_data("data/a.txt"));
        assert_eq!("data", base_in_data("data"));
        assert_eq!("data/data/a.txt", base_in_data("data\\data/a.txt"));
    }

    #[test]
    fn reserved_basenames_match_case_insensitively() {
        assert!(is_reserved_basename("data/CON"));
        assert!(is_reserved_basename("data/sub/com4"));
        assert!(is_reserved_basename("Nul"));
        assert!(!is_reserved_basename("data/CON.txt"));
        assert!(!is_reserved_basename("data/console"));
    }
}
