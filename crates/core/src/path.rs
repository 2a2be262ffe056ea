//! Path canonicalisation and mount-point prefix matching.

use crate::error::AgfsError;

/// Produce the canonical form of a VFS path.
///
/// Rules: prepend `/` if missing, collapse repeated slashes, resolve `.`
/// and `..` logically without ever escaping the root, and strip a trailing
/// `/` unless the whole path is the root.
pub fn normalize(p: &str) -> Result<String, AgfsError> {
    if p.is_empty() {
        return Err(AgfsError::invalid_argument("empty path"));
    }
    if p.as_bytes().contains(&0) {
        return Err(AgfsError::invalid_argument("path contains NUL byte"));
    }

    let mut stack: Vec<&str> = Vec::new();
    for segment in p.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    if stack.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", stack.join("/")))
    }
}

/// Split a canonical path into its components (always non-empty strings,
/// root yields an empty slice).
pub fn components(p: &str) -> Vec<&str> {
    p.split('/').filter(|s| !s.is_empty()).collect()
}

/// Find the mount point in `points` that is the longest component-aligned
/// prefix of `path`, returning its index and the path rewritten relative to
/// that mount (always starting with `/`).
///
/// Component-aligned means `/foo` does not match `/foobar`: matching stops
/// at path-segment boundaries, never partial segments.
pub fn longest_prefix_mount<'a>(
    path: &str,
    points: impl Iterator<Item = &'a str>,
) -> Option<(usize, String)> {
    let path_components = components(path);

    let mut best: Option<(usize, usize)> = None; // (index, matched component count)
    for (idx, point) in points.enumerate() {
        let point_components = components(point);
        if point_components.len() > path_components.len() {
            continue;
        }
        if path_components[..point_components.len()] != point_components[..] {
            continue;
        }
        let depth = point_components.len();
        if best.map(|(_, best_depth)| depth > best_depth).unwrap_or(true) {
            best = Some((idx, depth));
        }
    }

    best.map(|(idx, depth)| {
        let remaining = &path_components[depth..];
        let relative = if remaining.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", remaining.join("/"))
        };
        (idx, relative)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_idempotent() {
        let cases = ["/a/b/c", "/a//b/./c/", "/../a/b", "a/b", "/", "//"];
        for c in cases {
            let once = normalize(c).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {c:?}");
        }
    }

    #[test]
    fn normalize_basic_rules() {
        assert_eq!(normalize("foo").unwrap(), "/foo");
        assert_eq!(normalize("/a//b").unwrap(), "/a/b");
        assert_eq!(normalize("/a/./b").unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/..").unwrap(), "/a");
        assert_eq!(normalize("/a/../../b").unwrap(), "/b");
        assert_eq!(normalize("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("").is_err(), true);
        assert_eq!(normalize("/a\0b").is_err(), true);
    }

    #[test]
    fn prefix_match_is_component_aligned() {
        let points = ["/", "/foo", "/foobar"];
        let (idx, rel) = longest_prefix_mount("/foobar/baz", points.iter().copied()).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(rel, "/baz");

        let (idx, rel) = longest_prefix_mount("/foo/baz", points.iter().copied()).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(rel, "/baz");
    }

    #[test]
    fn prefix_match_root_mount_gets_full_path() {
        let points = ["/"];
        let (idx, rel) = longest_prefix_mount("/a/b", points.iter().copied()).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(rel, "/a/b");
    }

    #[test]
    fn prefix_match_no_mount_is_none() {
        let points: [&str; 0] = [];
        assert!(longest_prefix_mount("/a", points.iter().copied()).is_none());
    }
}
