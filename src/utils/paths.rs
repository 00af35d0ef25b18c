use std::path::{Component, Path, PathBuf};

use crate::errors::AgentError;

/// Normalize a path lexically (without touching the filesystem).
/// Resolves `.` and `..` components so that `/workspace/../etc/passwd`
/// correctly normalizes to `/etc/passwd` rather than passing through
/// as if it starts with `/workspace`.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Pop the last normal component (but never pop past root)
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {} // skip "."
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// Resolve a tool-supplied path to an absolute path strictly under `base`.
///
/// Absolute inputs are re-rooted: their root and prefix components are
/// stripped and the remainder is joined under `base`. Relative inputs are
/// joined directly. Either way the result is lexically normalized and must
/// remain under `base`, otherwise the call is a policy violation.
pub fn resolve_within_base(base: &Path, input: &str) -> Result<PathBuf, AgentError> {
    if input.is_empty() {
        return Err(AgentError::InvalidArgs("path must not be empty".into()));
    }
    let candidate = Path::new(input);
    let relative: PathBuf = if candidate.is_absolute() {
        candidate
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect()
    } else {
        candidate.to_path_buf()
    };

    let resolved = lexical_normalize(&base.join(relative));
    if !resolved.starts_with(base) {
        return Err(AgentError::PolicyViolation(format!(
            "path '{}' resolves outside the workspace",
            input
        )));
    }
    Ok(resolved)
}

/// Render a path relative to the workspace base for display, falling back
/// to the full path when it lies elsewhere.
pub fn display_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

const SIZE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

/// Human-readable file size with one decimal (1536 → "1.5 KB").
pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, SIZE_UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_parent_components() {
        assert_eq!(
            lexical_normalize(Path::new("/workspace/../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
        assert_eq!(
            lexical_normalize(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
    }

    #[test]
    fn normalize_never_pops_past_root() {
        assert_eq!(
            lexical_normalize(Path::new("/../../etc")),
            PathBuf::from("/etc")
        );
    }

    #[test]
    fn resolve_relative_stays_inside() {
        let base = Path::new("/work");
        assert_eq!(
            resolve_within_base(base, "src/main.rs").unwrap(),
            PathBuf::from("/work/src/main.rs")
        );
    }

    #[test]
    fn resolve_rejects_escape() {
        let base = Path::new("/work");
        assert!(matches!(
            resolve_within_base(base, "../outside.txt"),
            Err(AgentError::PolicyViolation(_))
        ));
        assert!(matches!(
            resolve_within_base(base, "a/../../b"),
            Err(AgentError::PolicyViolation(_))
        ));
    }

    #[test]
    fn resolve_reroots_absolute_input() {
        let base = Path::new("/work");
        assert_eq!(
            resolve_within_base(base, "/etc/passwd").unwrap(),
            PathBuf::from("/work/etc/passwd")
        );
    }

    #[test]
    fn resolve_rejects_empty() {
        assert!(matches!(
            resolve_within_base(Path::new("/work"), ""),
            Err(AgentError::InvalidArgs(_))
        ));
    }

    #[test]
    fn human_size_units() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn display_path_strips_base() {
        let base = Path::new("/work");
        assert_eq!(display_path(Path::new("/work/a.txt"), base), "a.txt");
        assert_eq!(display_path(Path::new("/tmp/x"), base), "/tmp/x");
    }
}
