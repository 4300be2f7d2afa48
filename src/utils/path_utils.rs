use crate::error::AppError;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Expands `~` and `$VARS` in a path string.
pub fn expand_path(path_str: &str) -> Result<PathBuf, AppError> {
    shellexpand::full(path_str)
        .map(|cow_str| PathBuf::from(cow_str.as_ref()))
        .map_err(|e| AppError::InvalidInputArgument(format!("Failed to expand path '{}': {}", path_str, e)))
}

fn normalize_path(path_str: &str, base: &Path) -> Result<PathBuf, AppError> {
    let expanded_path = expand_path(path_str)?;
    let absolute_path = if expanded_path.is_absolute() {
        expanded_path
    } else {
        base.join(expanded_path)
    };

    let mut components = Vec::new();
    for component in absolute_path.components() {
        match component {
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }
    let normalized: PathBuf = components.iter().collect();

    match dunce::canonicalize(&normalized) {
        Ok(canonical_path) => Ok(canonical_path),
        Err(_) => Ok(normalized),
    }
}

/// Turn a user-supplied working directory into an absolute, existing,
/// listable directory.
pub fn resolve_working_directory(raw: &str, base: &Path) -> Result<PathBuf, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInputArgument("Working directory is empty".to_string()));
    }
    let resolved = normalize_path(trimmed, base)?;
    debug!(raw = %trimmed, resolved = %resolved.display(), "Resolved working directory");
    if !resolved.is_dir() {
        return Err(AppError::InvalidInputArgument(format!(
            "Working directory does not exist: {}",
            resolved.display()
        )));
    }
    // Listing needs both read and search permission.
    std::fs::read_dir(&resolved)?;
    Ok(resolved)
}

/// Lenient variant used at spawn time: an unusable directory is logged and
/// the shell starts in its default location instead.
pub fn working_directory_or_default(raw: Option<&str>) -> Option<PathBuf> {
    let raw = raw?;
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    match resolve_working_directory(raw, &base) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(working_directory = %raw, error = %e, "Working directory not accessible");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn relative_paths_resolve_against_base() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("project")).unwrap();
        let resolved = resolve_working_directory("project/../project/./", dir.path()).unwrap();
        assert_eq!(resolved, dunce::canonicalize(dir.path().join("project")).unwrap());
    }

    #[test]
    fn files_and_missing_paths_are_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(resolve_working_directory(file.to_str().unwrap(), dir.path()).is_err());
        assert!(resolve_working_directory("missing", dir.path()).is_err());
        assert!(resolve_working_directory("  ", dir.path()).is_err());
    }

    #[test]
    fn lenient_variant_falls_back_to_none() {
        assert_eq!(working_directory_or_default(None), None);
        assert_eq!(working_directory_or_default(Some("/definitely/not/here/42")), None);
        let dir = tempdir().unwrap();
        assert!(working_directory_or_default(dir.path().to_str()).is_some());
    }
}
