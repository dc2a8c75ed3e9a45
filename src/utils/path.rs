use std::borrow::Cow;
use std::path::{Path, PathBuf};

pub fn basename(path: &str) -> Cow<'_, str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(p) if !p.is_empty() => p.into(),
        _ => path.into(),
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

pub fn file_exists(path: &Path) -> bool {
    path.exists()
}

/// Searches a colon separated list of directories left to right and returns
/// the first `dir/name` that exists. An empty entry stands for the current
/// directory.
pub fn resolve_in_path(name: &str, path_list: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    path_list
        .split(':')
        .map(|dir| if dir.is_empty() { "." } else { dir })
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| file_exists(candidate))
}
