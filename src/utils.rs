use std::path::{Component, Path};

/// Join the normal components of a relative path with `/`, whatever the
/// platform separator. `.` and root components are dropped.
pub fn to_url_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
