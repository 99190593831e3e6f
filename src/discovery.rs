//! Content discovery
//!
//! Finds every page under the content root. Paths are relative to the root,
//! use `/` as separator, and come back sorted without duplicates. Hidden
//! files and directories are skipped.

use crate::{to_url_path, WebsnapError};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

pub fn discover_pages(root: &Path, extension: &str) -> Result<Vec<String>, WebsnapError> {
    if !root.is_dir() {
        return Err(WebsnapError::ContentRoot(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let extension = extension.trim_start_matches('.');
    let mut pages = BTreeSet::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    for entry in walker {
        let entry = entry
            .map_err(|e| WebsnapError::ContentRoot(format!("failed to walk {}: {e}", root.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            != Some(true)
        {
            continue;
        }

        let relative = entry.path().strip_prefix(root).map_err(|e| {
            WebsnapError::ContentRoot(format!("failed to strip prefix {}: {e}", root.display()))
        })?;
        pages.insert(to_url_path(relative));
    }

    if pages.is_empty() {
        return Err(WebsnapError::NoPagesFound {
            root: root.display().to_string(),
        });
    }

    debug!("Discovered {} pages under {}", pages.len(), root.display());
    Ok(pages.into_iter().collect())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}
