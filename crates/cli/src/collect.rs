//! Turns command-line paths into uploads: files are taken as given,
//! directories are walked recursively.

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use providers::FileUpload;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn collect_paths(
    roots: &[PathBuf],
    excludes: &[String],
    include_hidden: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    let exclude_set = build_globset(excludes)?;
    let mut files = Vec::new();
    for root in roots {
        let meta = std::fs::metadata(root).with_context(|| format!("cannot read {:?}", root))?;
        if meta.is_file() {
            if !is_excluded(root, &exclude_set) {
                files.push(root.clone());
            }
            continue;
        }

        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), include_hidden, &exclude_set))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

pub async fn read_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<FileUpload>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        uploads.push(FileUpload::new(display_name(path), content));
    }
    Ok(uploads)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("bad exclude pattern {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, include_hidden: bool, excludes: &GlobSet) -> bool {
    if is_excluded(path, excludes) {
        return false;
    }
    if !include_hidden && is_hidden(path) {
        return false;
    }
    true
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_names() {
        assert!(is_hidden(Path::new("/a/.git")));
        assert!(!is_hidden(Path::new("/a/git")));
        assert!(!is_hidden(Path::new(".")));
    }

    #[test]
    fn display_name_is_last_component() {
        assert_eq!(display_name(Path::new("/tmp/x/doc.pdf")), "doc.pdf");
    }

    #[test]
    fn invalid_glob_is_reported() {
        assert!(build_globset(&["a[".to_string()]).is_err());
    }
}
