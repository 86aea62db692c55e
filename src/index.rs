use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mapping from package name to the single directory that directly holds that
/// package's class files, built by one recursive scan of the root.
///
/// A package maps to at most one directory: when unusual layouts (symlinks,
/// case folding) produce the same package name twice, the directory seen
/// first in scan order wins. Unreadable directories contribute nothing.
#[derive(Debug)]
pub struct PackageIndex {
    packages: BTreeMap<String, PathBuf>,
    names: Vec<String>,
}

impl PackageIndex {
    pub fn build(root: &Path, suffix: &str) -> Self {
        let mut packages = BTreeMap::new();
        scan_directory(&mut packages, String::new(), root, suffix);
        let names: Vec<String> = packages.keys().cloned().collect();
        debug!(root = %root.display(), packages = names.len(), "package index built");
        Self { packages, names }
    }

    /// Sorted, duplicate-free package names.
    pub fn package_names(&self) -> &[String] {
        &self.names
    }

    pub fn directory_of(&self, package: &str) -> Option<&Path> {
        self.packages.get(package).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

fn scan_directory(
    packages: &mut BTreeMap<String, PathBuf>,
    package: String,
    dir: &Path,
    suffix: &str,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), %err, "skipping unreadable directory");
            return;
        }
    };

    let mut subdirs = Vec::new();
    let mut has_class_files = false;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if !has_class_files && file_name_has_suffix(&path, suffix) {
            // First directory seen for a package name wins.
            packages
                .entry(package.clone())
                .or_insert_with(|| dir.to_path_buf());
            has_class_files = true;
        }
    }

    for child in subdirs {
        let Some(child_name) = child.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };
        let child_package = if package.is_empty() {
            child_name
        } else {
            format!("{package}.{child_name}")
        };
        scan_directory(packages, child_package, &child, suffix);
    }
}

pub(crate) fn file_name_has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(suffix))
        .unwrap_or(false)
}
