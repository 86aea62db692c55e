use anyhow::Result;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::container::{ContainerVisitor, TypeContainer, TypeRoot, TypeSource, split_qualified_name};
use crate::index::{PackageIndex, file_name_has_suffix};
use crate::{CLASS_SUFFIX, DEFAULT_PACKAGE};

/// A type container rooted at a directory in the local file system.
///
/// The package index is built on first access and memoized until [`close`]
/// drops it. The build runs under the cell's lock, so concurrent first access
/// performs exactly one scan: the first caller builds, the rest block and then
/// share the immutable result. The filesystem changing underneath a built
/// index is the caller's problem until the next `close`.
///
/// [`close`]: TypeContainer::close
pub struct DirectoryContainer {
    root: PathBuf,
    suffix: String,
    index: Mutex<Option<Arc<PackageIndex>>>,
    scans: AtomicUsize,
}

impl DirectoryContainer {
    pub fn new(root: PathBuf) -> Self {
        Self::with_suffix(root, CLASS_SUFFIX)
    }

    pub fn with_suffix(root: PathBuf, suffix: &str) -> Self {
        Self {
            root,
            suffix: suffix.to_string(),
            index: Mutex::new(None),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of full directory scans performed so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    fn index(&self) -> Arc<PackageIndex> {
        let mut slot = self.index.lock();
        match slot.as_ref() {
            Some(index) => Arc::clone(index),
            None => {
                self.scans.fetch_add(1, Ordering::Relaxed);
                let built = Arc::new(PackageIndex::build(&self.root, &self.suffix));
                *slot = Some(Arc::clone(&built));
                built
            }
        }
    }

    /// Class files directly inside one package's directory, as handles sorted
    /// by qualified name. A vanished or unreadable directory yields nothing.
    fn package_types(&self, package: &str, dir: &Path) -> Vec<TypeRoot> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), %err, "package directory became unreadable");
                return Vec::new();
            }
        };

        let mut roots = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !file_name_has_suffix(&path, &self.suffix) {
                continue;
            }
            let Some(simple) = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .and_then(|n| n.strip_suffix(&self.suffix).map(str::to_string))
            else {
                continue;
            };
            let qualified = if package.is_empty() {
                simple
            } else {
                format!("{package}.{simple}")
            };
            roots.push(TypeRoot::new(qualified, TypeSource::File(path)));
        }
        roots.sort();
        roots
    }
}

impl TypeContainer for DirectoryContainer {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn package_names(&self) -> Result<Vec<String>> {
        Ok(self.index().package_names().to_vec())
    }

    fn find_type(&self, qualified_name: &str) -> Result<Option<TypeRoot>> {
        let index = self.index();
        let (package, simple) = split_qualified_name(qualified_name);
        let Some(dir) = index.directory_of(package) else {
            return Ok(None);
        };
        let path = dir.join(format!("{simple}{}", self.suffix));
        if path.exists() {
            Ok(Some(TypeRoot::new(
                qualified_name.to_string(),
                TypeSource::File(path),
            )))
        } else {
            Ok(None)
        }
    }

    fn accept(&self, visitor: &mut dyn ContainerVisitor) -> Result<()> {
        let index = self.index();
        for package in index.package_names() {
            if visitor.visit_package(package)
                && let Some(dir) = index.directory_of(package)
            {
                for root in self.package_types(package, dir) {
                    visitor.visit_type(package, &root);
                    visitor.end_type(package, &root);
                }
            }
            visitor.end_package(package);
        }
        Ok(())
    }

    fn close(&self) {
        self.index.lock().take();
        debug!(root = %self.root.display(), "container closed, index discarded");
    }
}

impl std::fmt::Debug for DirectoryContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryContainer")
            .field("root", &self.root)
            .field("suffix", &self.suffix)
            .field("scans", &self.scan_count())
            .finish()
    }
}

/// Human-readable package label; the default package has an empty name.
pub fn display_package(package: &str) -> &str {
    if package == DEFAULT_PACKAGE {
        "<default>"
    } else {
        package
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::AtomicU64;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_root(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "classdex-dir-{}-{}-{}-{}",
            std::process::id(),
            nanos,
            n,
            name
        ))
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn fixture_tree(name: &str) -> PathBuf {
        let root = temp_root(name);
        touch(&root.join("a/b/X.class"));
        touch(&root.join("a/Y.class"));
        touch(&root.join("c/Z.class"));
        root
    }

    #[derive(Default)]
    struct RecordingVisitor {
        skip: Vec<String>,
        events: Vec<String>,
    }

    impl ContainerVisitor for RecordingVisitor {
        fn visit_package(&mut self, package: &str) -> bool {
            self.events.push(format!("pkg:{package}"));
            !self.skip.iter().any(|s| s == package)
        }

        fn visit_type(&mut self, _package: &str, root: &TypeRoot) {
            self.events.push(format!("type:{}", root.qualified_name()));
        }

        fn end_type(&mut self, _package: &str, root: &TypeRoot) {
            self.events.push(format!("end-type:{}", root.qualified_name()));
        }

        fn end_package(&mut self, package: &str) {
            self.events.push(format!("end-pkg:{package}"));
        }
    }

    #[test]
    fn package_names_are_sorted_and_duplicate_free() {
        let root = fixture_tree("packages");
        let container = DirectoryContainer::new(root.clone());

        assert_eq!(container.package_names().unwrap(), ["a", "a.b", "c"]);
        // Memoized: a second query does not rescan.
        assert_eq!(container.package_names().unwrap(), ["a", "a.b", "c"]);
        assert_eq!(container.scan_count(), 1);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn find_type_resolves_existing_and_reports_absence() {
        let root = fixture_tree("find");
        let container = DirectoryContainer::new(root.clone());

        let found = container.find_type("a.Y").unwrap().unwrap();
        assert_eq!(found.qualified_name(), "a.Y");
        match found.source() {
            TypeSource::File(path) => assert_eq!(path, &root.join("a/Y.class")),
            other => panic!("unexpected source: {other:?}"),
        }

        assert!(container.find_type("a.Missing").unwrap().is_none());
        assert!(container.find_type("no.such.pkg.T").unwrap().is_none());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn find_type_without_dot_uses_default_package() {
        let root = temp_root("default");
        touch(&root.join("Top.class"));
        let container = DirectoryContainer::new(root.clone());

        let found = container.find_type("Top").unwrap().unwrap();
        assert_eq!(found.qualified_name(), "Top");
        assert_eq!(found.package(), "");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn traversal_is_deterministic_and_fully_ordered() {
        let root = fixture_tree("order");
        touch(&root.join("a/A.class"));
        let container = DirectoryContainer::new(root.clone());

        let mut visitor = RecordingVisitor::default();
        container.accept(&mut visitor).unwrap();
        assert_eq!(
            visitor.events,
            [
                "pkg:a",
                "type:a.A",
                "end-type:a.A",
                "type:a.Y",
                "end-type:a.Y",
                "end-pkg:a",
                "pkg:a.b",
                "type:a.b.X",
                "end-type:a.b.X",
                "end-pkg:a.b",
                "pkg:c",
                "type:c.Z",
                "end-type:c.Z",
                "end-pkg:c",
            ]
        );

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn skipped_package_still_gets_exactly_one_end_notification() {
        let root = fixture_tree("skip");
        let container = DirectoryContainer::new(root.clone());

        let mut visitor = RecordingVisitor {
            skip: vec!["a.b".to_string()],
            ..Default::default()
        };
        container.accept(&mut visitor).unwrap();

        assert!(!visitor.events.iter().any(|e| e == "type:a.b.X"));
        let ends = visitor.events.iter().filter(|e| *e == "end-pkg:a.b").count();
        assert_eq!(ends, 1);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn every_visited_type_is_findable_under_the_same_snapshot() {
        let root = fixture_tree("roundtrip");
        let container = DirectoryContainer::new(root.clone());

        #[derive(Default)]
        struct Collect(Vec<String>);
        impl ContainerVisitor for Collect {
            fn visit_type(&mut self, _package: &str, root: &TypeRoot) {
                self.0.push(root.qualified_name().to_string());
            }
        }

        let mut collect = Collect::default();
        container.accept(&mut collect).unwrap();
        assert!(!collect.0.is_empty());
        for name in collect.0 {
            let found = container.find_type(&name).unwrap().unwrap();
            assert_eq!(found.qualified_name(), name);
        }

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn close_forces_a_fresh_scan_that_sees_new_packages() {
        let root = fixture_tree("close");
        let container = DirectoryContainer::new(root.clone());

        assert_eq!(container.package_names().unwrap(), ["a", "a.b", "c"]);
        touch(&root.join("d/New.class"));
        // Staleness before close is by contract.
        assert_eq!(container.package_names().unwrap(), ["a", "a.b", "c"]);

        container.close();
        assert_eq!(container.package_names().unwrap(), ["a", "a.b", "c", "d"]);
        assert_eq!(container.scan_count(), 2);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn concurrent_first_access_triggers_exactly_one_scan() {
        let root = fixture_tree("concurrent");
        let container = Arc::new(DirectoryContainer::new(root.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let container = Arc::clone(&container);
            handles.push(std::thread::spawn(move || {
                container.package_names().unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), ["a", "a.b", "c"]);
        }
        assert_eq!(container.scan_count(), 1);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn vanished_file_surfaces_as_recoverable_read_error() {
        let root = fixture_tree("vanish");
        let container = DirectoryContainer::new(root.clone());

        let handle = container.find_type("c.Z").unwrap().unwrap();
        fs::remove_file(root.join("c/Z.class")).unwrap();
        assert!(handle.read().is_err());
        // The cache is not poisoned: other lookups still work.
        assert!(container.find_type("a.Y").unwrap().is_some());

        let _ = fs::remove_dir_all(root);
    }
}
