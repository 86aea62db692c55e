use anyhow::{Context, Result};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use zip::ZipArchive;

use crate::CLASS_SUFFIX;
use crate::container::{ContainerVisitor, TypeContainer, TypeRoot, TypeSource, split_qualified_name};

/// Per-archive index: package name to the sorted simple names of the class
/// files directly inside it.
#[derive(Debug)]
struct ArchiveIndex {
    packages: BTreeMap<String, Vec<String>>,
    names: Vec<String>,
}

impl ArchiveIndex {
    fn build(path: &Path, suffix: &str) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("archive not found: {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mmap failed: {}", path.display()))?;
        let archive = ZipArchive::new(Cursor::new(&mmap[..]))
            .with_context(|| format!("unreadable archive: {}", path.display()))?;

        let mut packages: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in archive.file_names() {
            if !name.ends_with(suffix) {
                continue;
            }
            let normalized = name.replace('\\', "/");
            let (dir, file_name) = normalized.rsplit_once('/').unwrap_or(("", &normalized));
            let Some(simple) = file_name.strip_suffix(suffix) else {
                continue;
            };
            if simple.is_empty() {
                continue;
            }
            let package = dir.replace('/', ".");
            packages.entry(package).or_default().push(simple.to_string());
        }
        for members in packages.values_mut() {
            members.sort();
            members.dedup();
        }

        let names: Vec<String> = packages.keys().cloned().collect();
        debug!(archive = %path.display(), packages = names.len(), "archive index built");
        Ok(Self { packages, names })
    }

    fn entry_path(package: &str, simple: &str, suffix: &str) -> String {
        if package.is_empty() {
            format!("{simple}{suffix}")
        } else {
            format!("{}/{simple}{suffix}", package.replace('.', "/"))
        }
    }
}

/// A type container over the entry table of one jar/zip archive.
///
/// Shares the directory container's contract: sorted package enumeration,
/// last-dot lookup, deterministic traversal, `close` invalidation. Unlike the
/// directory scan, a malformed or unreadable archive is a container-level
/// error; the failed build is not cached, so a later access retries.
pub struct ArchiveContainer {
    path: PathBuf,
    suffix: String,
    index: Mutex<Option<Arc<ArchiveIndex>>>,
}

impl ArchiveContainer {
    pub fn new(path: PathBuf) -> Self {
        Self::with_suffix(path, CLASS_SUFFIX)
    }

    pub fn with_suffix(path: PathBuf, suffix: &str) -> Self {
        Self {
            path,
            suffix: suffix.to_string(),
            index: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn index(&self) -> Result<Arc<ArchiveIndex>> {
        let mut slot = self.index.lock();
        match slot.as_ref() {
            Some(index) => Ok(Arc::clone(index)),
            None => {
                let built = Arc::new(ArchiveIndex::build(&self.path, &self.suffix)?);
                *slot = Some(Arc::clone(&built));
                Ok(built)
            }
        }
    }

    fn type_root(&self, package: &str, simple: &str) -> TypeRoot {
        let qualified = if package.is_empty() {
            simple.to_string()
        } else {
            format!("{package}.{simple}")
        };
        TypeRoot::new(
            qualified,
            TypeSource::ArchiveEntry {
                archive: self.path.clone(),
                entry: ArchiveIndex::entry_path(package, simple, &self.suffix),
            },
        )
    }
}

impl TypeContainer for ArchiveContainer {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn package_names(&self) -> Result<Vec<String>> {
        Ok(self.index()?.names.clone())
    }

    fn find_type(&self, qualified_name: &str) -> Result<Option<TypeRoot>> {
        let index = self.index()?;
        let (package, simple) = split_qualified_name(qualified_name);
        let Some(members) = index.packages.get(package) else {
            return Ok(None);
        };
        if members.binary_search_by(|m| m.as_str().cmp(simple)).is_err() {
            return Ok(None);
        }
        Ok(Some(self.type_root(package, simple)))
    }

    fn accept(&self, visitor: &mut dyn ContainerVisitor) -> Result<()> {
        let index = self.index()?;
        for package in &index.names {
            if visitor.visit_package(package)
                && let Some(members) = index.packages.get(package)
            {
                for simple in members {
                    let root = self.type_root(package, simple);
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
        debug!(archive = %self.path.display(), "container closed, index discarded");
    }
}

impl std::fmt::Debug for ArchiveContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveContainer")
            .field("path", &self.path)
            .field("suffix", &self.suffix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};
    use zip::write::FileOptions;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_archive(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "classdex-archive-{}-{}-{}-{}.jar",
            std::process::id(),
            nanos,
            n,
            name
        ))
    }

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (name, content) in entries {
            zip.start_file(*name, options)?;
            zip.write_all(content)?;
        }
        zip.finish()?;
        Ok(())
    }

    #[test]
    fn packages_and_lookup_follow_the_entry_table() -> Result<()> {
        let jar = temp_archive("lookup");
        write_jar(
            &jar,
            &[
                ("org/example/pkg/B.class", b"bb".as_slice()),
                ("org/example/pkg/A.class", b"aa".as_slice()),
                ("org/example/A.class", b"top".as_slice()),
                ("META-INF/MANIFEST.MF", b"".as_slice()),
            ],
        )?;

        let container = ArchiveContainer::new(jar.clone());
        assert_eq!(
            container.package_names()?,
            ["org.example", "org.example.pkg"]
        );

        let found = container.find_type("org.example.pkg.A")?.unwrap();
        assert_eq!(found.read()?, b"aa");
        assert_eq!(found.to_string(), format!("{}!org/example/pkg/A.class", jar.display()));
        assert!(container.find_type("org.example.pkg.Missing")?.is_none());
        assert!(container.find_type("else.Where")?.is_none());

        let _ = std::fs::remove_file(jar);
        Ok(())
    }

    #[test]
    fn root_entries_form_the_default_package() -> Result<()> {
        let jar = temp_archive("default");
        write_jar(&jar, &[("Top.class", b"t".as_slice())])?;

        let container = ArchiveContainer::new(jar.clone());
        assert_eq!(container.package_names()?, [""]);
        let found = container.find_type("Top")?.unwrap();
        assert_eq!(found.read()?, b"t");

        let _ = std::fs::remove_file(jar);
        Ok(())
    }

    #[test]
    fn traversal_orders_packages_and_types() -> Result<()> {
        let jar = temp_archive("traverse");
        write_jar(
            &jar,
            &[
                ("b/Z.class", b"".as_slice()),
                ("a/Y.class", b"".as_slice()),
                ("a/X.class", b"".as_slice()),
            ],
        )?;

        #[derive(Default)]
        struct Collect(Vec<String>);
        impl ContainerVisitor for Collect {
            fn visit_type(&mut self, _package: &str, root: &TypeRoot) {
                self.0.push(root.qualified_name().to_string());
            }
        }

        let container = ArchiveContainer::new(jar.clone());
        let mut collect = Collect::default();
        container.accept(&mut collect)?;
        assert_eq!(collect.0, ["a.X", "a.Y", "b.Z"]);

        let _ = std::fs::remove_file(jar);
        Ok(())
    }

    #[test]
    fn malformed_archive_errors_without_caching_the_failure() -> Result<()> {
        let jar = temp_archive("malformed");
        std::fs::write(&jar, b"not a zip")?;

        let container = ArchiveContainer::new(jar.clone());
        assert!(container.package_names().is_err());

        // Replace with a valid archive: the next access retries the build.
        write_jar(&jar, &[("p/Fixed.class", b"".as_slice())])?;
        assert_eq!(container.package_names()?, ["p"]);

        let _ = std::fs::remove_file(jar);
        Ok(())
    }

    #[test]
    fn close_discards_the_memoized_entry_table() -> Result<()> {
        let jar = temp_archive("close");
        write_jar(&jar, &[("p/A.class", b"".as_slice())])?;

        let container = ArchiveContainer::new(jar.clone());
        assert_eq!(container.package_names()?, ["p"]);

        write_jar(&jar, &[("p/A.class", b"".as_slice()), ("q/B.class", b"".as_slice())])?;
        assert_eq!(container.package_names()?, ["p"]);

        container.close();
        assert_eq!(container.package_names()?, ["p", "q"]);

        let _ = std::fs::remove_file(jar);
        Ok(())
    }
}
