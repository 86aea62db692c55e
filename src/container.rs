use anyhow::{Context, Result};
use memmap2::Mmap;
use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::archive::ArchiveContainer;
use crate::directory::DirectoryContainer;

/// Where a resolved type's bytes live.
#[derive(Debug, Clone)]
pub enum TypeSource {
    /// A class file on disk.
    File(PathBuf),
    /// An entry inside a jar/zip archive.
    ArchiveEntry { archive: PathBuf, entry: String },
}

/// A resolvable handle to one class file.
///
/// Equality, ordering, and hashing are defined solely by the fully-qualified
/// type name. Handles are constructed per lookup or per visit and stay valid
/// after the container that produced them is closed; the backing file
/// vanishing in the meantime surfaces as an error from [`TypeRoot::read`].
#[derive(Debug, Clone)]
pub struct TypeRoot {
    qualified_name: String,
    source: TypeSource,
}

impl TypeRoot {
    pub fn new(qualified_name: String, source: TypeSource) -> Self {
        Self {
            qualified_name,
            source,
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Package portion of the qualified name; empty for the default package.
    pub fn package(&self) -> &str {
        self.qualified_name
            .rsplit_once('.')
            .map(|(pkg, _)| pkg)
            .unwrap_or("")
    }

    pub fn simple_name(&self) -> &str {
        self.qualified_name
            .rsplit_once('.')
            .map(|(_, simple)| simple)
            .unwrap_or(&self.qualified_name)
    }

    pub fn source(&self) -> &TypeSource {
        &self.source
    }

    /// Reads the class-file bytes. The backing file or archive having
    /// vanished since indexing is a recoverable error, not a panic.
    pub fn read(&self) -> Result<Vec<u8>> {
        match &self.source {
            TypeSource::File(path) => std::fs::read(path)
                .with_context(|| format!("class file not found: {}", path.display())),
            TypeSource::ArchiveEntry { archive, entry } => {
                let file = File::open(archive)
                    .with_context(|| format!("archive not found: {}", archive.display()))?;
                let mmap = unsafe { Mmap::map(&file) }
                    .with_context(|| format!("mmap failed: {}", archive.display()))?;
                let mut zip = ZipArchive::new(Cursor::new(&mmap[..]))
                    .with_context(|| format!("unreadable archive: {}", archive.display()))?;
                let mut member = zip.by_name(entry).with_context(|| {
                    format!("entry {entry} not found in {}", archive.display())
                })?;
                let mut bytes = Vec::with_capacity(member.size() as usize);
                member.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

impl fmt::Display for TypeRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            TypeSource::File(path) => write!(f, "{}", path.display()),
            TypeSource::ArchiveEntry { archive, entry } => {
                write!(f, "{}!{entry}", archive.display())
            }
        }
    }
}

impl PartialEq for TypeRoot {
    fn eq(&self, other: &Self) -> bool {
        self.qualified_name == other.qualified_name
    }
}

impl Eq for TypeRoot {}

impl PartialOrd for TypeRoot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeRoot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.qualified_name.cmp(&other.qualified_name)
    }
}

impl std::hash::Hash for TypeRoot {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.qualified_name.hash(state);
    }
}

/// Callbacks driven by [`TypeContainer::accept`].
///
/// Packages arrive in sorted name order, types within a package in sorted
/// qualified-name order. Returning `false` from `visit_package` suppresses
/// the type callbacks for that package; `end_package` fires regardless.
pub trait ContainerVisitor {
    fn visit_package(&mut self, _package: &str) -> bool {
        true
    }

    fn visit_type(&mut self, _package: &str, _root: &TypeRoot) {}

    fn end_type(&mut self, _package: &str, _root: &TypeRoot) {}

    fn end_package(&mut self, _package: &str) {}
}

/// A queryable collection of class files grouped into packages.
pub trait TypeContainer {
    /// Human-readable location of the container.
    fn location(&self) -> String;

    /// Sorted package names discovered by the index.
    fn package_names(&self) -> Result<Vec<String>>;

    /// Resolves a fully-qualified, dot-separated type name. Absence is an
    /// expected outcome and never an error.
    fn find_type(&self, qualified_name: &str) -> Result<Option<TypeRoot>>;

    /// Deterministic traversal over every package and type.
    fn accept(&self, visitor: &mut dyn ContainerVisitor) -> Result<()>;

    /// Discards cached state; the next query triggers a fresh scan.
    fn close(&self);
}

/// Splits a qualified name on its last dot into (package, simple name).
/// A name with no dot lives in the default package.
pub(crate) fn split_qualified_name(qualified_name: &str) -> (&str, &str) {
    qualified_name
        .rsplit_once('.')
        .unwrap_or(("", qualified_name))
}

/// Opens `path` as an archive container when it names a `.jar`/`.zip` file,
/// otherwise as a directory container.
pub fn open_container(path: &Path) -> Box<dyn TypeContainer> {
    if is_archive_path(path) {
        Box::new(ArchiveContainer::new(path.to_path_buf()))
    } else {
        Box::new(DirectoryContainer::new(path.to_path_buf()))
    }
}

pub fn is_archive_path(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext == "jar" || ext == "zip")
}
