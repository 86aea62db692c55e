//! Deterministic container snapshots.
//!
//! A snapshot records, per package, the sorted (qualified name, content hash)
//! fingerprints of every type reachable by a full traversal. Because the
//! traversal order is fixed (sorted packages, sorted names within a package)
//! and the map is ordered, identical trees serialize to identical JSON, which
//! is what makes two snapshots diffable.

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

use crate::container::{ContainerVisitor, TypeContainer, TypeRoot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFingerprint {
    pub qualified_name: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub packages: BTreeMap<String, Vec<TypeFingerprint>>,
}

impl ContainerSnapshot {
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn type_count(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }

    /// Flat qualified-name → content-hash view used by the differ.
    pub fn fingerprints(&self) -> BTreeMap<&str, &str> {
        self.packages
            .values()
            .flatten()
            .map(|f| (f.qualified_name.as_str(), f.content_hash.as_str()))
            .collect()
    }
}

/// Plain package → sorted type names listing, without content hashes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeListing {
    pub packages: BTreeMap<String, Vec<String>>,
}

impl TypeListing {
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn type_count(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }
}

struct CollectTypes {
    collected: Vec<(String, TypeRoot)>,
}

impl ContainerVisitor for CollectTypes {
    fn visit_type(&mut self, package: &str, root: &TypeRoot) {
        self.collected.push((package.to_string(), root.clone()));
    }
}

/// Fingerprints every type in the container.
///
/// Hashing fans out over rayon; output order is the traversal order. A type
/// whose bytes vanished between the visit and the read is logged and omitted
/// rather than failing the whole snapshot.
pub fn take_snapshot(container: &dyn TypeContainer) -> Result<ContainerSnapshot> {
    let mut visitor = CollectTypes {
        collected: Vec::new(),
    };
    container.accept(&mut visitor)?;

    let hashed: Vec<Option<(String, TypeFingerprint)>> = visitor
        .collected
        .par_iter()
        .map(|(package, root)| match root.read() {
            Ok(bytes) => Some((
                package.clone(),
                TypeFingerprint {
                    qualified_name: root.qualified_name().to_string(),
                    content_hash: hash_content(&bytes),
                },
            )),
            Err(err) => {
                warn!(%err, qualified_name = root.qualified_name(), "type vanished during snapshot");
                None
            }
        })
        .collect();

    let mut snapshot = ContainerSnapshot::default();
    for (package, fingerprint) in hashed.into_iter().flatten() {
        snapshot.packages.entry(package).or_default().push(fingerprint);
    }
    Ok(snapshot)
}

/// Lists every package and type without reading file contents.
pub fn list_types(container: &dyn TypeContainer) -> Result<TypeListing> {
    struct Listing(TypeListing);
    impl ContainerVisitor for Listing {
        fn visit_package(&mut self, package: &str) -> bool {
            self.0.packages.entry(package.to_string()).or_default();
            true
        }

        fn visit_type(&mut self, package: &str, root: &TypeRoot) {
            self.0
                .packages
                .entry(package.to_string())
                .or_default()
                .push(root.qualified_name().to_string());
        }
    }

    let mut visitor = Listing(TypeListing::default());
    container.accept(&mut visitor)?;
    Ok(visitor.0)
}

pub fn hash_content(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
