use anyhow::Result;
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::debug;

use crate::archive::ArchiveContainer;
use crate::container::TypeContainer;
use crate::snapshot::list_types;

/// Finds every `.jar`/`.zip` under `base`, in parallel, sorted by path for a
/// deterministic report order.
pub fn scan_archives(base: &Path) -> Result<Vec<PathBuf>> {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(base)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if path
                    .extension()
                    .is_some_and(|ext| ext == "jar" || ext == "zip")
                {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut archives: Vec<PathBuf> = rx.iter().collect();
    archives.sort();
    debug!(base = %base.display(), archives = archives.len(), "archive scan complete");
    Ok(archives)
}

#[derive(Debug, Serialize)]
pub struct ArchiveReport {
    pub path: String,
    pub packages: usize,
    pub types: usize,
}

#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub root: String,
    pub archives: usize,
    pub failed: usize,
    pub reports: Vec<ArchiveReport>,
}

/// Opens every discovered archive and tallies its packages and types.
/// Unreadable archives only bump the failure count.
pub fn scan_report(base: &Path) -> Result<ScanReport> {
    let archives = scan_archives(base)?;
    let outcomes: Vec<Option<ArchiveReport>> = archives
        .par_iter()
        .map(|path| {
            let container = ArchiveContainer::new(path.clone());
            match list_types(&container) {
                Ok(listing) => Some(ArchiveReport {
                    path: path.display().to_string(),
                    packages: listing.package_count(),
                    types: listing.type_count(),
                }),
                Err(err) => {
                    debug!(archive = %path.display(), %err, "skipping unreadable archive");
                    None
                }
            }
        })
        .collect();

    let total = outcomes.len();
    let reports: Vec<ArchiveReport> = outcomes.into_iter().flatten().collect();
    Ok(ScanReport {
        root: base.display().to_string(),
        archives: total,
        failed: total - reports.len(),
        reports,
    })
}
