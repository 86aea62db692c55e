use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::snapshot::{ContainerSnapshot, hash_content};

pub fn classdex_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("classdex"))
}

/// Stable baseline file for one container root: the file stem keeps the path
/// readable, the short hash of the canonicalized path keeps it unique.
pub fn baseline_path(home: &Path, root: &Path) -> PathBuf {
    let canonical = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf())
        .to_string_lossy()
        .into_owned();
    let key = &hash_content(canonical.as_bytes())[..12];

    let stem = root
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "root".to_string());

    home.join("baselines").join(format!("{stem}-{key}.json"))
}

/// Writes the baseline atomically: serialize to a `.tmp` sibling, then rename
/// over the target so readers never observe a partial file.
pub fn store_baseline(home: &Path, root: &Path, snapshot: &ContainerSnapshot) -> Result<PathBuf> {
    let target = baseline_path(home, root);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create baseline directory: {}", parent.display())
        })?;
    }

    let mut tmp_os = target.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);

    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write baseline: {}", tmp.display()))?;
    std::fs::rename(&tmp, &target).with_context(|| {
        format!("Failed to atomically replace baseline: {}", target.display())
    })?;
    Ok(target)
}

pub fn load_baseline(home: &Path, root: &Path) -> Result<Option<ContainerSnapshot>> {
    let path = baseline_path(home, root);
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read baseline: {}", path.display()))?;
    let snapshot = serde_json::from_str(&json)
        .with_context(|| format!("Malformed baseline: {}", path.display()))?;
    Ok(Some(snapshot))
}
