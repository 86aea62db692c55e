use anyhow::{Context, Result};
use clap::Parser;
use classdex::cli::{Cli, Commands, OutputFormat};
use classdex::config::{classdex_home, load_baseline, store_baseline};
use classdex::container::{TypeContainer, open_container};
use classdex::diff::{SnapshotDiff, diff_snapshots};
use classdex::directory::display_package;
use classdex::scan::scan_report;
use classdex::snapshot::{ContainerSnapshot, hash_content, list_types, take_snapshot};
use serde::Serialize;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.clone() {
        Commands::Packages { path, format } => {
            let container = open_container(&path);
            let output = PackagesOutput {
                location: container.location(),
                packages: container.package_names()?,
            };
            print_output(&output, format, render_packages)?;
        }
        Commands::Find {
            path,
            qualified_name,
            format,
            output,
        } => {
            let container = open_container(&path);
            let found = container.find_type(&qualified_name)?;

            if let Some(target) = output {
                let root = found
                    .with_context(|| format!("type not found: {qualified_name}"))?;
                let bytes = root.read()?;
                write_bytes(&target, &bytes)?;
                return Ok(());
            }

            let report = match found {
                Some(root) => {
                    let bytes = root.read()?;
                    FindOutput {
                        qualified_name,
                        found: true,
                        package: Some(root.package().to_string()),
                        source: Some(root.to_string()),
                        size: Some(bytes.len()),
                        content_hash: Some(hash_content(&bytes)),
                    }
                }
                None => FindOutput {
                    qualified_name,
                    found: false,
                    package: None,
                    source: None,
                    size: None,
                    content_hash: None,
                },
            };
            print_output(&report, format, render_find)?;
        }
        Commands::Walk { path, format } => {
            let container = open_container(&path);
            let listing = list_types(container.as_ref())?;
            print_output(&listing, format, |listing| {
                let mut out = String::new();
                for (package, types) in &listing.packages {
                    out.push_str(&format!("{}\n", display_package(package)));
                    for name in types {
                        out.push_str(&format!("  {name}\n"));
                    }
                }
                out
            })?;
        }
        Commands::Snapshot {
            path,
            output,
            store,
        } => {
            let container = open_container(&path);
            let snapshot = take_snapshot(container.as_ref())?;

            if store {
                let home = resolve_home(&cli)?;
                let baseline = store_baseline(&home, &path, &snapshot)?;
                let output = StoreOutput {
                    root: path.display().to_string(),
                    baseline: baseline.display().to_string(),
                    packages: snapshot.package_count(),
                    types: snapshot.type_count(),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(());
            }

            let json = serde_json::to_string_pretty(&snapshot)?;
            match output {
                Some(target) => write_bytes(&target, json.as_bytes())?,
                None => println!("{json}"),
            }
        }
        Commands::Diff { old, new, format } => {
            let old_snapshot = snapshot_side(&old)?;
            let new_snapshot = snapshot_side(&new)?;
            let diff = diff_snapshots(&old_snapshot, &new_snapshot);
            let output = DiffOutput {
                old: old.display().to_string(),
                new: new.display().to_string(),
                breaking: diff.is_breaking(),
                diff,
            };
            print_output(&output, format, render_diff)?;
        }
        Commands::Check { path, format } => {
            let home = resolve_home(&cli)?;
            let baseline = load_baseline(&home, &path)?.with_context(|| {
                format!(
                    "no stored baseline for {} (run `classdex snapshot --store` first)",
                    path.display()
                )
            })?;

            let container = open_container(&path);
            let current = take_snapshot(container.as_ref())?;
            let diff = diff_snapshots(&baseline, &current);
            let breaking = diff.is_breaking();
            let output = DiffOutput {
                old: "baseline".to_string(),
                new: path.display().to_string(),
                breaking,
                diff,
            };
            print_output(&output, format, render_diff)?;
            if breaking {
                std::process::exit(1);
            }
        }
        Commands::Scan { root } => {
            let report = scan_report(&root)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats { path } => {
            let container = open_container(&path);
            let listing = list_types(container.as_ref())?;
            let output = StatsOutput {
                location: container.location(),
                kind: container_kind(&path),
                packages: listing.package_count(),
                types: listing.type_count(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn resolve_home(cli: &Cli) -> Result<PathBuf> {
    if let Some(home) = cli.home.clone() {
        return Ok(home);
    }
    classdex_home()
}

fn container_kind(path: &Path) -> &'static str {
    if classdex::container::is_archive_path(path) {
        "archive"
    } else {
        "directory"
    }
}

/// A diff side is either a previously written snapshot JSON file or a live
/// container to snapshot on the fly.
fn snapshot_side(path: &Path) -> Result<ContainerSnapshot> {
    if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        return serde_json::from_str(&json)
            .with_context(|| format!("Malformed snapshot: {}", path.display()));
    }
    let container = open_container(path);
    take_snapshot(container.as_ref())
}

fn print_output<T: Serialize>(
    value: &T,
    format: OutputFormat,
    render_text: impl Fn(&T) -> String,
) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Text => render_text(value),
    };
    print!("{content}");
    if !content.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write output: {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct PackagesOutput {
    location: String,
    packages: Vec<String>,
}

fn render_packages(output: &PackagesOutput) -> String {
    let mut out = String::new();
    for package in &output.packages {
        out.push_str(&format!("{}\n", display_package(package)));
    }
    out
}

#[derive(Debug, Serialize)]
struct FindOutput {
    qualified_name: String,
    found: bool,
    package: Option<String>,
    source: Option<String>,
    size: Option<usize>,
    content_hash: Option<String>,
}

fn render_find(output: &FindOutput) -> String {
    let mut out = String::new();
    out.push_str(&format!("qualified_name: {}\n", output.qualified_name));
    out.push_str(&format!("found: {}\n", output.found));
    if let Some(source) = &output.source {
        out.push_str(&format!("source: {source}\n"));
    }
    if let Some(size) = output.size {
        out.push_str(&format!("size: {size}\n"));
    }
    if let Some(hash) = &output.content_hash {
        out.push_str(&format!("content_hash: {hash}\n"));
    }
    out
}

#[derive(Debug, Serialize)]
struct StoreOutput {
    root: String,
    baseline: String,
    packages: usize,
    types: usize,
}

#[derive(Debug, Serialize)]
struct DiffOutput {
    old: String,
    new: String,
    breaking: bool,
    diff: SnapshotDiff,
}

fn render_diff(output: &DiffOutput) -> String {
    let mut out = String::new();
    for name in &output.diff.added {
        out.push_str(&format!("+ {name}\n"));
    }
    for name in &output.diff.removed {
        out.push_str(&format!("- {name}\n"));
    }
    for name in &output.diff.changed {
        out.push_str(&format!("~ {name}\n"));
    }
    if out.is_empty() {
        out.push_str("no differences\n");
    }
    out
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    location: String,
    kind: &'static str,
    packages: usize,
    types: usize,
}
