use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "classdex")]
#[command(about = "Index class-file trees and archives, resolve types, and diff deterministic snapshots")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the classdex home directory used for stored baselines.
    #[arg(long, value_name = "DIR")]
    pub home: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// List the sorted package names of a directory or archive.
    Packages {
        path: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Resolve one fully-qualified type name.
    Find {
        path: PathBuf,

        qualified_name: String,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Extract the raw class-file bytes to FILE instead of reporting.
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// List every package and type in deterministic order.
    Walk {
        path: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Fingerprint every type for later diffing.
    Snapshot {
        path: PathBuf,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Store the snapshot as the baseline for this path.
        #[arg(long)]
        store: bool,
    },
    /// Compare two sides; each may be a directory, an archive, or a snapshot
    /// JSON file.
    Diff {
        old: PathBuf,

        new: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Diff a path against its stored baseline; exits non-zero on breaking
    /// differences.
    Check {
        path: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Discover archives under a root and report their contents.
    Scan {
        root: PathBuf,
    },
    /// Container statistics.
    Stats {
        path: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
