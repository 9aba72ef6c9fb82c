//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "voltree",
    version,
    about = "Versioned data volumes: snapshot, branch, sync and transfer"
)]
pub struct Cli {
    /// Config file path (defaults to the platform config directory).
    #[arg(long, global = true, env = "VOLTREE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory override (defaults to the configured or platform dir).
    #[arg(long, global = true, env = "VOLTREE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new volumeset (optionally namespaced as prefix/name)
    Init {
        /// Volumeset name, e.g. "myapp" or "team/myapp"
        name: String,
        /// Attributes as key=value,key=value
        #[arg(long)]
        attrs: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Create an empty volume in a volumeset
    Create {
        /// Volumeset (name, prefix/name, or id)
        volumeset: String,
        /// Optional volume name
        name: Option<String>,
        #[arg(long)]
        attrs: Option<String>,
    },

    /// Clone a snapshot or branch tip into a new volume
    Clone {
        /// Snapshot or branch (name, id, or volumeset:name)
        object: String,
        /// Optional volume name
        name: Option<String>,
    },

    /// Take a snapshot of a volume
    Snapshot {
        /// Volume (name, id, or volumeset:name)
        volume: String,
        /// Optional snapshot name
        name: Option<String>,
        /// Advance (or create) this branch instead of the auto branch
        #[arg(long, conflicts_with = "new_branch")]
        branch: Option<String>,
        /// Start a new branch named after the snapshot
        #[arg(long)]
        new_branch: bool,
        #[arg(long)]
        attrs: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Update metadata of a volumeset, volume or snapshot
    Update {
        object: String,
        #[arg(long)]
        name: Option<String>,
        /// Attributes to merge, as key=value,key=value
        #[arg(long)]
        attrs: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Remove an object (volumesets cascade)
    Remove { object: String },

    /// List objects (all volumesets, or everything a token matches)
    List {
        object: Option<String>,
        /// List every object of every kind
        #[arg(long, conflicts_with = "object")]
        all: bool,
    },

    /// Two-way metadata sync of a volumeset with the hub
    Sync {
        /// Volumeset (name, prefix/name, or id)
        #[arg(required_unless_present = "all")]
        volumeset: Option<String>,
        /// Sync every volumeset known locally or on the hub
        #[arg(long, conflicts_with = "volumeset")]
        all: bool,
    },

    /// One-way metadata fetch of a volumeset from the hub
    Fetch {
        /// Volumeset (name, prefix/name, or id)
        #[arg(required_unless_present = "all")]
        volumeset: Option<String>,
        /// Fetch every volumeset known locally or on the hub
        #[arg(long, conflicts_with = "volumeset")]
        all: bool,
    },

    /// Push snapshot content to the hub
    Push {
        /// Snapshot or volumeset
        object: String,
    },

    /// Pull snapshot content from the hub
    Pull {
        /// Snapshot or volumeset
        object: String,
    },

    /// First-time hub setup
    Setup {
        /// Hub endpoint (host[:port], https://..., or file:///path)
        #[arg(long)]
        url: String,
        /// Absolute path to the auth token file
        #[arg(long)]
        token: PathBuf,
    },

    /// Show or change configuration
    Config {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        token: Option<PathBuf>,
    },

    /// Print version information
    Version,

    /// Show node summary
    Info,

    /// Write a diagnostics bundle
    Diagnostics {
        /// Output directory
        #[arg(long, default_value = "voltree-diagnostics")]
        out: PathBuf,
    },
}
