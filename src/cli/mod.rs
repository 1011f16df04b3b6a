//! CLI module for kubeplan
//!
//! Subcommands:
//! - `kubeplan plan` - Compute a tenant spec from a request file
//! - `kubeplan render` - Render manifests, optionally as a bundle directory
//! - `kubeplan cost` - Estimate cloud cost of the hardware plan
//! - `kubeplan advise` - Rank node groups for each component
//! - `kubeplan apply` - Provision a tenant on the cluster
//! - `kubeplan status` / `delete` - Inspect or remove a tenant
//! - `kubeplan monitor` - Run the health monitor and its HTTP summary
//! - `kubeplan image` / `history` - Query and update the image ledger

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "kubeplan")]
#[command(about = "Capacity planning and Kubernetes provisioning for multi-tenant AI workloads")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.kubeplan/config.yaml)
    #[arg(long, global = true, env = "KUBEPLAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file loaded before anything else
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the tenant spec for a request
    Plan(PlanArgs),

    /// Render the tenant's manifests
    Render(RenderArgs),

    /// Estimate cloud cost for the hardware plan
    Cost(RequestArgs),

    /// Advise node group placement for each component
    Advise(AdviseArgs),

    /// Provision a tenant on the cluster
    Apply(ApplyArgs),

    /// Show a tenant's cluster and ledger state
    Status(TenantArgs),

    /// Delete a tenant namespace
    Delete(TenantArgs),

    /// Run the deployment health monitor
    Monitor(MonitorArgs),

    /// Manage recorded images
    Image(ImageArgs),

    /// Show a tenant's deployment history
    History(HistoryArgs),
}

/// Output encoding for structured results
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// A tenant request file
#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// Path to the tenant request (JSON or YAML)
    pub file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Path to the tenant request (JSON or YAML)
    pub file: PathBuf,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Path to the tenant request (JSON or YAML)
    pub file: PathBuf,

    /// Write a bundle (manifests, scripts, spec, checksums) into this directory
    #[arg(long, value_name = "DIR")]
    pub bundle: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct AdviseArgs {
    /// Path to the tenant request (JSON or YAML)
    pub file: PathBuf,

    /// Node group inventory (YAML)
    #[arg(long, value_name = "FILE")]
    pub inventory: PathBuf,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ApplyArgs {
    /// Path to the tenant request (JSON or YAML)
    pub file: PathBuf,

    /// Apply against an in-memory cluster and ledger instead of the real ones
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct TenantArgs {
    /// Tenant id
    pub tenant: String,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct MonitorArgs {
    /// Bind address for the health summary endpoint
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Port for the health summary endpoint
    #[arg(short, long, default_value = "9090")]
    pub port: u16,

    /// Roll back critical deployments (overrides the config file)
    #[arg(long)]
    pub auto_rollback: bool,

    /// Run a single cycle, print the summary and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Parser, Debug)]
pub struct ImageArgs {
    #[command(subcommand)]
    pub action: ImageAction,
}

#[derive(Subcommand, Debug)]
pub enum ImageAction {
    /// Record a newly built image
    Record {
        /// Service the image belongs to (stt, tts, nlp, ...)
        service: String,

        /// Full image reference; the tag is used as the version
        image: String,

        /// Initial status: building or ready
        #[arg(long, default_value = "READY")]
        status: String,

        /// Source commit
        #[arg(long)]
        commit: Option<String>,
    },

    /// Move an image to another status
    Promote {
        service: String,
        version: String,

        /// Target status (READY, DEPLOYED, FAILED, DEPRECATED)
        status: String,

        /// Start a new deployment cycle (allows FAILED/DEPRECATED -> DEPLOYED)
        #[arg(long)]
        new_cycle: bool,
    },

    /// List the newest versions of a service
    List {
        service: String,

        /// Number of versions to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Tenant id
    pub tenant: String,

    /// Restrict to one service
    #[arg(short, long)]
    pub service: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan() {
        let cli = Cli::parse_from(["kubeplan", "plan", "acme.yaml", "-o", "json"]);
        match cli.command {
            Commands::Plan(args) => {
                assert_eq!(args.file, PathBuf::from("acme.yaml"));
                assert_eq!(args.output, OutputFormat::Json);
            }
            _ => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_parse_render_bundle() {
        let cli = Cli::parse_from(["kubeplan", "render", "acme.yaml", "--bundle", "out"]);
        match cli.command {
            Commands::Render(args) => assert_eq!(args.bundle, Some(PathBuf::from("out"))),
            _ => panic!("Expected Render command"),
        }
    }

    #[test]
    fn test_parse_verbose_global() {
        let cli = Cli::parse_from(["kubeplan", "status", "acme", "-vv"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_monitor_defaults() {
        let cli = Cli::parse_from(["kubeplan", "monitor"]);
        match cli.command {
            Commands::Monitor(args) => {
                assert_eq!(args.port, 9090);
                assert!(!args.auto_rollback);
                assert!(!args.once);
            }
            _ => panic!("Expected Monitor command"),
        }
    }

    #[test]
    fn test_parse_image_promote() {
        let cli = Cli::parse_from([
            "kubeplan",
            "image",
            "promote",
            "nlp",
            "1.4.0",
            "DEPLOYED",
            "--new-cycle",
        ]);
        match cli.command {
            Commands::Image(ImageArgs {
                action:
                    ImageAction::Promote {
                        service,
                        version,
                        status,
                        new_cycle,
                    },
            }) => {
                assert_eq!(service, "nlp");
                assert_eq!(version, "1.4.0");
                assert_eq!(status, "DEPLOYED");
                assert!(new_cycle);
            }
            _ => panic!("Expected image promote"),
        }
    }

    #[test]
    fn test_advise_requires_inventory() {
        assert!(Cli::try_parse_from(["kubeplan", "advise", "acme.yaml"]).is_err());
    }
}
