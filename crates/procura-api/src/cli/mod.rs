//! CLI command definitions for the `procura` binary.
//!
//! Uses clap derive macros for argument parsing. Instance commands operate
//! directly on the local database; `serve` exposes the same operations over
//! HTTP.

pub mod instance;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use procura_types::workflow::WorkflowType;

/// Durable procurement workflows: vendor onboarding and purchase order approval.
#[derive(Parser)]
#[command(name = "procura", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding `procura.db` and `config.toml`.
    #[arg(long, global = true, env = "PROCURA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Decision flags shared by the approval commands.
#[derive(Args, Debug, Clone)]
pub struct DecisionArgs {
    /// Who made the decision.
    #[arg(long = "by")]
    pub decided_by: String,

    /// Record an approval (the default).
    #[arg(long, conflicts_with = "reject")]
    pub approve: bool,

    /// Record a rejection instead of an approval.
    #[arg(long)]
    pub reject: bool,

    /// Free-form comments stored with the decision.
    #[arg(long)]
    pub comments: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a workflow instance and run it until it halts.
    Start {
        /// Workflow type (vendor_onboarding | purchase_order).
        workflow_type: WorkflowType,

        /// Instance id (a UUIDv7 is generated when omitted).
        #[arg(long)]
        id: Option<String>,

        /// Payload as a JSON object.
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Read the payload from a JSON file.
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },

    /// Resume a halted instance with arbitrary JSON input.
    Resume {
        /// Instance id.
        id: String,

        /// Input merged into the payload before resuming.
        #[arg(long, default_value = "{}")]
        input: String,
    },

    /// Record the central procurement decision for a vendor.
    #[command(name = "approve-central")]
    ApproveCentral {
        /// Instance id.
        id: String,

        #[command(flatten)]
        decision: DecisionArgs,
    },

    /// Record one department's decision for a vendor.
    Decide {
        /// Instance id.
        id: String,

        /// Department branch key (e.g. finance, legal, business).
        branch: String,

        #[command(flatten)]
        decision: DecisionArgs,
    },

    /// Record the approval decision for a purchase order.
    #[command(name = "approve-po")]
    ApprovePo {
        /// Instance id.
        id: String,

        #[command(flatten)]
        decision: DecisionArgs,
    },

    /// Show the current state and business record of an instance.
    Status {
        /// Instance id.
        id: String,
    },

    /// Show the status-change audit trail of an instance.
    History {
        /// Instance id.
        id: String,
    },

    /// List every checkpoint of an instance.
    Checkpoints {
        /// Instance id.
        id: String,
    },

    /// Show one checkpoint snapshot.
    Checkpoint {
        /// Instance id.
        id: String,

        /// Sequence number.
        sequence: u64,
    },

    /// Re-drive the projection for the latest checkpoint.
    Reconcile {
        /// Instance id.
        id: String,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on (defaults to `[server] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (defaults to `[server] host`).
        #[arg(long)]
        host: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_start_with_alias() {
        let cli = Cli::try_parse_from([
            "procura",
            "start",
            "vendor",
            "--id",
            "v1",
            "--payload",
            r#"{"name":"Acme"}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Start {
                workflow_type, id, ..
            } => {
                assert_eq!(workflow_type, WorkflowType::VendorOnboarding);
                assert_eq!(id.as_deref(), Some("v1"));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn parses_decide_with_global_flags() {
        let cli = Cli::try_parse_from([
            "procura", "decide", "v1", "legal", "--by", "dan", "--reject", "--json", "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Decide {
                id,
                branch,
                decision,
            } => {
                assert_eq!(id, "v1");
                assert_eq!(branch, "legal");
                assert_eq!(decision.decided_by, "dan");
                assert!(decision.reject);
            }
            _ => panic!("expected decide"),
        }
    }

    #[test]
    fn rejects_unknown_workflow_type() {
        assert!(Cli::try_parse_from(["procura", "start", "invoice"]).is_err());
    }

    #[test]
    fn approve_and_reject_conflict() {
        assert!(
            Cli::try_parse_from([
                "procura", "decide", "v1", "legal", "--by", "dan", "--approve", "--reject",
            ])
            .is_err()
        );
        let cli =
            Cli::try_parse_from(["procura", "approve-central", "v1", "--by", "amy", "--approve"])
                .unwrap();
        match cli.command {
            Commands::ApproveCentral { decision, .. } => {
                assert!(decision.approve);
                assert!(!decision.reject);
            }
            _ => panic!("expected approve-central"),
        }
    }

    #[test]
    fn decision_requires_actor() {
        assert!(Cli::try_parse_from(["procura", "approve-po", "po-1"]).is_err());
    }
}
