//! CLI command definitions and subcommands

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{Folio, Role, Stage};

/// StageTrack - production stage time capture
#[derive(Parser)]
#[command(
    name = "st",
    about = "Track work orders through production stages, offline first",
    version,
    after_help = "Logs are written to: <store dir>/logs/stagetrack.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log filter (e.g. debug, stagetrack=trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Acting operator id (defaults to device.operator from config)
    #[arg(short, long, global = true)]
    pub operator: Option<String>,

    /// Acting role: operator, supervisor or administrator
    #[arg(short, long, global = true)]
    pub role: Option<Role>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Work order and stage addressed by a transition
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct Target {
    /// Work-order number
    pub folio: i64,

    /// Stage (madera, produccion, pintura, armado, tapiceria, empaque)
    pub stage: Stage,
}

impl Target {
    pub fn folio(&self) -> Folio {
        Folio(self.folio)
    }
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start (or continue) timing a stage
    Start {
        #[command(flatten)]
        target: Target,
    },

    /// Stop the timer and open a detention
    Pause {
        #[command(flatten)]
        target: Target,

        /// Why work stopped
        #[arg(short = 'm', long)]
        reason: String,
    },

    /// Restart the timer after the detention was closed
    Resume {
        #[command(flatten)]
        target: Target,
    },

    /// Finish the stage for good
    Finish {
        #[command(flatten)]
        target: Target,
    },

    /// Close the active detention (supervisor or administrator)
    CloseDetention {
        #[command(flatten)]
        target: Target,
    },

    /// List stages a work order may start now
    Available {
        /// Work-order number
        folio: i64,
    },

    /// Show captures and detentions of a work order
    Status {
        /// Work-order number
        folio: i64,
    },

    /// Elapsed-time report for one work order or a date range
    Report {
        /// Report on a single work order
        #[arg(short, long, conflicts_with_all = ["from", "to"])]
        folio: Option<i64>,

        /// First day of the range (YYYY-MM-DD, default today)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day of the range, inclusive (default: same as --from)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Read from the remote authority instead of the local store
        #[arg(long)]
        remote: bool,
    },

    /// Push pending changes and pull remote state once
    Sync,

    /// Show changes waiting to be pushed
    Pending,

    /// Show local changes that lost to the remote authority
    Conflicts,

    /// Keep syncing in the foreground and print events
    Watch {
        /// Work orders to keep fresh even without local activity
        #[arg(short, long)]
        folio: Vec<i64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_start() {
        let cli = Cli::parse_from(["st", "start", "1254", "madera"]);
        match cli.command {
            Command::Start { target } => {
                assert_eq!(target.folio(), Folio(1254));
                assert_eq!(target.stage, Stage::Madera);
            }
            other => panic!("Expected Start command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_pause_with_reason() {
        let cli = Cli::parse_from(["st", "-o", "ana", "pause", "1254", "Producción", "-m", "missing material"]);
        assert_eq!(cli.operator.as_deref(), Some("ana"));
        if let Command::Pause { target, reason } = cli.command {
            assert_eq!(target.stage, Stage::Produccion);
            assert_eq!(reason, "missing material");
        } else {
            panic!("Expected Pause command");
        }
    }

    #[test]
    fn test_cli_parse_role() {
        let cli = Cli::parse_from(["st", "close-detention", "7", "pintura", "--role", "supervisor"]);
        assert_eq!(cli.role, Some(Role::Supervisor));
        assert!(matches!(cli.command, Command::CloseDetention { .. }));
    }

    #[test]
    fn test_cli_rejects_unknown_stage() {
        assert!(Cli::try_parse_from(["st", "start", "1", "barniz"]).is_err());
    }

    #[test]
    fn test_cli_parse_report_range() {
        let cli = Cli::parse_from(["st", "--json", "report", "--from", "2024-05-01", "--to", "2024-05-31"]);
        assert!(cli.json);
        if let Command::Report { folio, from, to, remote } = cli.command {
            assert!(folio.is_none());
            assert_eq!(from, NaiveDate::from_ymd_opt(2024, 5, 1));
            assert_eq!(to, NaiveDate::from_ymd_opt(2024, 5, 31));
            assert!(!remote);
        } else {
            panic!("Expected Report command");
        }
    }

    #[test]
    fn test_cli_report_folio_excludes_range() {
        assert!(Cli::try_parse_from(["st", "report", "--folio", "1", "--from", "2024-05-01"]).is_err());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["st", "-c", "/path/to/config.yml", "pending"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }
}
