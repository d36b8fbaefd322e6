//! Command line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use payclose::incidence::GroupOrder;
use payclose::jobs::JobKind;
use payclose::lifecycle::SectionId;

/// Payroll closing client: lifecycle, incidences and backend jobs.
#[derive(Debug, Parser)]
#[command(name = "payclose", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to ./payclose.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the configured job poll interval.
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum JobArg {
    FileProcess,
    Verify,
    Consolidate,
    GenerateIncidences,
    Finalize,
}

impl From<JobArg> for JobKind {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::FileProcess => JobKind::FileProcess,
            JobArg::Verify => JobKind::Verify,
            JobArg::Consolidate => JobKind::Consolidate,
            JobArg::GenerateIncidences => JobKind::GenerateIncidences,
            JobArg::Finalize => JobKind::Finalize,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UploadArg {
    A,
    B,
}

impl From<UploadArg> for SectionId {
    fn from(arg: UploadArg) -> Self {
        match arg {
            UploadArg::A => SectionId::UploadA,
            UploadArg::B => SectionId::UploadB,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OrderArg {
    #[default]
    Key,
    /// Largest variation first.
    Delta,
    /// Highest priority first.
    Priority,
    /// Largest current amount first.
    Current,
}

impl From<OrderArg> for GroupOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Key => GroupOrder::Key,
            OrderArg::Delta => GroupOrder::DeltaDesc,
            OrderArg::Priority => GroupOrder::PriorityDesc,
            OrderArg::Current => GroupOrder::CurrentDesc,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shows a closing's status and unlocked sections.
    Status { closing: String },

    /// Lists a closing's incidences grouped by concept.
    Incidences {
        closing: String,

        #[arg(long, value_enum, default_value_t = OrderArg::Key)]
        order: OrderArg,
    },

    /// Shows the resolution history of one incidence.
    History { incidence: String },

    /// Submits a backend job and waits for its outcome.
    Job {
        closing: String,

        #[arg(value_enum)]
        kind: JobArg,

        /// What the job works on, e.g. the uploaded file id.
        #[arg(long)]
        subject: Option<String>,

        /// Upload section of the file (file-process jobs only).
        #[arg(long, value_enum)]
        section: Option<UploadArg>,
    },

    /// Walks an in-memory closing from upload to finalization.
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_incidences_order() {
        let cli = Cli::parse_from(["payclose", "incidences", "c-1", "--order", "priority"]);
        match cli.command {
            Command::Incidences { closing, order } => {
                assert_eq!(closing, "c-1");
                assert_eq!(GroupOrder::from(order), GroupOrder::PriorityDesc);
            }
            _ => panic!("expected Incidences command"),
        }
    }

    #[test]
    fn cli_parses_job_subcommand() {
        let cli = Cli::parse_from([
            "payclose",
            "job",
            "c-1",
            "file-process",
            "--subject",
            "libro.xlsx",
            "--section",
            "b",
        ]);
        match cli.command {
            Command::Job {
                closing,
                kind,
                subject,
                section,
            } => {
                assert_eq!(closing, "c-1");
                assert_eq!(JobKind::from(kind), JobKind::FileProcess);
                assert_eq!(subject.as_deref(), Some("libro.xlsx"));
                assert_eq!(section.map(SectionId::from), Some(SectionId::UploadB));
            }
            _ => panic!("expected Job command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "payclose",
            "--config",
            "/etc/payclose.toml",
            "--poll-interval-ms",
            "500",
            "--verbose",
            "demo",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.poll_interval_ms, Some(500));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/payclose.toml")));
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
