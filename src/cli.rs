use clap::{Parser, Subcommand};

use crate::model::Split;

#[derive(Parser)]
#[command(name = "slack-archiver")]
#[command(about = "Archive Slack channel history into time-bucketed logs and clean it up afterwards")]
pub struct Cli {
    /// Slack API token (falls back to SLACK_TOKEN, then an interactive prompt)
    #[arg(short, long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Archive channel posts older than the cutoff
    Archive {
        /// Output directory
        #[arg(short, long)]
        out: Option<String>,

        /// Archive data older than the specified days
        #[arg(short, long, default_value_t = 0)]
        before: i64,

        /// Period to split the output directory by
        #[arg(short, long, value_enum)]
        split: Option<Split>,

        /// Fail on attachments without a private download URL instead of skipping them
        #[arg(long)]
        strict_attachments: bool,

        /// Channel id
        channel: String,
    },

    /// Archive files not referenced by any channel, group or DM
    Unused {
        /// Output directory
        #[arg(short, long)]
        out: Option<String>,

        /// Archive data older than the specified days
        #[arg(short, long, default_value_t = 0)]
        before: i64,

        /// Period to split the output directory by
        #[arg(short, long, value_enum)]
        split: Option<Split>,
    },

    /// Delete archived posts and files listed in a checkpoint file
    Clean {
        /// Only delete files; implies --ignore-use
        #[arg(short = 'f', long)]
        only_files: bool,

        /// Delete even files that are still in use
        #[arg(short = 'i', long)]
        ignore_use: bool,

        /// Actually perform the deletions. Deleted posts cannot be
        /// restored; without this flag the command is a dry run.
        #[arg(long)]
        yes_really_delete: bool,

        /// Checkpoint JSON file produced by archive or unused
        file: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_archive_parses_with_defaults() {
        let cli = Cli::try_parse_from(["slack-archiver", "archive", "C123"]).unwrap();
        match cli.command {
            Commands::Archive {
                out,
                before,
                split,
                strict_attachments,
                channel,
            } => {
                assert!(out.is_none());
                assert_eq!(before, 0);
                assert!(split.is_none());
                assert!(!strict_attachments);
                assert_eq!(channel, "C123");
            }
            _ => panic!("expected archive subcommand"),
        }
    }

    #[test]
    fn test_clean_requires_explicit_destructive_flag() {
        let cli = Cli::try_parse_from(["slack-archiver", "clean", "history.json"]).unwrap();
        match cli.command {
            Commands::Clean {
                yes_really_delete, ..
            } => assert!(!yes_really_delete),
            _ => panic!("expected clean subcommand"),
        }
    }

    #[test]
    fn test_global_token_flag() {
        let cli =
            Cli::try_parse_from(["slack-archiver", "archive", "C123", "--token", "xoxb-1"])
                .unwrap();
        assert_eq!(cli.token.as_deref(), Some("xoxb-1"));
    }

    #[test]
    fn test_split_values() {
        for (value, split) in [
            ("day", Split::Day),
            ("month", Split::Month),
            ("year", Split::Year),
            ("all", Split::All),
        ] {
            let cli =
                Cli::try_parse_from(["slack-archiver", "archive", "-s", value, "C123"]).unwrap();
            match cli.command {
                Commands::Archive { split: Some(s), .. } => assert_eq!(s, split),
                _ => panic!("expected archive subcommand with split"),
            }
        }
    }
}
