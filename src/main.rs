use clap::Parser;
use slack_archiver::cli::{Cli, Commands};
use slack_archiver::commands;

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Archive {
            out,
            before,
            split,
            strict_attachments,
            channel,
        } => commands::run_archive(cli.token, channel, out, before, split, strict_attachments),
        Commands::Unused { out, before, split } => {
            commands::run_unused(cli.token, out, before, split)
        }
        Commands::Clean {
            only_files,
            ignore_use,
            yes_really_delete,
            file,
        } => commands::run_clean(cli.token, file, only_files, ignore_use, yes_really_delete),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
