use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::archive::{ArchiveJob, RunContext, archive};
use crate::checkpoint::RawCheckpoint;
use crate::cleanup::{CleanupOptions, clean};
use crate::error::Result;
use crate::model::{AttachmentPolicy, Split};
use crate::settings::Settings;
use crate::slack::HttpSlackClient;
use crate::unused::collect_unused;
use crate::{CancelFlag, resolve_token};

fn build_context(
    token: Option<String>,
    settings: &Settings,
) -> Result<RunContext<HttpSlackClient>> {
    let token = resolve_token(token)?;
    let cancel = CancelFlag::new();
    let client = HttpSlackClient::new(
        token,
        settings.slack.base_url.clone(),
        Duration::from_secs(settings.slack.timeout_secs),
        cancel.clone(),
    )?;
    Ok(RunContext::new(client, cancel))
}

fn cutoff(days: i64) -> DateTime<Local> {
    Local::now() - chrono::Duration::days(days)
}

pub fn run_archive(
    token: Option<String>,
    channel: String,
    out: Option<String>,
    before_days: i64,
    split: Option<Split>,
    strict_attachments: bool,
) -> Result<()> {
    let settings = Settings::load()?;

    let out = out
        .or_else(|| settings.archive.out_dir.clone())
        .unwrap_or_else(|| "./history".to_string());
    let split = split.or(settings.archive.split).unwrap_or(Split::Month);
    let policy = if strict_attachments || settings.archive.strict_attachments {
        AttachmentPolicy::Strict
    } else {
        AttachmentPolicy::Skip
    };

    let ctx = build_context(token, &settings)?;
    let job = ArchiveJob {
        channel,
        out: PathBuf::from(out),
        before: cutoff(before_days),
        split,
        policy,
    };

    println!(
        "Archiving {} into {} (split by {}, older than {} days)...",
        job.channel,
        job.out.display(),
        split,
        before_days
    );

    let checkpoint_path = archive(&ctx, &job)?;

    println!(
        "Archive completed. Raw checkpoint written to {}",
        checkpoint_path.display()
    );
    Ok(())
}

pub fn run_unused(
    token: Option<String>,
    out: Option<String>,
    before_days: i64,
    split: Option<Split>,
) -> Result<()> {
    let settings = Settings::load()?;

    let out = out.unwrap_or_else(|| "./unused".to_string());
    let split = split.or(settings.archive.split).unwrap_or(Split::Month);

    let ctx = build_context(token, &settings)?;

    println!(
        "Collecting unused files into {} (split by {}, older than {} days)...",
        out, split, before_days
    );

    let checkpoint_path = collect_unused(&ctx, Path::new(&out), &cutoff(before_days), split)?;

    println!(
        "Scan completed. Raw checkpoint written to {}",
        checkpoint_path.display()
    );
    Ok(())
}

pub fn run_clean(
    token: Option<String>,
    file: String,
    only_files: bool,
    ignore_use: bool,
    confirmed: bool,
) -> Result<()> {
    let settings = Settings::load()?;
    let checkpoint = RawCheckpoint::load(Path::new(&file))?;

    if !confirmed {
        println!(
            "Dry run: pass --yes-really-delete to actually delete. Deleted posts cannot be restored."
        );
    }

    let ctx = build_context(token, &settings)?;
    let opts = CleanupOptions {
        only_files,
        ignore_use,
        confirmed,
    };
    let report = clean(&ctx, &checkpoint, opts)?;

    println!(
        "Cleanup completed. {} messages deleted, {} files deleted, {} already gone, {} kept in use.",
        report.deleted_messages, report.deleted_files, report.missing, report.kept_in_use
    );
    Ok(())
}
