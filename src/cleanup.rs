use serde_json::Value;

use crate::archive::RunContext;
use crate::checkpoint::RawCheckpoint;
use crate::error::{AppError, Result};
use crate::slack::SlackApi;
use crate::unused::file_in_use;

/// How a cleanup run behaves. Without `confirmed` the engine is a dry
/// run: it prints intended deletions and never constructs a destructive
/// call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupOptions {
    pub only_files: bool,
    pub ignore_use: bool,
    pub confirmed: bool,
}

impl CleanupOptions {
    fn skip_use_check(&self) -> bool {
        self.ignore_use || self.only_files
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted_messages: usize,
    pub deleted_files: usize,
    pub missing: usize,
    pub kept_in_use: usize,
}

/// Error codes the service returns for already-deleted targets; cleanup
/// treats them as success.
fn is_gone(code: &str) -> bool {
    matches!(code, "file_not_found" | "file_deleted" | "message_not_found")
}

/// Delete everything a checkpoint references: thread replies first, then
/// top-level messages, then standalone file records from an unused scan.
pub fn clean<A: SlackApi>(
    ctx: &RunContext<A>,
    checkpoint: &RawCheckpoint,
    opts: CleanupOptions,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let channel = checkpoint.channel.as_deref().unwrap_or("");

    for replies in checkpoint.threads.values() {
        for reply in replies {
            ctx.cancel.check()?;
            delete_chat(ctx, channel, reply, opts, &mut report)?;
        }
    }
    for message in &checkpoint.messages {
        ctx.cancel.check()?;
        delete_chat(ctx, channel, message, opts, &mut report)?;
    }
    for record in &checkpoint.files {
        ctx.cancel.check()?;
        if record
            .get("url_private_download")
            .and_then(Value::as_str)
            .is_none()
        {
            continue;
        }
        if let Some(id) = record.get("id").and_then(Value::as_str) {
            delete_file(ctx, id, opts, &mut report)?;
        }
    }
    Ok(report)
}

fn delete_chat<A: SlackApi>(
    ctx: &RunContext<A>,
    channel: &str,
    record: &Value,
    opts: CleanupOptions,
    report: &mut CleanupReport,
) -> Result<()> {
    let kind = record.get("type").and_then(Value::as_str).unwrap_or("");
    if kind != "message" {
        return Err(AppError::UnexpectedShape {
            context: format!("checkpoint record type {kind:?} is not \"message\""),
        });
    }
    let ts = record
        .get("ts")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::UnexpectedShape {
            context: "checkpoint message without \"ts\"".to_string(),
        })?;

    if !opts.only_files {
        println!("delete chat: {channel} {ts}");
        if opts.confirmed {
            match ctx.api.delete_message(channel, ts) {
                Ok(()) => report.deleted_messages += 1,
                Err(AppError::SlackApi(code)) if is_gone(&code) => {
                    println!("not found: {ts}");
                    report.missing += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // chat first; usage counts only settle once the message is gone
    let Some(files) = record.get("files").and_then(Value::as_array) else {
        return Ok(());
    };
    for file in files {
        if file
            .get("url_private_download")
            .and_then(Value::as_str)
            .is_none()
        {
            continue;
        }
        let Some(id) = file.get("id").and_then(Value::as_str) else {
            continue;
        };
        if opts.confirmed && !opts.skip_use_check() {
            match ctx.api.file_info(id) {
                Ok(info) => {
                    let usage = info.get("file").cloned().unwrap_or(Value::Null);
                    if file_in_use(&usage) {
                        report.kept_in_use += 1;
                        continue;
                    }
                }
                Err(AppError::SlackApi(code)) if is_gone(&code) => {
                    println!("not found: {id}");
                    report.missing += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        delete_file(ctx, id, opts, report)?;
    }
    Ok(())
}

fn delete_file<A: SlackApi>(
    ctx: &RunContext<A>,
    id: &str,
    opts: CleanupOptions,
    report: &mut CleanupReport,
) -> Result<()> {
    println!("delete file: {id}");
    if !opts.confirmed {
        return Ok(());
    }
    match ctx.api.delete_file(id) {
        Ok(()) => report.deleted_files += 1,
        Err(AppError::SlackApi(code)) if is_gone(&code) => {
            println!("not found: {id}");
            report.missing += 1;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancelFlag;
    use crate::testutil::FakeApi;
    use serde_json::json;

    fn message(ts: &str) -> Value {
        json!({"type": "message", "ts": ts, "user": "U1", "text": "x"})
    }

    fn message_with_file(ts: &str, id: &str) -> Value {
        json!({
            "type": "message", "ts": ts, "user": "U1", "text": "x",
            "files": [{"id": id, "name": "a.png", "title": "a.png",
                       "url_private_download": format!("https://files.test/{id}")}],
        })
    }

    fn checkpoint() -> RawCheckpoint {
        let mut cp = RawCheckpoint::for_channel("C1");
        cp.messages.push(message_with_file("300.000000", "F1"));
        cp.messages.push(message("100.000000"));
        cp.threads.insert(
            "300.000000".to_string(),
            vec![message("310.000000"), message("320.000000")],
        );
        cp
    }

    fn context() -> RunContext<FakeApi> {
        RunContext::new(FakeApi::new(), CancelFlag::new())
    }

    #[test]
    fn test_dry_run_makes_no_remote_calls() {
        let ctx = context();
        let report = clean(&ctx, &checkpoint(), CleanupOptions::default()).unwrap();

        assert_eq!(report, CleanupReport::default());
        assert!(ctx.api.deleted_messages.borrow().is_empty());
        assert!(ctx.api.deleted_files.borrow().is_empty());
        assert!(ctx.api.info_calls.borrow().is_empty());
    }

    #[test]
    fn test_confirmed_run_deletes_replies_then_messages_then_files() {
        let ctx = context();
        let opts = CleanupOptions {
            confirmed: true,
            ..CleanupOptions::default()
        };
        let report = clean(&ctx, &checkpoint(), opts).unwrap();

        assert_eq!(report.deleted_messages, 4);
        assert_eq!(report.deleted_files, 1);
        let deleted = ctx.api.deleted_messages.borrow();
        // thread replies go before top-level messages
        assert_eq!(
            *deleted,
            vec!["310.000000", "320.000000", "300.000000", "100.000000"]
        );
        assert_eq!(*ctx.api.deleted_files.borrow(), vec!["F1"]);
        // the use check ran for the one attachment
        assert_eq!(*ctx.api.info_calls.borrow(), vec!["F1"]);
    }

    #[test]
    fn test_missing_message_is_tolerated_and_files_still_checked() {
        let mut api = FakeApi::new();
        api.missing_messages.push("300.000000".to_string());
        let ctx = RunContext::new(api, CancelFlag::new());
        let opts = CleanupOptions {
            confirmed: true,
            ..CleanupOptions::default()
        };
        let report = clean(&ctx, &checkpoint(), opts).unwrap();

        assert_eq!(report.missing, 1);
        assert_eq!(report.deleted_messages, 3);
        // the missing message's attachment was still deleted
        assert_eq!(*ctx.api.deleted_files.borrow(), vec!["F1"]);
    }

    #[test]
    fn test_missing_file_is_tolerated_and_run_continues() {
        let mut api = FakeApi::new();
        api.missing_files.push("F1".to_string());
        let ctx = RunContext::new(api, CancelFlag::new());
        let mut cp = RawCheckpoint::for_channel("C1");
        cp.messages.push(message_with_file("300.000000", "F1"));
        cp.messages.push(message("100.000000"));
        let opts = CleanupOptions {
            confirmed: true,
            ignore_use: true,
            ..CleanupOptions::default()
        };
        let report = clean(&ctx, &cp, opts).unwrap();

        assert_eq!(report.missing, 1);
        // the later message was still processed
        assert_eq!(report.deleted_messages, 2);
    }

    #[test]
    fn test_only_files_skips_messages_and_use_check() {
        let ctx = context();
        let opts = CleanupOptions {
            confirmed: true,
            only_files: true,
            ..CleanupOptions::default()
        };
        let report = clean(&ctx, &checkpoint(), opts).unwrap();

        assert_eq!(report.deleted_messages, 0);
        assert!(ctx.api.deleted_messages.borrow().is_empty());
        assert!(ctx.api.info_calls.borrow().is_empty());
        assert_eq!(*ctx.api.deleted_files.borrow(), vec!["F1"]);
    }

    #[test]
    fn test_file_still_in_use_is_kept() {
        let mut api = FakeApi::new();
        api.file_usage.insert(
            "F1".to_string(),
            json!({"channels": ["C2"], "groups": [], "ims": []}),
        );
        let ctx = RunContext::new(api, CancelFlag::new());
        let opts = CleanupOptions {
            confirmed: true,
            ..CleanupOptions::default()
        };
        let report = clean(&ctx, &checkpoint(), opts).unwrap();

        assert_eq!(report.kept_in_use, 1);
        assert!(ctx.api.deleted_files.borrow().is_empty());
    }

    #[test]
    fn test_unused_checkpoint_files_are_deleted() {
        let ctx = context();
        let mut cp = RawCheckpoint::default();
        cp.files.push(json!({
            "id": "F7", "name": "a.bin", "title": "a.bin",
            "url_private_download": "https://files.test/f7",
        }));
        cp.files.push(json!({"id": "F8", "name": "external", "title": "external"}));
        let opts = CleanupOptions {
            confirmed: true,
            ..CleanupOptions::default()
        };
        let report = clean(&ctx, &cp, opts).unwrap();

        // the record without a private URL is skipped
        assert_eq!(report.deleted_files, 1);
        assert_eq!(*ctx.api.deleted_files.borrow(), vec!["F7"]);
    }

    #[test]
    fn test_non_message_record_aborts() {
        let ctx = context();
        let mut cp = RawCheckpoint::for_channel("C1");
        cp.messages.push(json!({"type": "file_comment", "ts": "100.000000"}));
        let err = clean(&ctx, &cp, CleanupOptions::default()).unwrap_err();
        assert!(matches!(err, AppError::UnexpectedShape { .. }));
    }
}
