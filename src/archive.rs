use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde_json::Value;

use crate::CancelFlag;
use crate::checkpoint::RawCheckpoint;
use crate::error::{AppError, Result};
use crate::formatter;
use crate::model::{AttachmentPolicy, FileAttachment, Message, Split, translate};
use crate::pagination::Paginated;
use crate::slack::{HistoryFeed, RepliesFeed, SlackApi};

/// Per-run state shared by every component: the remote boundary, the
/// author display-name cache and the cancellation flag. Replaces any
/// notion of process-wide globals; one context per run.
pub struct RunContext<A> {
    pub api: A,
    pub cancel: CancelFlag,
    names: RefCell<HashMap<String, String>>,
}

impl<A: SlackApi> RunContext<A> {
    pub fn new(api: A, cancel: CancelFlag) -> Self {
        Self {
            api,
            cancel,
            names: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve an author id to a display name, remembering the answer for
    /// the rest of the run. At most one users.info call per id.
    pub fn user_name(&self, user: &str) -> Result<String> {
        if let Some(name) = self.names.borrow().get(user) {
            return Ok(name.clone());
        }
        let name = self.api.user_real_name(user)?;
        self.names
            .borrow_mut()
            .insert(user.to_string(), name.clone());
        Ok(name)
    }
}

/// Download one attachment into `dir`, keyed by its stable id. An
/// existing destination skips the fetch entirely, so re-running an
/// archive never re-downloads. Returns whether a fetch happened.
pub fn download_attachment<A: SlackApi>(
    ctx: &RunContext<A>,
    dir: &Path,
    file: &FileAttachment,
) -> Result<bool> {
    let path = dir.join(file.storage_name());
    if path.exists() {
        return Ok(false);
    }
    let bytes = match ctx.api.fetch_file(&file.url) {
        Ok(bytes) => bytes,
        Err(AppError::DownloadFailed { status, .. }) => {
            return Err(AppError::DownloadFailed {
                file: file.id.clone(),
                status,
            });
        }
        Err(e) => return Err(e),
    };
    fs::write(&path, bytes).map_err(|e| AppError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(true)
}

/// Groups the message stream into buckets by the split key and flushes
/// each finished bucket to a directory holding its attachments and an
/// append-only `log.txt`. Only the current bucket is ever buffered.
pub struct BucketWriter<'a, A: SlackApi> {
    ctx: &'a RunContext<A>,
    out: PathBuf,
    split: Split,
    key: Option<String>,
    buf: Vec<Message>,
}

impl<'a, A: SlackApi> BucketWriter<'a, A> {
    pub fn new(ctx: &'a RunContext<A>, out: &Path, split: Split) -> Self {
        Self {
            ctx,
            out: out.to_path_buf(),
            split,
            key: None,
            buf: Vec::new(),
        }
    }

    /// Buffer the message under its bucket key, flushing the previous
    /// bucket when the key changes. The very first message only opens a
    /// buffer.
    pub fn observe(&mut self, message: Message) -> Result<()> {
        let current = self.split.key(&message.time);
        if self.key.as_deref() == Some(current.as_str()) {
            self.buf.push(message);
            return Ok(());
        }
        if self.key.is_some() {
            self.flush()?;
        }
        self.key = Some(current);
        self.buf.push(message);
        Ok(())
    }

    /// Flush whatever is still buffered.
    pub fn finish(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let Some(key) = self.key.clone() else {
            return Ok(());
        };
        let dir = self.out.join(&key);
        fs::create_dir_all(&dir).map_err(|e| AppError::WriteFile {
            path: dir.display().to_string(),
            source: e,
        })?;

        let mut messages = std::mem::take(&mut self.buf);
        // the feed direction decides arrival order, the log does not
        messages.sort_by_key(|m| m.time);

        for message in &messages {
            for file in &message.files {
                download_attachment(self.ctx, &dir, file)?;
            }
            for reply in &message.thread {
                for file in &reply.files {
                    download_attachment(self.ctx, &dir, file)?;
                }
            }
        }

        let log_path = dir.join("log.txt");
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| AppError::WriteFile {
                path: log_path.display().to_string(),
                source: e,
            })?;

        for message in &messages {
            let author = self.ctx.user_name(&message.user)?;
            log.write_all(formatter::message_block(message, &author).as_bytes())?;
            for reply in &message.thread {
                let author = self.ctx.user_name(&reply.user)?;
                log.write_all(formatter::reply_block(reply, &author).as_bytes())?;
            }
            log.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Fetch and attach the reply set of a thread root. Raw replies land in
/// the checkpoint mapping before translation, so cleanup has data even
/// if a later reply fails to parse. The root re-appears in its own reply
/// feed and is dropped by comparing the ts field itself, not record
/// content.
pub fn resolve_thread<A: SlackApi>(
    ctx: &RunContext<A>,
    channel: &str,
    message: &mut Message,
    checkpoint: &mut RawCheckpoint,
    policy: AttachmentPolicy,
) -> Result<()> {
    let Some(root_ts) = message.thread_ts.clone() else {
        return Ok(());
    };
    let raw_replies = checkpoint.threads.entry(root_ts.clone()).or_default();
    let feed = RepliesFeed {
        api: &ctx.api,
        channel,
        ts: &root_ts,
    };
    for reply in Paginated::new(feed) {
        let reply = reply?;
        let ts = reply.get("ts").and_then(Value::as_str);
        let thread_ts = reply.get("thread_ts").and_then(Value::as_str);
        if ts == thread_ts {
            continue;
        }
        raw_replies.push(reply.clone());
        message.thread.push(translate(&reply, policy)?);
    }
    Ok(())
}

/// Parameters of one archive run.
pub struct ArchiveJob {
    pub channel: String,
    pub out: PathBuf,
    pub before: DateTime<Local>,
    pub split: Split,
    pub policy: AttachmentPolicy,
}

/// The cutoff instant as the fixed-point seconds string the history API
/// takes for `latest`.
pub fn slack_ts(time: &DateTime<Local>) -> String {
    format!("{}.{:06}", time.timestamp(), time.timestamp_subsec_micros())
}

/// Drive a full archive run: paginate history strictly older than the
/// cutoff, translate, resolve threads, bucket and flush, then persist
/// the raw checkpoint. Returns the checkpoint path.
pub fn archive<A: SlackApi>(ctx: &RunContext<A>, job: &ArchiveJob) -> Result<PathBuf> {
    fs::create_dir_all(&job.out).map_err(|e| AppError::WriteFile {
        path: job.out.display().to_string(),
        source: e,
    })?;

    let mut checkpoint = RawCheckpoint::for_channel(&job.channel);
    let mut writer = BucketWriter::new(ctx, &job.out, job.split);

    let feed = HistoryFeed {
        api: &ctx.api,
        channel: &job.channel,
        latest: slack_ts(&job.before),
    };
    for raw in Paginated::new(feed) {
        ctx.cancel.check()?;
        let raw = raw?;
        checkpoint.messages.push(raw.clone());
        let mut message = translate(&raw, job.policy)?;
        resolve_thread(ctx, &job.channel, &mut message, &mut checkpoint, job.policy)?;
        writer.observe(message)?;
    }
    writer.finish()?;

    checkpoint.save(&job.out, "history")
}
