use chrono::{DateTime, Local, TimeZone};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// One attached file as carried by a message record. Immutable once
/// parsed; the URL is bearer-token-authenticated and time-limited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub id: String,
    pub name: String,
    pub title: String,
    pub url: String,
}

impl FileAttachment {
    /// Local filename: the stable file id plus the extension taken from
    /// everything after the first dot of the display name.
    pub fn storage_name(&self) -> String {
        match self.name.split_once('.') {
            Some((_, ext)) if !ext.is_empty() => format!("{}.{}", self.id, ext),
            _ => self.id.clone(),
        }
    }
}

/// A translated message. `thread` stays empty unless this message is a
/// thread root whose replies have been fetched.
#[derive(Debug, Clone)]
pub struct Message {
    pub time: DateTime<Local>,
    pub user: String,
    pub text: String,
    pub files: Vec<FileAttachment>,
    pub thread_ts: Option<String>,
    pub thread: Vec<Message>,
}

/// What to do with an attachment record that has no private download URL
/// (externally shared files never expose one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachmentPolicy {
    /// Drop the attachment, keep the message.
    #[default]
    Skip,
    /// Abort translation of the whole message.
    Strict,
}

/// Parse a fixed-point decimal-seconds timestamp ("1712345678.000400")
/// into an instant tagged with the local zone at archive time. The
/// service does not supply the poster's zone.
pub fn parse_ts(ts: &str) -> Result<DateTime<Local>> {
    let (secs_part, frac_part) = ts.split_once('.').unwrap_or((ts, ""));
    let secs: i64 = secs_part.parse().map_err(|_| bad_ts(ts))?;
    let nanos: u32 = if frac_part.is_empty() {
        0
    } else {
        let mut padded = frac_part.to_string();
        padded.truncate(9);
        while padded.len() < 9 {
            padded.push('0');
        }
        padded.parse().map_err(|_| bad_ts(ts))?
    };
    Local
        .timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| bad_ts(ts))
}

fn bad_ts(ts: &str) -> AppError {
    AppError::UnexpectedShape {
        context: format!("invalid timestamp {ts:?}"),
    }
}

/// Map one raw history record into a `Message`. The record must declare
/// type "message"; anything else aborts the run.
pub fn translate(raw: &Value, policy: AttachmentPolicy) -> Result<Message> {
    let kind = raw.get("type").and_then(Value::as_str).unwrap_or("");
    if kind != "message" {
        return Err(AppError::UnexpectedShape {
            context: format!("record type {kind:?} is not \"message\""),
        });
    }

    let ts = raw
        .get("ts")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::UnexpectedShape {
            context: "message record without \"ts\"".to_string(),
        })?;
    let time = parse_ts(ts)?;

    let user = raw
        .get("user")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::UnexpectedShape {
            context: format!("message {ts} has no \"user\""),
        })?
        .to_string();

    let text = raw
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let mut files = Vec::new();
    if let Some(raw_files) = raw.get("files").and_then(Value::as_array) {
        for f in raw_files {
            let id = f.get("id").and_then(Value::as_str).unwrap_or("").to_string();
            match f.get("url_private_download").and_then(Value::as_str) {
                Some(url) => files.push(FileAttachment {
                    id,
                    name: f.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                    title: f
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    url: url.to_string(),
                }),
                None => match policy {
                    AttachmentPolicy::Skip => continue,
                    AttachmentPolicy::Strict => {
                        return Err(AppError::UnsupportedAttachment { id });
                    }
                },
            }
        }
    }

    let thread_ts = raw
        .get("thread_ts")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(Message {
        time,
        user,
        text,
        files,
        thread_ts,
        thread: Vec::new(),
    })
}

/// Granularity mapping a message timestamp to its bucket directory.
/// Total and pure: every instant maps to exactly one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Day,
    Month,
    Year,
    All,
}

impl Split {
    pub fn key(&self, time: &DateTime<Local>) -> String {
        match self {
            Split::Day => time.format("%Y-%m-%d").to_string(),
            Split::Month => time.format("%Y-%m").to_string(),
            Split::Year => time.format("%Y").to_string(),
            Split::All => "all".to_string(),
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Split::Day => "day",
            Split::Month => "month",
            Split::Year => "year",
            Split::All => "all",
        };
        write!(f, "{label}")
    }
}
