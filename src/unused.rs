use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use serde_json::Value;

use crate::archive::{RunContext, download_attachment};
use crate::checkpoint::RawCheckpoint;
use crate::error::{AppError, Result};
use crate::model::{FileAttachment, Split};
use crate::pagination::Paginated;
use crate::slack::{FilesFeed, SlackApi};

/// True when the file record is still referenced by any channel, group
/// or direct-message conversation.
pub fn file_in_use(record: &Value) -> bool {
    ["channels", "groups", "ims"].iter().any(|key| {
        record
            .get(*key)
            .and_then(Value::as_array)
            .is_some_and(|refs| !refs.is_empty())
    })
}

fn attachment_from_record(record: &Value) -> Result<FileAttachment> {
    let field = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| AppError::UnexpectedShape {
                context: format!("file record without {key:?}"),
            })
    };
    Ok(FileAttachment {
        id: field("id")?,
        name: field("name")?,
        title: field("title")?,
        url: field("url_private_download")?,
    })
}

/// Scan the workspace file listing for orphans older than the cutoff,
/// download each into a bucket keyed by its creation time and write an
/// `unused-*.json` checkpoint of the raw records kept.
pub fn collect_unused<A: SlackApi>(
    ctx: &RunContext<A>,
    out: &Path,
    before: &DateTime<Local>,
    split: Split,
) -> Result<PathBuf> {
    fs::create_dir_all(out).map_err(|e| AppError::WriteFile {
        path: out.display().to_string(),
        source: e,
    })?;

    let mut checkpoint = RawCheckpoint::default();
    let feed = FilesFeed {
        api: &ctx.api,
        ts_to: before.timestamp().to_string(),
    };
    for record in Paginated::new(feed) {
        ctx.cancel.check()?;
        let record = record?;
        if record
            .get("url_private_download")
            .and_then(Value::as_str)
            .is_none()
        {
            continue;
        }
        if file_in_use(&record) {
            continue;
        }

        let created = record
            .get("created")
            .and_then(Value::as_i64)
            .ok_or_else(|| AppError::UnexpectedShape {
                context: "file record without \"created\"".to_string(),
            })?;
        let created = Local
            .timestamp_opt(created, 0)
            .single()
            .ok_or_else(|| AppError::UnexpectedShape {
                context: format!("file record with invalid \"created\" {created}"),
            })?;

        let dir = out.join(split.key(&created));
        fs::create_dir_all(&dir).map_err(|e| AppError::WriteFile {
            path: dir.display().to_string(),
            source: e,
        })?;
        let attachment = attachment_from_record(&record)?;
        download_attachment(ctx, &dir, &attachment)?;
        checkpoint.files.push(record);
    }

    checkpoint.save(out, "unused")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancelFlag;
    use crate::testutil::FakeApi;
    use serde_json::json;
    use tempfile::tempdir;

    fn orphan(id: &str, name: &str, created: i64, url: &str) -> Value {
        json!({
            "id": id, "name": name, "title": name, "created": created,
            "url_private_download": url,
            "channels": [], "groups": [], "ims": [],
        })
    }

    #[test]
    fn test_file_in_use_checks_all_membership_lists() {
        assert!(!file_in_use(&json!({"channels": [], "groups": [], "ims": []})));
        assert!(file_in_use(&json!({"channels": ["C1"], "groups": [], "ims": []})));
        assert!(file_in_use(&json!({"channels": [], "groups": ["G1"], "ims": []})));
        assert!(file_in_use(&json!({"channels": [], "groups": [], "ims": ["D1"]})));
        // missing lists count as unused
        assert!(!file_in_use(&json!({})));
    }

    #[test]
    fn test_collect_unused_downloads_orphans_only() {
        let dir = tempdir().unwrap();
        let mut api = FakeApi::new();
        api.files = vec![
            orphan("F1", "a.png", 100, "https://files.test/f1"),
            json!({
                "id": "F2", "name": "used.png", "title": "used.png", "created": 100,
                "url_private_download": "https://files.test/f2",
                "channels": ["C1"], "groups": [], "ims": [],
            }),
            json!({"id": "F3", "name": "external", "title": "external", "created": 100}),
        ];
        api.file_bodies
            .insert("https://files.test/f1".to_string(), b"orphan".to_vec());

        let ctx = RunContext::new(api, CancelFlag::new());
        let before = Local.timestamp_opt(1000, 0).single().unwrap();
        let checkpoint_path = collect_unused(&ctx, dir.path(), &before, Split::Month).unwrap();

        let checkpoint = RawCheckpoint::load(&checkpoint_path).unwrap();
        assert_eq!(checkpoint.files.len(), 1);
        assert_eq!(checkpoint.files[0]["id"], "F1");

        // the orphan landed in the bucket keyed by its creation time
        let created = Local.timestamp_opt(100, 0).single().unwrap();
        let bucket = dir.path().join(Split::Month.key(&created));
        assert_eq!(fs::read(bucket.join("F1.png")).unwrap(), b"orphan");

        // only the orphan was fetched
        assert_eq!(ctx.api.fetch_calls.borrow().len(), 1);
    }

    #[test]
    fn test_collect_unused_pages_through_listing() {
        let dir = tempdir().unwrap();
        let mut api = FakeApi::new();
        api.page_size = 1;
        api.files = vec![
            orphan("F1", "a.bin", 100, "https://files.test/f1"),
            orphan("F2", "b.bin", 100, "https://files.test/f2"),
            orphan("F3", "c.bin", 100, "https://files.test/f3"),
        ];
        for f in ["f1", "f2", "f3"] {
            api.file_bodies
                .insert(format!("https://files.test/{f}"), f.as_bytes().to_vec());
        }

        let ctx = RunContext::new(api, CancelFlag::new());
        let before = Local.timestamp_opt(1000, 0).single().unwrap();
        let checkpoint_path = collect_unused(&ctx, dir.path(), &before, Split::All).unwrap();

        let checkpoint = RawCheckpoint::load(&checkpoint_path).unwrap();
        assert_eq!(checkpoint.files.len(), 3);
        assert!(dir.path().join("all").join("F3.bin").exists());
    }
}
