//! In-memory `SlackApi` double for pipeline tests. Pages in fixed-size
//! chunks like the real feeds, records every call that matters and never
//! touches the network.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::slack::SlackApi;

#[derive(Default)]
pub struct FakeApi {
    /// History records, newest first, like the real endpoint.
    pub messages: Vec<Value>,
    /// Reply feeds keyed by thread-root ts, root included, as served.
    pub threads: HashMap<String, Vec<Value>>,
    pub users: HashMap<String, String>,
    /// files.list records; the ts_to filter is left to the caller's data.
    pub files: Vec<Value>,
    /// files.info payloads keyed by file id.
    pub file_usage: HashMap<String, Value>,
    /// Download bodies keyed by URL.
    pub file_bodies: HashMap<String, Vec<u8>>,
    pub missing_messages: Vec<String>,
    pub missing_files: Vec<String>,
    pub page_size: usize,

    pub deleted_messages: RefCell<Vec<String>>,
    pub deleted_files: RefCell<Vec<String>>,
    pub info_calls: RefCell<Vec<String>>,
    pub user_calls: RefCell<Vec<String>>,
    pub fetch_calls: RefCell<Vec<String>>,

    latest: RefCell<Option<f64>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            page_size: 2,
            ..Self::default()
        }
    }

    fn page_of(&self, items: &[Value], cursor: Option<&str>) -> Result<Value> {
        let start: usize = match cursor {
            Some(c) => c.parse().map_err(|_| AppError::InvalidResponse {
                context: "fake cursor".to_string(),
            })?,
            None => 0,
        };
        let size = self.page_size.max(1);
        let chunk: Vec<Value> = items.iter().skip(start).take(size).cloned().collect();
        let end = (start + size).min(items.len());
        let has_more = end < items.len();
        let mut page = json!({"ok": true, "messages": chunk, "has_more": has_more});
        if has_more {
            page["response_metadata"] = json!({"next_cursor": end.to_string()});
        }
        Ok(page)
    }
}

fn ts_of(record: &Value) -> f64 {
    record
        .get("ts")
        .and_then(Value::as_str)
        .and_then(|ts| ts.parse().ok())
        .unwrap_or(0.0)
}

impl SlackApi for FakeApi {
    fn history_page(
        &self,
        _channel: &str,
        latest: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Value> {
        if let Some(latest) = latest {
            *self.latest.borrow_mut() = latest.parse().ok();
        }
        let cut = self.latest.borrow().unwrap_or(f64::MAX);
        let filtered: Vec<Value> = self
            .messages
            .iter()
            .filter(|m| ts_of(m) < cut)
            .cloned()
            .collect();
        self.page_of(&filtered, cursor)
    }

    fn replies_page(&self, _channel: &str, ts: &str, cursor: Option<&str>) -> Result<Value> {
        let replies = self.threads.get(ts).cloned().unwrap_or_default();
        self.page_of(&replies, cursor)
    }

    fn files_page(&self, _ts_to: &str, page: u64) -> Result<Value> {
        let size = self.page_size.max(1);
        let pages = self.files.len().div_ceil(size).max(1) as u64;
        let start = (page as usize - 1) * size;
        let chunk: Vec<Value> = self.files.iter().skip(start).take(size).cloned().collect();
        Ok(json!({
            "ok": true,
            "files": chunk,
            "paging": {"page": page, "pages": pages},
        }))
    }

    fn user_real_name(&self, user: &str) -> Result<String> {
        self.user_calls.borrow_mut().push(user.to_string());
        self.users
            .get(user)
            .cloned()
            .ok_or_else(|| AppError::SlackApi("user_not_found".to_string()))
    }

    fn delete_message(&self, _channel: &str, ts: &str) -> Result<()> {
        if self.missing_messages.iter().any(|m| m == ts) {
            return Err(AppError::SlackApi("message_not_found".to_string()));
        }
        self.deleted_messages.borrow_mut().push(ts.to_string());
        Ok(())
    }

    fn delete_file(&self, file: &str) -> Result<()> {
        if self.missing_files.iter().any(|f| f == file) {
            return Err(AppError::SlackApi("file_not_found".to_string()));
        }
        self.deleted_files.borrow_mut().push(file.to_string());
        Ok(())
    }

    fn file_info(&self, file: &str) -> Result<Value> {
        self.info_calls.borrow_mut().push(file.to_string());
        if self.missing_files.iter().any(|f| f == file) {
            return Err(AppError::SlackApi("file_not_found".to_string()));
        }
        let usage = self
            .file_usage
            .get(file)
            .cloned()
            .unwrap_or_else(|| json!({"channels": [], "groups": [], "ims": []}));
        Ok(json!({"ok": true, "file": usage}))
    }

    fn fetch_file(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_calls.borrow_mut().push(url.to_string());
        self.file_bodies
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::DownloadFailed {
                file: url.to_string(),
                status: 404,
            })
    }
}
