use std::collections::VecDeque;

use serde_json::Value;

use crate::error::{AppError, Result};

/// One paginated remote feed. Implementations fetch whole raw pages;
/// `Paginated` turns them into a lazy item stream. The default
/// `next_token` reads cursor metadata; feeds that page by page number
/// override it.
pub trait PageFeed {
    fn fetch_first(&mut self) -> Result<Value>;

    fn fetch_next(&mut self, token: &str) -> Result<Value>;

    /// Page field holding the items.
    fn items_key(&self) -> &'static str {
        "messages"
    }

    /// Identifies the feed in error messages.
    fn label(&self) -> String;

    fn next_token(&self, page: &Value) -> Option<String> {
        if !page
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return None;
        }
        page.pointer("/response_metadata/next_cursor")
            .and_then(Value::as_str)
            .filter(|cursor| !cursor.is_empty())
            .map(ToString::to_string)
    }
}

/// Lazy single-pass iterator over a paginated feed. Each page is checked
/// for its `ok` flag and ingested whole before any of its items is
/// yielded; restarting means building a new instance.
pub struct Paginated<F> {
    feed: F,
    buf: VecDeque<Value>,
    next: Option<String>,
    started: bool,
    done: bool,
}

impl<F: PageFeed> Paginated<F> {
    pub fn new(feed: F) -> Self {
        Self {
            feed,
            buf: VecDeque::new(),
            next: None,
            started: false,
            done: false,
        }
    }

    fn ingest(&mut self, page: Value) -> Result<()> {
        if page.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(AppError::InvalidResponse {
                context: self.feed.label(),
            });
        }
        let items = page
            .get(self.feed.items_key())
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::InvalidResponse {
                context: self.feed.label(),
            })?;
        self.buf.extend(items.iter().cloned());
        self.next = self.feed.next_token(&page);
        Ok(())
    }
}

impl<F: PageFeed> Iterator for Paginated<F> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buf.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            let page = if !self.started {
                self.started = true;
                self.feed.fetch_first()
            } else if let Some(token) = self.next.take() {
                self.feed.fetch_next(&token)
            } else {
                self.done = true;
                return None;
            };
            match page.and_then(|p| self.ingest(p)) {
                Ok(()) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
