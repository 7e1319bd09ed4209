use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde_json::Value;

use crate::CancelFlag;
use crate::error::{AppError, Result};
use crate::pagination::PageFeed;

/// Everything the pipelines need from the remote service. Paged calls
/// return raw pages (the paginator validates them); the rest are decoded
/// here so no component downstream sees untyped data it did not ask for.
pub trait SlackApi {
    fn history_page(
        &self,
        channel: &str,
        latest: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Value>;

    fn replies_page(&self, channel: &str, ts: &str, cursor: Option<&str>) -> Result<Value>;

    fn files_page(&self, ts_to: &str, page: u64) -> Result<Value>;

    fn user_real_name(&self, user: &str) -> Result<String>;

    fn delete_message(&self, channel: &str, ts: &str) -> Result<()>;

    fn delete_file(&self, file: &str) -> Result<()>;

    fn file_info(&self, file: &str) -> Result<Value>;

    fn fetch_file(&self, url: &str) -> Result<Vec<u8>>;
}

/// Run a remote call, sleeping out rate limits: on `RateLimited` wait
/// `retry_after + 1` seconds and try again, indefinitely. Every other
/// outcome propagates unchanged.
pub fn retry_rate_limited<T>(
    cancel: &CancelFlag,
    mut call: impl FnMut() -> Result<T>,
) -> Result<T> {
    loop {
        match call() {
            Err(AppError::RateLimited { retry_after_secs }) => {
                wait_secs(cancel, retry_after_secs + 1)?;
            }
            other => return other,
        }
    }
}

fn wait_secs(cancel: &CancelFlag, secs: u64) -> Result<()> {
    for _ in 0..secs {
        cancel.check()?;
        thread::sleep(Duration::from_secs(1));
    }
    cancel.check()
}

/// Blocking Slack Web API client. Every request goes through the
/// rate-limit invoker and carries the configured timeout.
pub struct HttpSlackClient {
    http: Client,
    token: String,
    base_url: String,
    cancel: CancelFlag,
}

impl HttpSlackClient {
    pub fn new(
        token: String,
        base_url: String,
        timeout: Duration,
        cancel: CancelFlag,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Http {
                context: "building HTTP client".to_string(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            http,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            cancel,
        })
    }

    fn get_json(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .map_err(|e| AppError::Http {
                context: method.to_string(),
                detail: e.to_string(),
            })?;
        decode_api_response(response, method)
    }

    fn post_json(&self, method: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .map_err(|e| AppError::Http {
                context: method.to_string(),
                detail: e.to_string(),
            })?;
        decode_api_response(response, method)
    }

    fn call_get(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        retry_rate_limited(&self.cancel, || self.get_json(method, params))
    }

    fn call_post(&self, method: &str, body: &Value) -> Result<Value> {
        retry_rate_limited(&self.cancel, || self.post_json(method, body))
    }
}

fn decode_api_response(response: Response, method: &str) -> Result<Value> {
    if response.status().as_u16() == 429 {
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after(&response),
        });
    }
    if !response.status().is_success() {
        return Err(AppError::Http {
            context: method.to_string(),
            detail: format!("HTTP status {}", response.status()),
        });
    }
    let value: Value = response
        .json()
        .map_err(|e| AppError::JsonParse(e.to_string()))?;
    // some deployments report rate limits with a 200 and no header
    if value.get("ok").and_then(Value::as_bool) == Some(false)
        && value.get("error").and_then(Value::as_str) == Some("ratelimited")
    {
        return Err(AppError::RateLimited { retry_after_secs: 1 });
    }
    Ok(value)
}

fn retry_after(response: &Response) -> u64 {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

fn ensure_ok(value: Value, method: &str) -> Result<Value> {
    if value.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(value);
    }
    match value.get("error").and_then(Value::as_str) {
        Some(code) => Err(AppError::SlackApi(code.to_string())),
        None => Err(AppError::InvalidResponse {
            context: method.to_string(),
        }),
    }
}

impl SlackApi for HttpSlackClient {
    fn history_page(
        &self,
        channel: &str,
        latest: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Value> {
        let mut params = vec![("channel", channel), ("limit", "200")];
        if let Some(latest) = latest {
            params.push(("latest", latest));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        self.call_get("conversations.history", &params)
    }

    fn replies_page(&self, channel: &str, ts: &str, cursor: Option<&str>) -> Result<Value> {
        let mut params = vec![("channel", channel), ("ts", ts), ("limit", "200")];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        self.call_get("conversations.replies", &params)
    }

    fn files_page(&self, ts_to: &str, page: u64) -> Result<Value> {
        let page = page.to_string();
        self.call_get("files.list", &[("ts_to", ts_to), ("page", page.as_str())])
    }

    fn user_real_name(&self, user: &str) -> Result<String> {
        let value = ensure_ok(self.call_get("users.info", &[("user", user)])?, "users.info")?;
        value
            .pointer("/user/real_name")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| AppError::InvalidResponse {
                context: format!("users.info {user}"),
            })
    }

    fn delete_message(&self, channel: &str, ts: &str) -> Result<()> {
        let body = serde_json::json!({"channel": channel, "ts": ts});
        ensure_ok(self.call_post("chat.delete", &body)?, "chat.delete")?;
        Ok(())
    }

    fn delete_file(&self, file: &str) -> Result<()> {
        let body = serde_json::json!({"file": file});
        ensure_ok(self.call_post("files.delete", &body)?, "files.delete")?;
        Ok(())
    }

    fn file_info(&self, file: &str) -> Result<Value> {
        ensure_ok(self.call_get("files.info", &[("file", file)])?, "files.info")
    }

    fn fetch_file(&self, url: &str) -> Result<Vec<u8>> {
        retry_rate_limited(&self.cancel, || {
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.token)
                .send()
                .map_err(|e| AppError::Http {
                    context: url.to_string(),
                    detail: e.to_string(),
                })?;
            if response.status().as_u16() == 429 {
                return Err(AppError::RateLimited {
                    retry_after_secs: retry_after(&response),
                });
            }
            if !response.status().is_success() {
                return Err(AppError::DownloadFailed {
                    file: url.to_string(),
                    status: response.status().as_u16(),
                });
            }
            let bytes = response.bytes().map_err(|e| AppError::Http {
                context: url.to_string(),
                detail: e.to_string(),
            })?;
            Ok(bytes.to_vec())
        })
    }
}

/// Channel history bounded by a `latest` cutoff; the cutoff only applies
/// to the first request, the cursor carries it afterwards.
pub struct HistoryFeed<'a, A: SlackApi + ?Sized> {
    pub api: &'a A,
    pub channel: &'a str,
    pub latest: String,
}

impl<A: SlackApi + ?Sized> PageFeed for HistoryFeed<'_, A> {
    fn fetch_first(&mut self) -> Result<Value> {
        self.api.history_page(self.channel, Some(&self.latest), None)
    }

    fn fetch_next(&mut self, token: &str) -> Result<Value> {
        self.api.history_page(self.channel, None, Some(token))
    }

    fn label(&self) -> String {
        format!("conversations.history {}", self.channel)
    }
}

/// Reply feed of one thread, keyed by the root's timestamp.
pub struct RepliesFeed<'a, A: SlackApi + ?Sized> {
    pub api: &'a A,
    pub channel: &'a str,
    pub ts: &'a str,
}

impl<A: SlackApi + ?Sized> PageFeed for RepliesFeed<'_, A> {
    fn fetch_first(&mut self) -> Result<Value> {
        self.api.replies_page(self.channel, self.ts, None)
    }

    fn fetch_next(&mut self, token: &str) -> Result<Value> {
        self.api.replies_page(self.channel, self.ts, Some(token))
    }

    fn label(&self) -> String {
        format!("conversations.replies {} {}", self.channel, self.ts)
    }
}

/// Workspace file listing. Pages by number, not cursor.
pub struct FilesFeed<'a, A: SlackApi + ?Sized> {
    pub api: &'a A,
    pub ts_to: String,
}

impl<A: SlackApi + ?Sized> PageFeed for FilesFeed<'_, A> {
    fn fetch_first(&mut self) -> Result<Value> {
        self.api.files_page(&self.ts_to, 1)
    }

    fn fetch_next(&mut self, token: &str) -> Result<Value> {
        let page: u64 = token.parse().map_err(|_| AppError::InvalidResponse {
            context: self.label(),
        })?;
        self.api.files_page(&self.ts_to, page)
    }

    fn items_key(&self) -> &'static str {
        "files"
    }

    fn next_token(&self, page: &Value) -> Option<String> {
        let current = page.pointer("/paging/page").and_then(Value::as_u64)?;
        let total = page.pointer("/paging/pages").and_then(Value::as_u64)?;
        (current < total).then(|| (current + 1).to_string())
    }

    fn label(&self) -> String {
        "files.list".to_string()
    }
}
