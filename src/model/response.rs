// Fetch response carried from the fetcher to the processor.

use std::collections::HashMap;
use std::sync::OnceLock;

use encoding_rs::{Encoding, UTF_8};
use scraper::Html;
use serde::{Deserialize, Serialize};

/// Synthetic status recorded when the request could not even be built
/// (bad proxy, invalid header, client construction failure).
pub const STATUS_PRE_REQUEST_FAILURE: u16 = 99;

/// Synthetic status recorded when the request failed in flight after all
/// retry attempts (connect error, timeout, too many redirects).
pub const STATUS_REQUEST_FAILURE: u16 = 599;

/// Outcome of one fetch attempt, successful or not.
///
/// `content` travels base64-encoded on the wire. The decoded text is
/// memoized on first access; parsed documents are derived from it per call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Response {
    /// HTTP status, or one of the synthetic failure codes.
    pub status_code: u16,
    /// Final URL after redirects.
    pub url: String,
    /// URL the task originally asked for.
    pub orig_url: String,
    pub headers: HashMap<String, String>,
    /// Cookie pairs visible after the exchange.
    pub cookies: HashMap<String, String>,
    #[serde(with = "super::base64_bytes")]
    pub content: Vec<u8>,
    pub content_length: u64,
    /// Wall-clock duration of the exchange in milliseconds.
    pub time_ms: u64,
    /// Failure description for synthetic statuses, empty otherwise.
    pub err_message: String,
    /// Resolved character encoding label, lowercase.
    pub encoding: String,
    #[serde(skip)]
    text_cache: OnceLock<String>,
}

impl Response {
    /// Build a synthetic failure response for a URL that was never reached.
    pub fn failure(url: impl Into<String>, status_code: u16, err_message: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            status_code,
            orig_url: url.clone(),
            url,
            err_message: err_message.into(),
            ..Self::default()
        }
    }

    /// Build the empty 200 response answering a no-fetch `data://` task.
    pub fn no_fetch(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            status_code: 200,
            orig_url: url.clone(),
            url,
            ..Self::default()
        }
    }

    /// Whether the exchange ended in a 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Detect and pin the content encoding if not already resolved.
    ///
    /// Resolution order: `charset` from the Content-Type header, then a byte
    /// order mark, then a `charset=` hint in the first KiB of the body, then
    /// UTF-8.
    pub fn resolve_encoding(&mut self) {
        if self.encoding.is_empty() {
            let encoding = detect_encoding(self.header("content-type"), &self.content);
            self.encoding = encoding.name().to_ascii_lowercase();
        }
    }

    /// Body decoded to text, memoized after the first call.
    pub fn text(&self) -> &str {
        self.text_cache.get_or_init(|| {
            let encoding = Encoding::for_label(self.encoding.as_bytes())
                .unwrap_or_else(|| detect_encoding(self.header("content-type"), &self.content));
            let (text, _, _) = encoding.decode(&self.content);
            text.into_owned()
        })
    }

    /// Body parsed as an HTML document.
    ///
    /// Parsed fresh on every call; parsed documents hold non-`Send` interior
    /// state and cannot be cached on a value that crosses threads.
    pub fn document(&self) -> Html {
        Html::parse_document(self.text())
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(self.text())
    }
}

/// Pick the character encoding for a body.
fn detect_encoding(content_type: Option<&str>, body: &[u8]) -> &'static Encoding {
    if let Some(encoding) = content_type.and_then(charset_from_content_type) {
        return encoding;
    }
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return encoding;
    }
    if let Some(encoding) = charset_from_head(body) {
        return encoding;
    }
    UTF_8
}

fn charset_from_content_type(value: &str) -> Option<&'static Encoding> {
    let lower = value.to_ascii_lowercase();
    let rest = &lower[lower.find("charset=")? + "charset=".len()..];
    Encoding::for_label(extract_label(rest).as_bytes())
}

/// Scan the first KiB of the body for a `charset=` hint, covering both
/// `<meta charset="...">` and the http-equiv Content-Type form.
fn charset_from_head(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(1024)];
    let hay = String::from_utf8_lossy(head).to_ascii_lowercase();
    let rest = &hay[hay.find("charset=")? + "charset=".len()..];
    Encoding::for_label(extract_label(rest).as_bytes())
}

fn extract_label(rest: &str) -> String {
    rest.trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
