// Callback output carried from the processor to the result worker.

use serde::{Deserialize, Serialize};

use super::Response;

/// What a project callback extracted from a fetched page.
///
/// `parsed` holds arbitrary callback output (typically JSON) and travels
/// base64-encoded on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlResult {
    /// 0 on success, otherwise the response status that ended the exchange.
    pub err_code: i32,
    pub err_message: String,
    /// Final URL after redirects.
    pub url: String,
    /// URL the task originally asked for.
    pub orig_url: String,
    /// Decoded page text.
    pub html: String,
    /// Ask downstream consumers to archive a rendering of the page.
    pub need_snapshot: bool,
    #[serde(with = "super::base64_bytes")]
    pub parsed: Vec<u8>,
}

impl CrawlResult {
    /// Seed a result from a fetch response, before the callback fills in
    /// `parsed` and `need_snapshot`.
    pub fn from_response(response: &Response) -> Self {
        Self {
            err_code: if response.is_ok() {
                0
            } else {
                i32::from(response.status_code)
            },
            err_message: response.err_message.clone(),
            url: response.url.clone(),
            orig_url: response.orig_url.clone(),
            html: response.text().to_owned(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
