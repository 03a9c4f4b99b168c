//! Core data model for the crawl pipeline
//!
//! Everything that crosses a queue boundary lives here: the [`Task`] record
//! with its schedule/fetch/process sub-records, the [`Response`] produced by
//! the fetcher, the [`CrawlResult`] produced by project callbacks, and the
//! message envelopes wrapping them.
//!
//! Field names are a wire contract shared by every stage process; changing
//! them breaks mixed-version deployments.

pub mod message;
pub mod response;
pub mod result;
pub mod task;

pub use message::{FetchMessage, ProcessMessage, ResultMessage, StatusMessage};
pub use response::{Response, STATUS_PRE_REQUEST_FAILURE, STATUS_REQUEST_FAILURE};
pub use result::CrawlResult;
pub use task::{Task, TaskFetch, TaskParams, TaskProcess, TaskSchedule, TaskStatus};
pub use task::{DATA_SCHEME, DEFAULT_PRIORITY};

/// Serde adapter for byte fields carried as base64 strings on the wire.
///
/// Accepts `null` on input for compatibility with producers that serialize
/// an absent body that way.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
