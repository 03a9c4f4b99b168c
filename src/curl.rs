//! Build tasks from copied `curl` command lines.
//!
//! Browsers export requests as `curl` invocations ("Copy as cURL"); parsing
//! those is the quickest way to seed a crawl with a realistic task. Only the
//! flags such exports actually use are understood: `-H/--header`,
//! `-d/--data`, `--data-binary`, `-X/--request` and `--compressed`. The
//! leading command word is taken on faith and never validated.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::{Task, TaskParams};

/// Failures while interpreting a curl command line.
#[derive(Debug, Error)]
pub enum CurlError {
    #[error("curl command has no url")]
    MissingUrl,

    #[error("unknown curl option {0}")]
    UnknownOption(String),
}

/// Build an `Init` task from a curl command line.
pub fn task_from_curl(command: &str) -> Result<Task, CurlError> {
    let (url, params) = parse_curl(command)?;
    Ok(Task::with_params(url, &params))
}

/// Extract the first URL and the request parameters from a curl command.
///
/// Unsupported flags are an error when they carry a value; a dangling
/// option at the end of the line is ignored, as are header tokens without
/// a colon. Extra URLs after the first are dropped.
pub fn parse_curl(command: &str) -> Result<(String, TaskParams), CurlError> {
    // Multi-line exports are joined before tokenizing.
    let line = command.replace('\n', "");

    let mut params = TaskParams::default();
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut url: Option<String> = None;
    let mut command_seen = false;
    let mut pending: Option<&str> = None;

    for part in split_parts(&line) {
        if !command_seen {
            command_seen = true;
        } else if let Some(option) = pending.take() {
            match option {
                "-H" | "--header" => {
                    if let Some((name, value)) = part.split_once(':') {
                        if !name.is_empty() {
                            headers.insert(
                                name.trim_matches(' ').to_string(),
                                value.trim_matches(' ').to_string(),
                            );
                        }
                    }
                }
                "-d" | "--data" => params.data = Some(part.to_string()),
                "--data-binary" => {
                    let body = part.strip_prefix('$').unwrap_or(part);
                    params.data = Some(body.to_string());
                }
                "-X" | "--request" => params.method = Some(part.to_uppercase()),
                other => return Err(CurlError::UnknownOption(other.to_string())),
            }
        } else if !part.starts_with('-') {
            if url.is_none() {
                url = Some(part.to_string());
            }
        } else if part == "--compressed" {
            params.use_gzip = true;
        } else {
            pending = Some(part);
        }
    }

    let url = url.ok_or(CurlError::MissingUrl)?;
    if !headers.is_empty() {
        params.headers = Some(headers);
    }
    Ok((url, params))
}

/// Split a command line into tokens, honoring single and double quotes.
///
/// A space inside quotes is content; tabs and carriage returns always end
/// the current token. Quote characters themselves never reach the output,
/// and an unterminated quote runs to the end of the line rather than
/// erroring.
fn split_parts(command: &str) -> Vec<&str> {
    let bytes = command.as_bytes();
    let mut parts = Vec::new();

    let mut start = 0usize;
    let mut last_was_white = false;
    let mut in_quote = false;
    let mut quote = 0u8;

    // All delimiters are ASCII, so every slice boundary below is a char
    // boundary even in the middle of multi-byte content.
    for (i, &c) in bytes.iter().enumerate() {
        let is_white = matches!(c, b' ' | b'\t' | b'\r' | b'\n');

        if !is_white {
            if last_was_white {
                start = i;
            }
            last_was_white = false;

            if c == b'\'' || c == b'"' {
                if !in_quote {
                    in_quote = true;
                    quote = c;
                    start = i + 1;
                } else if c == quote {
                    in_quote = false;
                    if i > start {
                        parts.push(&command[start..i]);
                    }
                    start = i + 1;
                }
            }
            continue;
        }

        if c == b' ' && in_quote {
            continue;
        }
        if !last_was_white {
            if i > start {
                parts.push(&command[start..i]);
            }
            last_was_white = true;
        }
    }

    // Flush the token still open at the end of the line.
    if !last_was_white && bytes.len() > start {
        parts.push(&command[start..]);
    }

    parts
}

// ============================================================================
// Tests
// ============================================================================
