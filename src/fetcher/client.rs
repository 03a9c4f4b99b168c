//! Task-driven HTTP execution.
//!
//! [`execute`] turns a task's fetch parameters into one HTTP exchange and
//! always comes back with a [`Response`]: failures before the request leaves
//! (bad proxy, bad header, client construction) report the synthetic status
//! 99, transport failures after all retry attempts report 599. Either way
//! the task is stamped `Crawled` with a fresh `last_crawl`.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, COOKIE,
    SET_COOKIE,
};
use reqwest::{redirect, Client, Method, Proxy};
use thiserror::Error;
use url::Url;

use crate::model::{
    Response, Task, TaskStatus, STATUS_PRE_REQUEST_FAILURE, STATUS_REQUEST_FAILURE,
};

const DEFAULT_CONNECT_TIMEOUT: u64 = 30;
const DEFAULT_READ_TIMEOUT: u64 = 120;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_RETRY_TIMES: u32 = 3;
const DEFAULT_MAX_REDIRECTS: usize = 10;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP execution failures.
///
/// Everything except [`FetchError::Http`] happens before a request leaves
/// the process and maps to status 99; `Http` covers in-flight failures after
/// retries and maps to status 599.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid proxy {proxy}: {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("invalid header value for {0}")]
    InvalidHeaderValue(String),

    #[error("failed to build http client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    /// The synthetic status code this failure reports on the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Http(_) => STATUS_REQUEST_FAILURE,
            _ => STATUS_PRE_REQUEST_FAILURE,
        }
    }

    /// Whether a later attempt with the same task could succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

/// Run one fetch attempt for a task.
///
/// Never fails: errors become synthetic failure responses. The task is
/// stamped `Crawled` regardless of outcome, and the response comes back with
/// its encoding resolved and `time_ms` measured over the whole exchange,
/// retries included.
pub async fn execute(task: &mut Task) -> Response {
    let started = Instant::now();

    let mut response = match try_execute(task).await {
        Ok(response) => response,
        Err(error) => Response::failure(task.url.clone(), error.status_code(), error.to_string()),
    };

    response.time_ms = started.elapsed().as_millis() as u64;
    response.resolve_encoding();

    task.status = TaskStatus::Crawled;
    task.last_crawl = Utc::now().timestamp();

    response
}

async fn try_execute(task: &Task) -> Result<Response, FetchError> {
    let url = Url::parse(&task.url)?;
    let params = RequestParams::from_task(task)?;

    let jar = Arc::new(Jar::default());
    for (name, value) in &params.cookie_pairs {
        jar.add_cookie_str(&format!("{name}={value}"), &url);
    }

    let client = build_client(&params, &url, Arc::clone(&jar))?;
    let http_response = send_with_retries(&client, &params, &url).await?;
    read_response(task, http_response, jar.as_ref()).await
}

/// Everything derived from the task before the first attempt.
struct RequestParams {
    method: Method,
    headers: HeaderMap,
    /// Merged cookie pairs, header-parsed then overlaid by `fetch.cookies`.
    cookie_pairs: Vec<(String, String)>,
    body: Option<String>,
    proxy: Option<Proxy>,
    connect_timeout: Duration,
    read_timeout: Duration,
    /// Total attempts, at least 1.
    attempts: u32,
    max_redirects: Option<i32>,
}

impl RequestParams {
    fn from_task(task: &Task) -> Result<Self, FetchError> {
        let fetch = &task.fetch;

        // Cookie-named headers are parsed into pairs; explicit fetch.cookies
        // win over same-named pairs from the header.
        let mut headers = HeaderMap::new();
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        let mut raw_cookie_values: Vec<String> = Vec::new();

        for (name, value) in &fetch.headers {
            if name.eq_ignore_ascii_case("cookie") {
                if !value.is_empty() {
                    merged.extend(parse_cookie_pairs(value));
                    raw_cookie_values.push(value.clone());
                }
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeaderName(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidHeaderValue(name.clone()))?;
            headers.append(header_name, header_value);
        }

        for (name, value) in &fetch.cookies {
            merged.insert(name.clone(), value.clone());
        }

        let cookie_pairs: Vec<(String, String)> = merged.into_iter().collect();
        let cookie_header = if cookie_pairs.is_empty() {
            (!raw_cookie_values.is_empty()).then(|| raw_cookie_values.join("; "))
        } else {
            Some(
                cookie_pairs
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        if let Some(value) = cookie_header {
            let header_value = HeaderValue::from_str(&value)
                .map_err(|_| FetchError::InvalidHeaderValue("cookie".to_string()))?;
            headers.insert(COOKIE, header_value);
        }

        let mut body = None;
        let method = match fetch.method.to_uppercase().as_str() {
            "HEAD" => Method::HEAD,
            "POST" => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
                }
                body = Some(fetch.data.clone());
                Method::POST
            }
            // GET and anything unrecognized.
            _ => Method::GET,
        };

        if fetch.use_gzip && !headers.contains_key(ACCEPT_ENCODING) {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        }

        let proxy = if fetch.proxy.is_empty() {
            None
        } else {
            let proxy_url = if fetch.proxy.contains("://") {
                fetch.proxy.clone()
            } else {
                format!("http://{}", fetch.proxy)
            };
            Some(
                Proxy::all(&proxy_url).map_err(|source| FetchError::InvalidProxy {
                    proxy: proxy_url,
                    source,
                })?,
            )
        };

        let read_timeout = if fetch.timeout > 0 {
            fetch.timeout
        } else {
            DEFAULT_READ_TIMEOUT
        };
        let connect_timeout = if fetch.connect_timeout > 0 {
            fetch.connect_timeout
        } else {
            DEFAULT_CONNECT_TIMEOUT
        }
        .min(read_timeout);

        Ok(Self {
            method,
            headers,
            cookie_pairs,
            body,
            proxy,
            connect_timeout: Duration::from_secs(connect_timeout),
            read_timeout: Duration::from_secs(read_timeout),
            attempts: fetch.retries.unwrap_or(DEFAULT_RETRY_TIMES).max(1),
            max_redirects: fetch.max_redirects,
        })
    }
}

fn build_client(params: &RequestParams, url: &Url, jar: Arc<Jar>) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .connect_timeout(params.connect_timeout)
        .timeout(params.read_timeout)
        .redirect(redirect_policy(params.max_redirects))
        .cookie_provider(jar)
        // Compressed payloads are passed through and inflated manually, so
        // the Content-Encoding header survives into the response record.
        .gzip(false);

    if let Some(proxy) = &params.proxy {
        builder = builder.proxy(proxy.clone());
    }
    if url.scheme() == "https" {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(FetchError::ClientBuild)
}

/// Redirect handling: absent = cap of 10, 0 = unlimited, negative = refuse
/// the first hop.
fn redirect_policy(max_redirects: Option<i32>) -> redirect::Policy {
    match max_redirects {
        None => redirect::Policy::limited(DEFAULT_MAX_REDIRECTS),
        Some(0) => redirect::Policy::custom(|attempt| attempt.follow()),
        Some(n) if n > 0 => redirect::Policy::limited(n as usize),
        Some(_) => redirect::Policy::custom(|attempt| attempt.error("redirects not allowed")),
    }
}

/// Send the request, rebuilding it fresh for every attempt. Only transport
/// errors retry; any HTTP status is a completed exchange.
async fn send_with_retries(
    client: &Client,
    params: &RequestParams,
    url: &Url,
) -> Result<reqwest::Response, FetchError> {
    let mut attempt = 0;
    loop {
        attempt += 1;

        let mut request = client
            .request(params.method.clone(), url.clone())
            .headers(params.headers.clone());
        if let Some(body) = &params.body {
            request = request.body(body.clone());
        }

        match request.send().await {
            Ok(response) => return Ok(response),
            Err(error) if attempt < params.attempts => {
                tracing::debug!(
                    url = %url,
                    attempt,
                    error = %error,
                    "fetch attempt failed, retrying"
                );
                tokio::time::sleep(DEFAULT_RETRY_INTERVAL).await;
            }
            Err(error) => return Err(FetchError::Http(error)),
        }
    }
}

async fn read_response(
    task: &Task,
    http_response: reqwest::Response,
    jar: &Jar,
) -> Result<Response, FetchError> {
    let status_code = http_response.status().as_u16();
    let final_url = http_response.url().clone();

    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in http_response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let set_cookie_headers: Vec<String> = http_response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok().map(str::to_owned))
        .collect();

    let content_encoding = http_response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    // A body read failure after this many retries is a transport failure.
    let body = http_response.bytes().await?;
    let content = decompress(content_encoding.as_deref(), &body);

    // Cookie snapshot: jar state for the original and final URLs, then the
    // response's own Set-Cookie pairs on top.
    let mut cookies: HashMap<String, String> = HashMap::new();
    if let Ok(url) = Url::parse(&task.url) {
        collect_jar_cookies(jar, &url, &mut cookies);
    }
    collect_jar_cookies(jar, &final_url, &mut cookies);
    for raw in set_cookie_headers {
        if let Some(pair) = raw.split(';').next() {
            if let Some((name, value)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }

    let mut response = Response::default();
    response.status_code = status_code;
    response.url = final_url.to_string();
    response.orig_url = task.url.clone();
    response.headers = headers;
    response.cookies = cookies;
    response.content_length = content.len() as u64;
    response.content = content;
    Ok(response)
}

fn collect_jar_cookies(jar: &Jar, url: &Url, into: &mut HashMap<String, String>) {
    if let Some(header) = jar.cookies(url) {
        if let Ok(value) = header.to_str() {
            into.extend(parse_cookie_pairs(value));
        }
    }
}

/// Parse `name=value; name2=value2` pairs, dropping malformed segments.
fn parse_cookie_pairs(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|part| {
            let (name, val) = part.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), val.trim().to_string()))
        })
        .collect()
}

/// Inflate a compressed payload. Unknown encodings and undecodable payloads
/// pass through untouched.
fn decompress(encoding: Option<&str>, body: &[u8]) -> Vec<u8> {
    let decoded = match encoding {
        Some(e) if e.eq_ignore_ascii_case("gzip") => {
            let mut out = Vec::new();
            GzDecoder::new(body).read_to_end(&mut out).map(|_| out)
        }
        Some(e) if e.eq_ignore_ascii_case("deflate") => {
            let mut out = Vec::new();
            DeflateDecoder::new(body).read_to_end(&mut out).map(|_| out)
        }
        Some(e) if e.eq_ignore_ascii_case("zlib") => {
            let mut out = Vec::new();
            ZlibDecoder::new(body).read_to_end(&mut out).map(|_| out)
        }
        _ => return body.to_vec(),
    };
    match decoded {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::debug!(error = %error, "decompression failed, keeping raw payload");
            body.to_vec()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
