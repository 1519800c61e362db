//! Request signing for the modian API gateway.
//!
//! The signature is a keyed MD5 over the host and path, the app key, the
//! request time, the sorted query and an inner MD5 of the sorted body.
//! Everything here is pure; `mt` is supplied by the caller.

use chrono::Utc;
use md5::{Digest, Md5};
use reqwest::Method;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Display;
use url::Url;

use fundwatch_fetch::FetchError;

/// Base URL prepended to relative API paths.
pub const API_BASE_URL: &str = "https://apim.modian.com";

/// Application key embedded in every signature.
pub const APP_KEY: &str = "MzgxOTg3ZDMZTgxO";

/// Endpoints whose parameter values are percent-encoded before signing.
const QUOTED_PARAM_PATHS: &[&str] = &["/search/all"];

/// Components of one signed request. Built per call, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedRequest {
    /// `scheme://host/path`.
    pub host_all: String,
    /// `host/path`, as signed.
    pub hosts: String,
    /// Request time in unix seconds.
    pub mt: i64,
    /// Sorted query string.
    pub query: String,
    /// Sorted body string; empty for GET.
    pub body: String,
    /// MD5 of the unescaped body.
    pub inner_hash: String,
    /// Final signature.
    pub sign: String,
    /// URL to send the request to.
    pub request_url: String,
}

/// Current unix time in seconds.
pub fn current_mt() -> i64 {
    Utc::now().timestamp()
}

/// Lowercase hex MD5 of a string.
pub fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Signs a request.
///
/// GET parameters are merged into the query; for other methods they form
/// the body. Pairs are rendered `k=v` and sorted, so insertion order never
/// affects the result.
pub fn sign<I, K, V>(
    url: &str,
    method: &Method,
    params: I,
    app_key: &str,
    mt: i64,
) -> Result<SignedRequest, FetchError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Display,
    V: Display,
{
    let full_url = if url.starts_with("http") {
        Cow::Borrowed(url)
    } else {
        Cow::Owned(format!("{API_BASE_URL}{url}"))
    };

    let parsed = Url::parse(&full_url)
        .map_err(|e| FetchError::Validation(format!("invalid URL '{full_url}': {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| FetchError::Validation(format!("URL has no host: {full_url}")))?;
    let netloc = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let host_all = format!("{}://{netloc}{}", parsed.scheme(), parsed.path());
    let hosts = host_all.replace("http://", "").replace("https://", "");

    let quote_values = QUOTED_PARAM_PATHS.iter().any(|p| url.contains(p));
    let mut pairs: Vec<String> = params
        .into_iter()
        .map(|(k, v)| {
            let v = v.to_string();
            if quote_values {
                format!("{k}={}", quote(&v))
            } else {
                format!("{k}={v}")
            }
        })
        .collect();
    pairs.sort();
    let props = pairs.join("&");

    let is_get = *method == Method::GET;
    let mut query = parsed.query().unwrap_or_default().to_string();
    if is_get && !props.is_empty() {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&props);
    }
    if !query.is_empty() {
        let mut parts: Vec<&str> = query.split('&').collect();
        parts.sort_unstable();
        query = parts.join("&");
    }

    let body = if is_get { String::new() } else { props };
    let inner_hash = md5_hex(&unescape(&body));
    let sign = md5_hex(&format!("{hosts}{app_key}{mt}{}{inner_hash}", unescape(&query)));

    let request_url = if query.is_empty() {
        host_all.clone()
    } else {
        format!("{host_all}?{query}")
    };

    Ok(SignedRequest {
        host_all,
        hosts,
        mt,
        query,
        body,
        inner_hash,
        sign,
        request_url,
    })
}

/// Percent-decodes a string, replacing invalid UTF-8.
fn unescape(input: &str) -> String {
    match urlencoding::decode(input) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned(),
    }
}

/// Percent-encodes a value, leaving `/` intact.
fn quote(value: &str) -> String {
    urlencoding::encode(value).replace("%2F", "/")
}
