//! Feed retrieval over HTTP.
//!
//! [`HttpClient`] is the transport seam; [`fetch_feed`] layers the
//! availability policy on top of it: a network error, a non-2xx status, and
//! an undecodable payload all collapse into the single "feed unavailable"
//! outcome, so one bad feed contributes zero entities without taking down
//! the cycle or the other feed.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::gtfs_rt::FeedMessage;
use crate::parser::parse_feed;

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response>;
}

/// Plain `reqwest`-backed transport.
#[derive(Default)]
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        Self(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}

/// Issues a GET with the given per-request timeout and returns the body.
///
/// # Errors
///
/// Fails on connection errors, timeout, or a non-2xx status.
pub async fn fetch_bytes<C: HttpClient>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Result<Bytes> {
    let mut req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);
    *req.timeout_mut() = Some(timeout);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?)
}

/// Fetches and decodes one GTFS-RT feed, collapsing every failure mode into
/// `None`: the feed is unavailable this cycle.
pub async fn fetch_feed<C: HttpClient>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Option<FeedMessage> {
    let bytes = match fetch_bytes(client, url, timeout).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(url, error = %e, "Feed unavailable, continuing with zero entities");
            return None;
        }
    };

    match parse_feed(&bytes) {
        Ok(feed) => Some(feed),
        Err(e) => {
            warn!(url, error = %e, "Feed bytes undecodable, continuing with zero entities");
            None
        }
    }
}
