//! Collaborator interfaces the core consumes (§6) but does not implement.
//!
//! The manifest core never calls an HTTP client directly: every parser entry
//! point takes `&dyn Fetcher`. This mirrors the DASH/HLS non-goal in §1 ("HTTP
//! fetch implementation" is external) while still letting a host plug in
//! whatever networking stack it already uses (or, for tests, an in-memory
//! fake).

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ManifestError, Result};
use crate::scheduler::Op;

/// The response to a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub bytes: bytes::Bytes,
    pub final_uri: String,
    pub headers: HashMap<String, String>,
}

/// Retry/backoff parameters a host may apply to a fetch. The core only reads
/// these when constructing a request; it never retries on the host's behalf.
#[derive(Debug, Clone)]
pub struct RetryParams {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryParams {
    fn default() -> Self {
        RetryParams {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// The networking collaborator. All methods are abortable: a `Fetcher`
/// implementation is expected to honor task cancellation promptly.
pub trait Fetcher: Send + Sync {
    /// Fetch one of `uris` (in order, until one succeeds), optionally
    /// restricted to `byte_range` (inclusive start/end).
    fn fetch<'a>(
        &'a self,
        uris: &'a [String],
        byte_range: Option<(u64, Option<u64>)>,
        retry: &'a RetryParams,
    ) -> Op<FetchResponse>;

    /// Fetch an init segment's bytes.
    fn fetch_init_segment<'a>(
        &'a self,
        uris: &'a [String],
        start: u64,
        end: Option<u64>,
    ) -> Op<bytes::Bytes>;
}

/// Monotonic time source, so parsers never call the system clock directly
/// (and so tests can supply a fixed clock).
pub trait Clock: Send + Sync {
    fn now_s(&self) -> f64;
}

/// The real-time clock, backed by `std::time::SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_s(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// A fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub f64);

impl Clock for FixedClock {
    fn now_s(&self) -> f64 {
        self.0
    }
}

#[cfg(feature = "fetch-reqwest")]
pub mod reqwest_fetcher {
    //! A ready-made [`Fetcher`] for applications that don't supply their own
    //! HTTP collaborator, built the way `dash-mpd-rs`'s `fetch` feature wires
    //! up `reqwest` plus exponential backoff.

    use super::*;
    use backon::{ExponentialBuilder, Retryable};
    use tokio_util::sync::CancellationToken;

    pub struct ReqwestFetcher {
        client: reqwest::Client,
    }

    impl ReqwestFetcher {
        pub fn new(client: reqwest::Client) -> Self {
            ReqwestFetcher { client }
        }
    }

    impl Default for ReqwestFetcher {
        fn default() -> Self {
            ReqwestFetcher {
                client: reqwest::Client::builder()
                    .build()
                    .expect("building default reqwest client"),
            }
        }
    }

    fn range_header(byte_range: Option<(u64, Option<u64>)>) -> Option<String> {
        byte_range.map(|(start, end)| match end {
            Some(e) => format!("bytes={start}-{e}"),
            None => format!("bytes={start}-"),
        })
    }

    impl Fetcher for ReqwestFetcher {
        fn fetch<'a>(
            &'a self,
            uris: &'a [String],
            byte_range: Option<(u64, Option<u64>)>,
            retry: &'a RetryParams,
        ) -> Op<FetchResponse> {
            let token = CancellationToken::new();
            let client = self.client.clone();
            let uris = uris.to_vec();
            let retry = retry.clone();
            Op::new(token, async move {
                let range = range_header(byte_range);
                let mut last_err = None;
                for uri in &uris {
                    let attempt = || {
                        let mut req = client.get(uri);
                        if let Some(r) = &range {
                            req = req.header(reqwest::header::RANGE, r.clone());
                        }
                        req.send()
                    };
                    let backoff = ExponentialBuilder::default()
                        .with_min_delay(retry.base_delay)
                        .with_max_times(retry.max_attempts as usize);
                    match attempt.retry(backoff).await {
                        Ok(resp) => {
                            let status = resp.status();
                            if !status.is_success() {
                                last_err = Some(ManifestError::BadHttpStatus(status.as_u16()));
                                continue;
                            }
                            let final_uri = resp.url().to_string();
                            let mut headers = HashMap::new();
                            for (k, v) in resp.headers().iter() {
                                if let Ok(v) = v.to_str() {
                                    headers.insert(k.to_string(), v.to_string());
                                }
                            }
                            let bytes = resp
                                .bytes()
                                .await
                                .map_err(|e| ManifestError::HttpError(e.to_string()))?;
                            return Ok(FetchResponse {
                                bytes,
                                final_uri,
                                headers,
                            });
                        }
                        Err(e) => last_err = Some(ManifestError::HttpError(e.to_string())),
                    }
                }
                Err(last_err.unwrap_or(ManifestError::HttpError("no URIs supplied".into())))
            })
        }

        fn fetch_init_segment<'a>(
            &'a self,
            uris: &'a [String],
            start: u64,
            end: Option<u64>,
        ) -> Op<bytes::Bytes> {
            let token = CancellationToken::new();
            let client = self.client.clone();
            let uris = uris.to_vec();
            Op::new(token, async move {
                let range = range_header(Some((start, end))).unwrap();
                for uri in &uris {
                    let resp = client
                        .get(uri)
                        .header(reqwest::header::RANGE, range.clone())
                        .send()
                        .await;
                    if let Ok(resp) = resp {
                        if resp.status().is_success() {
                            return resp
                                .bytes()
                                .await
                                .map_err(|e| ManifestError::HttpError(e.to_string()));
                        }
                    }
                }
                Err(ManifestError::HttpError(format!(
                    "failed to fetch init segment from {uris:?}"
                )))
            })
        }
    }
}
