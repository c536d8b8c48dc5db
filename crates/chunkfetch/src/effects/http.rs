use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

/// A boxed stream type for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Status line, the headers the engine inspects, and the streaming body of a GET.
pub struct HttpResponse<E> {
    pub status:         u16,
    pub content_length: Option<u64>,
    pub accept_ranges:  Option<String>,
    pub content_range:  Option<String>,
    pub body:           BoxStream<'static, std::result::Result<Bytes, E>>,
}

impl<E> fmt::Debug for HttpResponse<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("accept_ranges", &self.accept_ranges)
            .field("content_range", &self.content_range)
            .field("body", &"{ ... }")
            .finish()
    }
}

/// Asynchronous HTTP client abstraction.
///
/// Implementations follow redirects themselves and must not turn non-2xx
/// statuses into errors: the engine reads `status` to tell a 404 from a 206.
///
/// # Implementations
///
/// - [`ReqwestClient`]: production implementation using `reqwest`
/// - in-memory mocks in tests
pub trait HttpClient: Send + Sync {
    /// Error type for HTTP operations.
    type Error: std::error::Error + Send + 'static;

    /// Query the Content-Length without downloading the body.
    ///
    /// `Ok(None)` when the header is absent.
    fn head(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> impl Future<Output = std::result::Result<Option<u64>, Self::Error>> + Send;

    /// Issue a GET, with `Range: bytes=<start>-<end>` when `range` is set.
    fn get(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
        headers: &[(String, String)],
    ) -> impl Future<Output = std::result::Result<HttpResponse<Self::Error>, Self::Error>> + Send;
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};

    use super::*;
    use crate::error::{FetchError, Result};

    /// Production HTTP client implementation using reqwest.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Create a new ReqwestClient with default configuration.
        pub fn new() -> Result<Self> {
            let client = reqwest::Client::builder()
                .user_agent(concat!("chunkfetch/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(FetchError::network)?;
            Ok(Self { client })
        }

        /// Wrap an already configured client (proxies, TLS roots, ...).
        pub fn with_client(client: reqwest::Client) -> Self { Self { client } }
    }

    fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
        header_str(headers, name).and_then(|s| s.trim().parse().ok())
    }

    impl HttpClient for ReqwestClient {
        type Error = reqwest::Error;

        async fn head(
            &self,
            url: &str,
            headers: &[(String, String)],
        ) -> std::result::Result<Option<u64>, Self::Error> {
            let mut request = self.client.head(url);
            for (key, value) in headers {
                request = request.header(key, value);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Ok(None);
            }
            // reqwest reports a zero body length for HEAD, so read the header.
            Ok(header_u64(response.headers(), CONTENT_LENGTH))
        }

        async fn get(
            &self,
            url: &str,
            range: Option<(u64, u64)>,
            headers: &[(String, String)],
        ) -> std::result::Result<HttpResponse<Self::Error>, Self::Error> {
            let mut request = self.client.get(url);
            for (key, value) in headers {
                request = request.header(key, value);
            }
            if let Some((start, end)) = range {
                request = request.header(RANGE, format!("bytes={start}-{end}"));
            }

            let response = request.send().await?;
            let map = response.headers();
            let accept_ranges = header_str(map, ACCEPT_RANGES);
            let content_range = header_str(map, CONTENT_RANGE);
            let content_length = header_u64(map, CONTENT_LENGTH).or(response.content_length());

            Ok(HttpResponse {
                status: response.status().as_u16(),
                content_length,
                accept_ranges,
                content_range,
                body: Box::pin(response.bytes_stream()),
            })
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestClient;
