use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::{Error, Result};

/// Streaming response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// What a fetch produced before the body has been consumed.
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Length of the body that follows. For ranged responses this is the
    /// remaining byte count, not the full resource size.
    pub total_bytes: Option<u64>,
    pub body: ByteStream,
}

/// Fetches a URL, optionally starting at a byte offset.
///
/// The downloader drives retries, resumption and validation; a transport
/// only turns one request into one response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, offset: Option<u64>) -> Result<FetchResponse>;
}

/// [`Transport`] over a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().use_rustls_tls().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, offset: Option<u64>) -> Result<FetchResponse> {
        let mut request = self.client.get(url);
        if let Some(offset) = offset {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let total_bytes = response.content_length();
        let body: ByteStream = Box::pin(response.bytes_stream().map(|r| r.map_err(Error::from)));

        Ok(FetchResponse {
            status,
            total_bytes,
            body,
        })
    }
}
