//! Where file bytes come from

use crate::error::DownloadError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// An open transfer
pub struct FetchResponse {
    /// True when the source honoured the requested offset; otherwise the
    /// stream starts at byte 0
    pub resumed: bool,
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

/// Opens byte streams for URLs
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Start reading `url` from `offset`
    async fn fetch(&self, url: &str, offset: u64) -> Result<FetchResponse, DownloadError>;
}

/// HTTP source backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFileSource {
    client: Client,
}

impl HttpFileSource {
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FileSource for HttpFileSource {
    async fn fetch(&self, url: &str, offset: u64) -> Result<FetchResponse, DownloadError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            debug!("Requesting {} from byte {}", url, offset);
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::ServerError {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(DownloadError::from))
            .boxed();

        Ok(FetchResponse {
            resumed,
            content_length,
            stream,
        })
    }
}
