//! Media loading and image payload encoding.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    domain::{BlobSource, MediaRef},
    errors::Error,
    messaging::types::OutboundPayload,
    Result,
};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads media that does not need the account's help (inline, file, URL).
#[derive(Clone, Debug)]
pub struct BlobLoader {
    http: reqwest::Client,
}

impl BlobLoader {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self { http })
    }

    pub async fn load(&self, media: &MediaRef) -> Result<Vec<u8>> {
        match &media.source {
            BlobSource::Inline { data } => decode_base64(data),
            BlobSource::File { path } => Ok(tokio::fs::read(path).await?),
            BlobSource::Url { url } => {
                let resp = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| Error::Conversion(format!("download {url} failed: {e}")))?;
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| Error::Conversion(format!("download {url} failed: {e}")))?;
                Ok(bytes.to_vec())
            }
            BlobSource::Message { message_id } => Err(Error::Conversion(format!(
                "attachment of message {message_id} must be read through the account session"
            ))),
        }
    }
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Conversion(format!("invalid base64 payload: {e}")))
}

/// Wrap raw image bytes into a sendable payload.
pub fn image_payload(bytes: &[u8], media: &MediaRef) -> OutboundPayload {
    OutboundPayload::Image {
        base64: STANDARD.encode(bytes),
        name: media.name.clone(),
        mime: media.mime.clone(),
    }
}
