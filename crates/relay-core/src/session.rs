//! Explicit account session handle shared by the dispatcher and both workflows.

use async_trait::async_trait;

use crate::{admission::ConnectionRequest, directory::ChannelDirectory, domain::MediaRef, Result};

/// Operations the relay needs from the logged-in account.
#[async_trait]
pub trait AccountSession: ChannelDirectory {
    /// Accept an incoming connection request.
    async fn accept(&self, request: &ConnectionRequest) -> Result<()>;

    /// Load the bytes of a media attachment.
    async fn read_media(&self, media: &MediaRef) -> Result<Vec<u8>>;
}
