//! Destination lookup by logical name.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{domain::Contact, messaging::types::OutboundPayload, Result};

/// A live group-like target.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Logical name the destination was resolved from.
    fn name(&self) -> &str;

    async fn send(&self, payload: &OutboundPayload) -> Result<()>;

    async fn add_member(&self, contact: &Contact) -> Result<()>;
}

/// Resolves destination names to live handles.
///
/// `Ok(None)` is the ordinary "not found" answer. Lookups must not have side
/// effects on the account.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<Arc<dyn Destination>>>;
}
