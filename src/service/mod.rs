// src/service/mod.rs
//! Remote interaction service boundary.

pub mod fixture;
pub mod http;

use anyhow::Result;

use crate::model::{ContactId, InteractionRecord, InteractionType};

pub use fixture::{FixtureService, ServiceCall};
pub use http::HttpInteractionService;

#[async_trait::async_trait]
pub trait InteractionService: Send + Sync {
    /// Contacts of one type. Both bounds absent: the service's default recent window.
    /// Bounds use `model::SERVICE_TS_FORMAT`.
    async fn get_contacts(
        &self,
        interaction_type: InteractionType,
        start_time: Option<&str>,
        end_time: Option<&str>,
    ) -> Result<Vec<InteractionRecord>>;

    /// Transcripts for the given contacts. May return fewer than requested.
    async fn get_recordings(&self, contact_ids: &[ContactId]) -> Result<Vec<InteractionRecord>>;

    fn name(&self) -> &'static str;
}
