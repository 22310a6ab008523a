use std::collections::HashSet;

use async_trait::async_trait;

use crate::models::{CampaignSummary, DedupKey, DonationRecord};

mod csv_store;
mod db;

pub use csv_store::CsvStore;
pub use db::PgStore;

/// Durable storage for harvested donations and campaign summaries.
///
/// Donations are append-only and keep insertion order; summaries are keyed
/// by campaign and replaced on every harvest. Implementations assume a
/// single writer for the duration of a run.
#[async_trait]
pub trait DonationStore: Send + Sync {
    async fn append_donation(&self, record: &DonationRecord) -> anyhow::Result<()>;

    /// Dedup keys of every donation already stored for `campaign_id`.
    async fn existing_keys(
        &self,
        campaign_id: &str,
        comment_prefix_len: usize,
    ) -> anyhow::Result<HashSet<DedupKey>>;

    async fn upsert_campaign(&self, summary: &CampaignSummary) -> anyhow::Result<()>;

    async fn harvested_campaigns(&self) -> anyhow::Result<HashSet<String>>;

    /// All stored donations in insertion order, optionally for one campaign.
    async fn load_donations(&self, campaign_id: Option<&str>)
        -> anyhow::Result<Vec<DonationRecord>>;

    async fn load_campaigns(&self) -> anyhow::Result<Vec<CampaignSummary>>;
}
