use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::DonationStore;
use crate::models::{CampaignSummary, DedupKey, DonationRecord};

/// Postgres-backed store. Donations keep insertion order through the
/// `seq` column; campaign summaries upsert on `campaign_url`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(PgStore { pool })
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn donation_from_row(row: &PgRow) -> DonationRecord {
    DonationRecord {
        campaign_id: row.get("campaign_url"),
        donor_name: row.get("donor_name"),
        amount: row.get("amount"),
        relative_time: row.get("donation_relative_time"),
        comment: row.get("comment"),
        observed_at: row.get("scraped_at"),
    }
}

#[async_trait]
impl DonationStore for PgStore {
    async fn append_donation(&self, record: &DonationRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO donor_harvest.donations
            (id, campaign_url, donor_name, amount, donation_relative_time, comment, scraped_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.campaign_id)
        .bind(&record.donor_name)
        .bind(&record.amount)
        .bind(&record.relative_time)
        .bind(&record.comment)
        .bind(record.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn existing_keys(
        &self,
        campaign_id: &str,
        comment_prefix_len: usize,
    ) -> anyhow::Result<HashSet<DedupKey>> {
        Ok(self
            .load_donations(Some(campaign_id))
            .await?
            .iter()
            .map(|record| record.dedup_key(comment_prefix_len))
            .collect())
    }

    async fn upsert_campaign(&self, summary: &CampaignSummary) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO donor_harvest.campaigns
            (campaign_url, total_donors_count, amount_raised, campaign_creator, funds_receiver, scraped_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (campaign_url) DO UPDATE
            SET total_donors_count = EXCLUDED.total_donors_count,
                amount_raised = EXCLUDED.amount_raised,
                campaign_creator = EXCLUDED.campaign_creator,
                funds_receiver = EXCLUDED.funds_receiver,
                scraped_at = EXCLUDED.scraped_at
            "#,
        )
        .bind(&summary.campaign_id)
        .bind(&summary.total_donors_count)
        .bind(&summary.amount_raised)
        .bind(&summary.campaign_creator)
        .bind(&summary.funds_receiver)
        .bind(summary.scraped_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn harvested_campaigns(&self) -> anyhow::Result<HashSet<String>> {
        let rows = sqlx::query("SELECT campaign_url FROM donor_harvest.campaigns")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("campaign_url")).collect())
    }

    async fn load_donations(
        &self,
        campaign_id: Option<&str>,
    ) -> anyhow::Result<Vec<DonationRecord>> {
        let mut query = String::from(
            "SELECT campaign_url, donor_name, amount, donation_relative_time, comment, scraped_at \
             FROM donor_harvest.donations",
        );
        if campaign_id.is_some() {
            query.push_str(" WHERE campaign_url = $1");
        }
        query.push_str(" ORDER BY seq");

        let mut rows = sqlx::query(&query);
        if let Some(value) = campaign_id {
            rows = rows.bind(value);
        }

        let records = rows.fetch_all(&self.pool).await?;
        Ok(records.iter().map(donation_from_row).collect())
    }

    async fn load_campaigns(&self) -> anyhow::Result<Vec<CampaignSummary>> {
        let rows = sqlx::query(
            "SELECT campaign_url, total_donors_count, amount_raised, campaign_creator, \
             funds_receiver, scraped_at FROM donor_harvest.campaigns ORDER BY campaign_url",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(CampaignSummary {
                campaign_id: row.get("campaign_url"),
                total_donors_count: row.get("total_donors_count"),
                amount_raised: row.get("amount_raised"),
                campaign_creator: row.get("campaign_creator"),
                funds_receiver: row.get("funds_receiver"),
                scraped_at: row.get("scraped_at"),
            });
        }
        Ok(campaigns)
    }
}
