use std::collections::HashSet;

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use tokio::time::sleep;

use crate::config::{HarvestConfig, SummaryField};
use crate::extract::Extractor;
use crate::models::CampaignSummary;
use crate::page::{PageSource, RevealOutcome};
use crate::store::DonationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of consecutive cycles produced nothing new.
    Exhausted,
    RevealUnavailable,
    RevealFailed,
    /// The donation list is not on the page; there is nothing to harvest.
    ContainerMissing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestReport {
    pub campaign_id: String,
    pub cycles: u32,
    pub reveals: u32,
    /// Entries seen for the first time this session, written or not.
    pub processed: usize,
    pub written: usize,
    pub skipped_known: usize,
    pub stop_reason: StopReason,
    pub summary: CampaignSummary,
}

/// Drives the reveal/extract/dedup loop for one campaign at a time.
pub struct Harvester<'a> {
    store: &'a dyn DonationStore,
    config: &'a HarvestConfig,
    extractor: Extractor,
}

impl<'a> Harvester<'a> {
    pub fn new(store: &'a dyn DonationStore, config: &'a HarvestConfig) -> anyhow::Result<Self> {
        Ok(Harvester {
            store,
            config,
            extractor: Extractor::new(&config.layout)?,
        })
    }

    pub async fn harvest<P: PageSource + ?Sized>(
        &self,
        page: &P,
        campaign_id: &str,
        allow_rewrite: bool,
    ) -> anyhow::Result<HarvestReport> {
        self.harvest_at(page, campaign_id, allow_rewrite, Local::now().naive_local())
            .await
    }

    /// Harvests `campaign_id`, stamping every record with `observed_at`.
    ///
    /// The set of known dedup keys is rebuilt from the store first, so an
    /// interrupted run can be repeated without writing duplicates. With
    /// `allow_rewrite` the set also absorbs keys written during this run.
    pub async fn harvest_at<P: PageSource + ?Sized>(
        &self,
        page: &P,
        campaign_id: &str,
        allow_rewrite: bool,
        observed_at: NaiveDateTime,
    ) -> anyhow::Result<HarvestReport> {
        let prefix_len = self.config.comment_prefix_len;
        let mut known = self
            .store
            .existing_keys(campaign_id, prefix_len)
            .await
            .context("failed to load existing donation keys")?;
        if !known.is_empty() {
            tracing::info!(
                campaign = campaign_id,
                "found {} existing donation entries",
                known.len()
            );
        }

        let summary = self.collect_summary(page, campaign_id, observed_at).await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut zero_yield = 0u32;
        let mut cycles = 0u32;
        let mut reveals = 0u32;
        let mut written = 0usize;
        let mut skipped_known = 0usize;

        let stop_reason = loop {
            sleep(self.config.settle_delay).await;
            cycles += 1;

            let markup = page
                .current_markup()
                .await
                .context("failed to read page markup")?;
            let Some(entries) = self.extractor.donation_entries(&markup) else {
                tracing::warn!(
                    campaign = campaign_id,
                    "recent donations container not found"
                );
                break StopReason::ContainerMissing;
            };

            let mut fresh = 0usize;
            for entry in entries {
                if !seen.insert(entry.raw_identity.clone()) {
                    continue;
                }
                fresh += 1;

                let record = entry.into_record(campaign_id, observed_at);
                let key = record.dedup_key(prefix_len);
                if known.contains(&key) {
                    tracing::debug!(donor = %record.donor_name, amount = %record.amount, "already stored");
                    skipped_known += 1;
                    continue;
                }

                self.store
                    .append_donation(&record)
                    .await
                    .context("failed to append donation")?;
                written += 1;
                if allow_rewrite {
                    known.insert(key);
                }
            }

            tracing::info!(
                campaign = campaign_id,
                cycle = cycles,
                "found {fresh} new unique donations; {} processed this session",
                seen.len()
            );

            if fresh == 0 {
                zero_yield += 1;
            } else {
                zero_yield = 0;
            }
            if zero_yield >= self.config.zero_yield_limit {
                tracing::info!(
                    "stopping after {zero_yield} consecutive loads with no new donations"
                );
                break StopReason::Exhausted;
            }

            match page.reveal_more().await {
                Ok(RevealOutcome::Revealed) => reveals += 1,
                Ok(RevealOutcome::Unavailable) => {
                    tracing::info!("load more not available; assuming all donations loaded");
                    break StopReason::RevealUnavailable;
                }
                Err(err) => {
                    tracing::warn!("load more failed: {err:#}");
                    break StopReason::RevealFailed;
                }
            }
        };

        self.store
            .upsert_campaign(&summary)
            .await
            .context("failed to save campaign summary")?;

        Ok(HarvestReport {
            campaign_id: campaign_id.to_string(),
            cycles,
            reveals,
            processed: seen.len(),
            written,
            skipped_known,
            stop_reason,
            summary,
        })
    }

    /// Best-effort read of the configured summary fields. Anything that
    /// cannot be found stays at the unavailable sentinel.
    async fn collect_summary<P: PageSource + ?Sized>(
        &self,
        page: &P,
        campaign_id: &str,
        scraped_at: NaiveDateTime,
    ) -> CampaignSummary {
        let mut summary = CampaignSummary::unavailable(campaign_id, scraped_at);
        let layout = &self.config.layout;
        let timeout = self.config.element_timeout;
        let mut markup: Option<String> = None;

        for field in &self.config.summary_fields {
            let value = match field {
                SummaryField::TotalDonors => page
                    .wait_for_any(&layout.total_donors, timeout)
                    .await
                    .map(|element| element.map(|e| e.text)),
                SummaryField::AmountRaised => page
                    .wait_for_any(&layout.details_containers, timeout)
                    .await
                    .map(|element| {
                        element.and_then(|e| self.extractor.amount_raised(&e.outer_html))
                    }),
                SummaryField::CampaignCreator | SummaryField::FundsReceiver => {
                    if markup.is_none() {
                        sleep(self.config.summary_settle).await;
                        markup = page.current_markup().await.ok();
                    }
                    Ok(markup.as_deref().and_then(|m| match field {
                        SummaryField::CampaignCreator => self.extractor.campaign_creator(m),
                        _ => self.extractor.funds_receiver(m),
                    }))
                }
            };

            match value {
                Ok(Some(text)) if !text.is_empty() => {
                    tracing::info!(campaign = campaign_id, ?field, "{text}");
                    let slot = match field {
                        SummaryField::TotalDonors => &mut summary.total_donors_count,
                        SummaryField::AmountRaised => &mut summary.amount_raised,
                        SummaryField::CampaignCreator => &mut summary.campaign_creator,
                        SummaryField::FundsReceiver => &mut summary.funds_receiver,
                    };
                    *slot = text;
                }
                Ok(_) => tracing::warn!(campaign = campaign_id, ?field, "field unavailable"),
                Err(err) => {
                    tracing::warn!(campaign = campaign_id, ?field, "failed to read field: {err:#}")
                }
            }
        }

        summary
    }
}
