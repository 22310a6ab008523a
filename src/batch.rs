use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;

use crate::config::{Config, HarvestConfig, CAMPAIGN_URL_PREFIX};
use crate::harvest::{HarvestReport, Harvester};
use crate::store::DonationStore;
use crate::webdriver::{ChromeDriver, DriverOptions};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub harvested: usize,
    pub skipped_invalid: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

/// Reads campaign references from a file, one per line. Blank lines are
/// ignored; an empty file yields an empty list.
pub fn read_reference_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read campaign list {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Splits references into those to harvest and counts of the ones dropped,
/// keeping input order and dropping repeats.
pub fn plan_references(
    references: &[String],
    harvested: &HashSet<String>,
    rescrape: bool,
) -> (Vec<String>, BatchSummary) {
    let mut summary = BatchSummary::default();
    let mut planned = Vec::new();
    let mut queued = HashSet::new();

    for reference in references {
        if !reference.starts_with(CAMPAIGN_URL_PREFIX) {
            tracing::warn!("skipping invalid campaign URL: {reference}");
            summary.skipped_invalid += 1;
            continue;
        }
        if !rescrape && harvested.contains(reference) {
            tracing::info!("already harvested, skipping: {reference}");
            summary.skipped_existing += 1;
            continue;
        }
        if queued.insert(reference.as_str()) {
            planned.push(reference.clone());
        }
    }

    (planned, summary)
}

/// Harvests each campaign in turn with its own browser session. A failure
/// is logged and the batch moves on to the next campaign.
pub async fn run_batch(
    references: &[String],
    store: &dyn DonationStore,
    config: &Config,
    harvest: &HarvestConfig,
    rescrape: bool,
    allow_rewrite: bool,
) -> anyhow::Result<BatchSummary> {
    let harvested = store
        .harvested_campaigns()
        .await
        .context("failed to load harvested campaigns")?;
    let (planned, mut summary) = plan_references(references, &harvested, rescrape);
    let harvester = Harvester::new(store, harvest)?;
    let options = config.driver_options(harvest);

    for (index, url) in planned.iter().enumerate() {
        tracing::info!("[{}/{}] harvesting {url}", index + 1, planned.len());
        match harvest_one(&harvester, &options, harvest, url, allow_rewrite).await {
            Ok(report) => {
                tracing::info!(
                    campaign = %url,
                    cycles = report.cycles,
                    written = report.written,
                    skipped = report.skipped_known,
                    stop = ?report.stop_reason,
                    "harvest finished"
                );
                summary.harvested += 1;
            }
            Err(err) => {
                tracing::error!(campaign = %url, "harvest failed: {err:#}");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

async fn harvest_one(
    harvester: &Harvester<'_>,
    options: &DriverOptions,
    harvest: &HarvestConfig,
    url: &str,
    allow_rewrite: bool,
) -> anyhow::Result<HarvestReport> {
    let driver = ChromeDriver::spawn(options)
        .await
        .context("failed to start chromedriver")?;

    let result = match driver.open(url, harvest.layout.load_more.clone()).await {
        Ok(page) => {
            let result = harvester.harvest(&page, url, allow_rewrite).await;
            page.close().await;
            result
        }
        Err(err) => Err(anyhow::Error::new(err).context("failed to open campaign page")),
    };

    driver.shutdown().await;
    result
}
