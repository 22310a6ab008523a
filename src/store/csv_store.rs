use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use csv::{StringRecord, WriterBuilder};
use serde::de::DeserializeOwned;

use super::DonationStore;
use crate::models::{parse_timestamp, CampaignSummary, DedupKey, DonationRecord};

pub const DONATIONS_FILE: &str = "donations.csv";
pub const CAMPAIGNS_FILE: &str = "campaigns.csv";

const DONATION_HEADERS: [&str; 6] = [
    "campaign_url",
    "donor_name",
    "amount",
    "donation_relative_time",
    "comment",
    "scraped_at",
];

const CAMPAIGN_HEADERS: [&str; 6] = [
    "campaign_url",
    "total_donors_count",
    "amount_raised",
    "campaign_creator",
    "funds_receiver",
    "scraped_at",
];

/// Two CSV files in one directory: an append-only donation log and a
/// campaign summary table rewritten on every upsert.
#[derive(Debug, Clone)]
pub struct CsvStore {
    donations_path: PathBuf,
    campaigns_path: PathBuf,
}

impl CsvStore {
    /// Opens the store in `dir`, creating the directory and header-only
    /// files when they do not exist yet.
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;

        let store = CsvStore {
            donations_path: dir.join(DONATIONS_FILE),
            campaigns_path: dir.join(CAMPAIGNS_FILE),
        };
        init_file(&store.donations_path, &DONATION_HEADERS)?;
        init_file(&store.campaigns_path, &CAMPAIGN_HEADERS)?;
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) fn donations_path(&self) -> &Path {
        &self.donations_path
    }
}

fn init_file(path: &Path, headers: &[&str]) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(headers)?;
    writer.flush()?;
    Ok(())
}

/// Reads every row that deserializes cleanly; malformed rows are logged and
/// skipped so one bad line never hides the rest of the file.
fn read_rows<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();

    for (index, result) in reader.deserialize::<T>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 2,
                    "skipping malformed row: {err}"
                );
            }
        }
    }

    Ok(rows)
}

/// Column positions in `donations.csv`, looked up by header name.
struct DonationColumns {
    campaign: usize,
    donor_name: usize,
    amount: usize,
    relative_time: usize,
    comment: Option<usize>,
    scraped_at: Option<usize>,
}

impl DonationColumns {
    fn from_headers(headers: &StringRecord, path: &Path) -> anyhow::Result<Self> {
        let find = |name: &str| headers.iter().position(|header| header == name);
        let require = |name: &str| {
            find(name).with_context(|| format!("{} has no `{name}` column", path.display()))
        };
        Ok(DonationColumns {
            campaign: require(DONATION_HEADERS[0])?,
            donor_name: require(DONATION_HEADERS[1])?,
            amount: require(DONATION_HEADERS[2])?,
            relative_time: require(DONATION_HEADERS[3])?,
            comment: find(DONATION_HEADERS[4]),
            scraped_at: find(DONATION_HEADERS[5]),
        })
    }

    /// Builds a record from the text columns. Only a row too short to hold
    /// the identity columns is rejected; an unreadable `scraped_at` falls
    /// back to the epoch so the donation still counts.
    fn record(&self, row: &StringRecord) -> Option<DonationRecord> {
        let text = |index: usize| row.get(index).map(str::to_string);
        let observed_at = match self.scraped_at.and_then(|index| row.get(index)) {
            Some(raw) => parse_timestamp(raw).unwrap_or_else(|| {
                tracing::debug!(scraped_at = raw, "unreadable timestamp");
                NaiveDateTime::default()
            }),
            None => NaiveDateTime::default(),
        };
        Some(DonationRecord {
            campaign_id: text(self.campaign)?,
            donor_name: text(self.donor_name)?,
            amount: text(self.amount)?,
            relative_time: text(self.relative_time)?,
            comment: self.comment.and_then(text).unwrap_or_default(),
            observed_at,
        })
    }
}

/// Every donation row in file order, tolerant of timestamp formats.
fn read_donations(path: &Path) -> anyhow::Result<Vec<DonationRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let columns = DonationColumns::from_headers(reader.headers()?, path)?;
    let mut records = Vec::new();

    for (index, result) in reader.records().enumerate() {
        let row = result.with_context(|| format!("failed to read {}", path.display()))?;
        match columns.record(&row) {
            Some(record) => records.push(record),
            None => tracing::warn!(
                path = %path.display(),
                line = index + 2,
                "skipping incomplete row"
            ),
        }
    }

    Ok(records)
}

fn read_raw(path: &Path) -> anyhow::Result<Vec<StringRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for result in reader.records() {
        rows.push(result.with_context(|| format!("failed to read {}", path.display()))?);
    }
    Ok(rows)
}

#[async_trait]
impl DonationStore for CsvStore {
    async fn append_donation(&self, record: &DonationRecord) -> anyhow::Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.donations_path)
            .with_context(|| format!("failed to open {}", self.donations_path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    async fn existing_keys(
        &self,
        campaign_id: &str,
        comment_prefix_len: usize,
    ) -> anyhow::Result<HashSet<DedupKey>> {
        let keys = read_donations(&self.donations_path)?
            .iter()
            .filter(|record| record.campaign_id == campaign_id)
            .map(|record| record.dedup_key(comment_prefix_len))
            .collect();
        Ok(keys)
    }

    async fn upsert_campaign(&self, summary: &CampaignSummary) -> anyhow::Result<()> {
        // Rows that fail to parse are carried over untouched.
        let existing = read_raw(&self.campaigns_path)?;
        let tmp_path = self.campaigns_path.with_extension("csv.tmp");

        {
            let mut writer = WriterBuilder::new()
                .has_headers(false)
                .from_path(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            writer.write_record(CAMPAIGN_HEADERS)?;

            let mut replaced = false;
            for row in &existing {
                if row.get(0) == Some(summary.campaign_id.as_str()) {
                    if !replaced {
                        writer.serialize(summary)?;
                        replaced = true;
                    }
                } else {
                    writer.write_record(row)?;
                }
            }
            if !replaced {
                writer.serialize(summary)?;
            }
            writer.flush()?;
        }

        fs::rename(&tmp_path, &self.campaigns_path).with_context(|| {
            format!("failed to replace {}", self.campaigns_path.display())
        })?;
        Ok(())
    }

    async fn harvested_campaigns(&self) -> anyhow::Result<HashSet<String>> {
        Ok(read_raw(&self.campaigns_path)?
            .iter()
            .filter_map(|row| row.get(0))
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn load_donations(
        &self,
        campaign_id: Option<&str>,
    ) -> anyhow::Result<Vec<DonationRecord>> {
        let mut records = read_donations(&self.donations_path)?;
        if let Some(campaign_id) = campaign_id {
            records.retain(|record| record.campaign_id == campaign_id);
        }
        Ok(records)
    }

    async fn load_campaigns(&self) -> anyhow::Result<Vec<CampaignSummary>> {
        read_rows(&self.campaigns_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("donor-harvest-store-{}", Uuid::new_v4()))
    }

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .expect("valid timestamp")
    }

    fn record(campaign: &str, name: &str, amount: &str) -> DonationRecord {
        DonationRecord::from_fields(
            campaign,
            Some(name.to_string()),
            Some(amount.to_string()),
            Some("2 days ago".to_string()),
            Some("Praying, with a comma".to_string()),
            at(9),
        )
    }

    #[tokio::test]
    async fn open_writes_headers_once() {
        let dir = temp_dir();
        let store = CsvStore::open(&dir).expect("open store");
        store
            .append_donation(&record("a", "Jane", "$5"))
            .await
            .expect("append");
        CsvStore::open(&dir).expect("reopen store");

        let contents = fs::read_to_string(store.donations_path()).expect("read file");
        assert!(contents.starts_with(
            "campaign_url,donor_name,amount,donation_relative_time,comment,scraped_at"
        ));
        assert_eq!(contents.lines().count(), 2);
        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn appended_donations_round_trip_per_campaign() {
        let dir = temp_dir();
        let store = CsvStore::open(&dir).expect("open store");
        store.append_donation(&record("a", "Jane", "$5")).await.expect("append");
        store.append_donation(&record("b", "John", "$7")).await.expect("append");
        store.append_donation(&record("a", "Jim", "$9")).await.expect("append");

        let all = store.load_donations(None).await.expect("load");
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].donor_name, "Jim");

        let only_a = store.load_donations(Some("a")).await.expect("load");
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].comment, "Praying, with a comma");

        let keys = store.existing_keys("a", 50).await.expect("keys");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&record("a", "Jane", "$5").dedup_key(50)));
        assert!(!keys.contains(&record("b", "John", "$7").dedup_key(50)));
        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn upsert_replaces_existing_campaign_row() {
        let dir = temp_dir();
        let store = CsvStore::open(&dir).expect("open store");

        let mut first = CampaignSummary::unavailable("a", at(8));
        store.upsert_campaign(&first).await.expect("upsert");
        store
            .upsert_campaign(&CampaignSummary::unavailable("b", at(8)))
            .await
            .expect("upsert");

        first.amount_raised = "$12,000".to_string();
        first.scraped_at = at(11);
        store.upsert_campaign(&first).await.expect("upsert");

        let campaigns = store.load_campaigns().await.expect("load");
        assert_eq!(campaigns.len(), 2);
        assert_eq!(campaigns[0].campaign_id, "a");
        assert_eq!(campaigns[0].amount_raised, "$12,000");
        assert_eq!(campaigns[0].scraped_at, at(11));

        let harvested = store.harvested_campaigns().await.expect("harvested");
        assert!(harvested.contains("a") && harvested.contains("b"));
        fs::remove_dir_all(dir).ok();
    }

    fn append_raw(store: &CsvStore, line: &str) {
        let mut contents = fs::read_to_string(store.donations_path()).expect("read");
        contents.push_str(line);
        fs::write(store.donations_path(), contents).expect("write");
    }

    #[tokio::test]
    async fn rows_with_unreadable_timestamps_still_count() {
        let dir = temp_dir();
        let store = CsvStore::open(&dir).expect("open store");
        store.append_donation(&record("a", "Jane", "$5")).await.expect("append");
        append_raw(&store, "a,Offset,$1,now,,2025-05-01T12:00:00+00:00\n");
        append_raw(&store, "a,Blank,$2,now,,\n");
        append_raw(&store, "a,Edited,$3,now,,last tuesday\n");
        store.append_donation(&record("a", "John", "$6")).await.expect("append");

        let records = store.load_donations(Some("a")).await.expect("load");
        let names: Vec<_> = records.iter().map(|r| r.donor_name.as_str()).collect();
        assert_eq!(names, vec!["Jane", "Offset", "Blank", "Edited", "John"]);
        assert_eq!(
            records[1].observed_at,
            NaiveDate::from_ymd_opt(2025, 5, 1)
                .and_then(|d| d.and_hms_opt(12, 0, 0))
                .expect("valid timestamp")
        );
        assert_eq!(records[2].observed_at, NaiveDateTime::default());

        let keys = store.existing_keys("a", 50).await.expect("keys");
        assert_eq!(keys.len(), 5);
        assert!(keys.contains(&DedupKey {
            donor_name: "Edited".to_string(),
            amount: "$3".to_string(),
            relative_time: "now".to_string(),
            comment_prefix: String::new(),
        }));
        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn incomplete_donation_rows_are_skipped() {
        let dir = temp_dir();
        let store = CsvStore::open(&dir).expect("open store");
        append_raw(&store, "a,Short\n");
        store.append_donation(&record("a", "John", "$6")).await.expect("append");

        let records = store.load_donations(None).await.expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].donor_name, "John");
        fs::remove_dir_all(dir).ok();
    }
}
