use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Sentinel stored for any display field that could not be extracted.
pub const UNAVAILABLE: &str = "N/A";
pub const ANONYMOUS: &str = "Anonymous";

/// One observed donation entry, exactly as displayed on the campaign page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRecord {
    #[serde(rename = "campaign_url")]
    pub campaign_id: String,
    pub donor_name: String,
    pub amount: String,
    #[serde(rename = "donation_relative_time")]
    pub relative_time: String,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "scraped_at")]
    pub observed_at: NaiveDateTime,
}

impl DonationRecord {
    /// Builds a record from raw field texts, filling absent fields with the
    /// same defaults the harvest has always stored.
    pub fn from_fields(
        campaign_id: &str,
        donor_name: Option<String>,
        amount: Option<String>,
        relative_time: Option<String>,
        comment: Option<String>,
        observed_at: NaiveDateTime,
    ) -> Self {
        DonationRecord {
            campaign_id: campaign_id.to_string(),
            donor_name: non_empty(donor_name).unwrap_or_else(|| ANONYMOUS.to_string()),
            amount: non_empty(amount).unwrap_or_else(|| UNAVAILABLE.to_string()),
            relative_time: non_empty(relative_time).unwrap_or_else(|| UNAVAILABLE.to_string()),
            comment: comment.unwrap_or_default(),
            observed_at,
        }
    }

    pub fn dedup_key(&self, comment_prefix_len: usize) -> DedupKey {
        DedupKey {
            donor_name: self.donor_name.clone(),
            amount: self.amount.clone(),
            relative_time: self.relative_time.clone(),
            comment_prefix: self.comment.chars().take(comment_prefix_len).collect(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Heuristic identity of a donation. Two distinct donations with the same
/// name, amount, relative time and comment prefix collapse into one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub donor_name: String,
    pub amount: String,
    pub relative_time: String,
    pub comment_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    #[serde(rename = "campaign_url")]
    pub campaign_id: String,
    pub total_donors_count: String,
    pub amount_raised: String,
    pub campaign_creator: String,
    pub funds_receiver: String,
    pub scraped_at: NaiveDateTime,
}

impl CampaignSummary {
    pub fn unavailable(campaign_id: &str, scraped_at: NaiveDateTime) -> Self {
        CampaignSummary {
            campaign_id: campaign_id.to_string(),
            total_donors_count: UNAVAILABLE.to_string(),
            amount_raised: UNAVAILABLE.to_string(),
            campaign_creator: UNAVAILABLE.to_string(),
            funds_receiver: UNAVAILABLE.to_string(),
            scraped_at,
        }
    }
}

/// A cluster of donor-name spellings treated as one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalDonorGroup {
    pub canonical_key: String,
    /// Original spellings, sorted; the first one is the display name.
    pub aliases: Vec<String>,
    pub total_amount: f64,
    pub donation_count: usize,
}

impl CanonicalDonorGroup {
    pub fn primary_alias(&self) -> &str {
        self.aliases
            .first()
            .map(String::as_str)
            .unwrap_or(&self.canonical_key)
    }

    pub fn other_aliases(&self) -> &[String] {
        self.aliases.get(1..).unwrap_or(&[])
    }
}

/// Reads a stored `scraped_at` value. Accepts naive ISO timestamps (with a
/// `T` or a space), RFC 3339 timestamps with an offset (kept as wall-clock
/// time) and bare dates.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_local());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Lowercased, trimmed donor name used for comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
