use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;

use crate::extract::PageLayout;
use crate::webdriver::DriverOptions;

pub const CAMPAIGN_URL_PREFIX: &str = "https://www.givesendgo.com/";

/// Process-level settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub chromedriver_path: Option<PathBuf>,
    pub chromedriver_port: u16,
    pub headless: bool,
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenv();

        Ok(Config {
            chromedriver_path: env::var("CHROMEDRIVER_PATH").ok().map(PathBuf::from),
            chromedriver_port: env::var("CHROMEDRIVER_PORT")
                .unwrap_or_else(|_| "9515".to_string())
                .parse()
                .context("CHROMEDRIVER_PORT must be a valid port number")?,
            headless: env::var("HEADLESS")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            data_dir: env::var("DONOR_HARVEST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        })
    }

    pub fn driver_options(&self, harvest: &HarvestConfig) -> DriverOptions {
        DriverOptions {
            chromedriver_path: self.chromedriver_path.clone(),
            port: self.chromedriver_port,
            headless: self.headless,
            reveal_timeout: harvest.reveal_timeout,
            ..DriverOptions::default()
        }
    }
}

/// Summary fields a harvest tries to read from the campaign page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryField {
    TotalDonors,
    AmountRaised,
    CampaignCreator,
    FundsReceiver,
}

impl SummaryField {
    pub const BASIC: &'static [SummaryField] =
        &[SummaryField::TotalDonors, SummaryField::AmountRaised];

    pub const ALL: &'static [SummaryField] = &[
        SummaryField::TotalDonors,
        SummaryField::AmountRaised,
        SummaryField::CampaignCreator,
        SummaryField::FundsReceiver,
    ];
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Consecutive cycles without a newly processed entry before stopping.
    pub zero_yield_limit: u32,
    pub comment_prefix_len: usize,
    /// Pause before reading the markup each cycle so rendering settles.
    pub settle_delay: Duration,
    /// Pause before reading the static campaign details for the summary.
    pub summary_settle: Duration,
    pub reveal_timeout: Duration,
    pub element_timeout: Duration,
    pub summary_fields: Vec<SummaryField>,
    pub layout: PageLayout,
}

impl HarvestConfig {
    /// Restricts the summary to the donor count and amount raised.
    pub fn with_basic_summary(self, basic: bool) -> Self {
        if !basic {
            return self;
        }
        HarvestConfig {
            summary_fields: SummaryField::BASIC.to_vec(),
            ..self
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig {
            zero_yield_limit: 3,
            comment_prefix_len: 50,
            settle_delay: Duration::from_millis(500),
            summary_settle: Duration::from_secs(2),
            reveal_timeout: Duration::from_secs(7),
            element_timeout: Duration::from_secs(20),
            summary_fields: SummaryField::ALL.to_vec(),
            layout: PageLayout::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Names scoring strictly above this token-sort ratio are linked.
    pub similarity_threshold: u8,
    pub anonymous_names: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            similarity_threshold: 88,
            anonymous_names: vec!["anonymous".to_string(), "anonymous giver".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let harvest = HarvestConfig::default();
        assert_eq!(harvest.zero_yield_limit, 3);
        assert_eq!(harvest.comment_prefix_len, 50);
        assert_eq!(harvest.summary_fields, SummaryField::ALL);
        assert_eq!(harvest.summary_settle, Duration::from_secs(2));

        let resolver = ResolverConfig::default();
        assert_eq!(resolver.similarity_threshold, 88);
        assert!(resolver.anonymous_names.contains(&"anonymous giver".to_string()));
    }

    #[test]
    fn basic_summary_keeps_only_count_and_amount() {
        let basic = HarvestConfig::default().with_basic_summary(true);
        assert_eq!(
            basic.summary_fields,
            vec![SummaryField::TotalDonors, SummaryField::AmountRaised]
        );
        let rich = HarvestConfig::default().with_basic_summary(false);
        assert_eq!(rich.summary_fields, SummaryField::ALL);
    }

    #[test]
    fn driver_options_carry_reveal_timeout() {
        let config = Config {
            chromedriver_path: Some(PathBuf::from("/usr/bin/chromedriver")),
            chromedriver_port: 4444,
            headless: false,
            database_url: None,
            data_dir: PathBuf::from("."),
        };
        let harvest = HarvestConfig {
            reveal_timeout: Duration::from_secs(2),
            ..HarvestConfig::default()
        };
        let options = config.driver_options(&harvest);
        assert_eq!(options.port, 4444);
        assert!(!options.headless);
        assert_eq!(options.reveal_timeout, Duration::from_secs(2));
    }
}
