use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod batch;
mod config;
mod extract;
mod harvest;
mod models;
mod page;
mod report;
mod resolve;
mod similarity;
mod store;
mod webdriver;

use config::{Config, HarvestConfig, ResolverConfig};
use store::{CsvStore, DonationStore, PgStore};

#[derive(Parser)]
#[command(name = "donor-harvest")]
#[command(about = "Harvest GiveSendGo donations and rank donors across name variants", long_about = None)]
struct Cli {
    /// Directory holding donations.csv and campaigns.csv
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Store records in Postgres instead of CSV files
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest donations from one campaign or a list of campaigns
    #[command(group(
        ArgGroup::new("source")
            .args(["url", "file"])
            .required(true)
            .multiple(false)
    ))]
    Harvest {
        #[arg(long)]
        url: Option<String>,
        /// File with one campaign URL per line
        #[arg(long)]
        file: Option<PathBuf>,
        /// Harvest campaigns that already have a stored summary
        #[arg(long)]
        rescrape: bool,
        /// Also skip entries whose key was already written earlier in this run
        #[arg(long)]
        allow_rewrite: bool,
        /// Only read the donor count and amount raised for the summary
        #[arg(long)]
        basic_summary: bool,
    },
    /// Print the top donors grouped by similar names
    Top {
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        limit: u64,
        #[arg(long)]
        campaign: Option<String>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        limit: u64,
        #[arg(long)]
        campaign: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// List stored campaign summaries
    Campaigns,
    /// Create or upgrade the database schema
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if cli.database_url.is_some() {
        config.database_url = cli.database_url;
    }

    if let Commands::InitDb = cli.command {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set to initialize the schema")?;
        PgStore::connect(database_url).await?.init_db().await?;
        println!("Schema ready.");
        return Ok(());
    }

    let store = open_store(&config).await?;

    match cli.command {
        Commands::Harvest {
            url,
            file,
            rescrape,
            allow_rewrite,
            basic_summary,
        } => {
            let references = match (url, file) {
                (Some(url), _) => vec![url.trim().to_string()],
                (None, Some(file)) => batch::read_reference_file(&file)?,
                (None, None) => Vec::new(),
            };
            if references.is_empty() {
                println!("No campaign URLs to harvest.");
                return Ok(());
            }

            let harvest = HarvestConfig::default().with_basic_summary(basic_summary);
            let summary = batch::run_batch(
                &references,
                store.as_ref(),
                &config,
                &harvest,
                rescrape,
                allow_rewrite,
            )
            .await?;
            println!(
                "Harvested {} campaigns ({} failed, {} already harvested, {} invalid).",
                summary.harvested, summary.failed, summary.skipped_existing, summary.skipped_invalid
            );
        }
        Commands::Top { limit, campaign } => {
            let records = store.load_donations(campaign.as_deref()).await?;
            match resolve::resolve_donors(&records, &ResolverConfig::default(), limit as usize) {
                Some(groups) => print!("{}", report::render_top_list(&groups)),
                None => println!("No donation data available for analysis."),
            }
        }
        Commands::Report {
            limit,
            campaign,
            out,
        } => {
            let records = store.load_donations(campaign.as_deref()).await?;
            let groups =
                resolve::resolve_donors(&records, &ResolverConfig::default(), limit as usize)
                    .unwrap_or_default();
            let campaigns = store.load_campaigns().await?;
            let report = report::build_report(
                campaign.as_deref(),
                Local::now().naive_local(),
                &groups,
                &campaigns,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Campaigns => {
            let campaigns = store.load_campaigns().await?;
            if campaigns.is_empty() {
                println!("No campaigns harvested yet.");
                return Ok(());
            }
            for summary in campaigns {
                println!(
                    "- {}: {} donors, {} raised, created by {}, received by {} (scraped {})",
                    summary.campaign_id,
                    summary.total_donors_count,
                    summary.amount_raised,
                    summary.campaign_creator,
                    summary.funds_receiver,
                    summary.scraped_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::InitDb => {}
    }

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Box<dyn DonationStore>> {
    match config.database_url.as_deref() {
        Some(url) => {
            tracing::info!("using Postgres store");
            Ok(Box::new(PgStore::connect(url).await?))
        }
        None => {
            tracing::info!("using CSV store in {}", config.data_dir.display());
            Ok(Box::new(CsvStore::open(&config.data_dir)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn allow_rewrite_help_describes_run_local_skipping() {
        let command = Cli::command();
        let harvest = command
            .find_subcommand("harvest")
            .expect("harvest subcommand");
        let help = harvest
            .get_arguments()
            .find(|arg| arg.get_id() == "allow_rewrite")
            .and_then(|arg| arg.get_help())
            .map(|help| help.to_string())
            .expect("allow-rewrite help");
        assert!(help.contains("skip"));
        assert!(help.contains("earlier in this run"));
    }

    #[test]
    fn harvest_flags_parse() {
        let cli = Cli::try_parse_from([
            "donor-harvest",
            "harvest",
            "--url",
            "https://www.givesendgo.com/example",
            "--allow-rewrite",
            "--basic-summary",
        ])
        .expect("valid arguments");
        match cli.command {
            Commands::Harvest {
                allow_rewrite,
                basic_summary,
                rescrape,
                ..
            } => {
                assert!(allow_rewrite && basic_summary && !rescrape);
            }
            _ => panic!("expected harvest"),
        }
    }

    #[test]
    fn harvest_needs_exactly_one_source() {
        assert!(Cli::try_parse_from(["donor-harvest", "harvest"]).is_err());
        assert!(Cli::try_parse_from([
            "donor-harvest",
            "harvest",
            "--url",
            "https://www.givesendgo.com/a",
            "--file",
            "urls.txt",
        ])
        .is_err());
    }

    #[test]
    fn top_limit_must_be_positive() {
        assert!(Cli::try_parse_from(["donor-harvest", "top", "--limit", "0"]).is_err());
    }
}
