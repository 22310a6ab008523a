//! Site-specific extraction of donation entries and campaign summary
//! fields from rendered campaign markup.

use chrono::NaiveDateTime;
use scraper::{ElementRef, Html, Selector};

use crate::models::DonationRecord;
use crate::page::Locator;

/// Where things live on a campaign page. Defaults match the GiveSendGo
/// layout; selectors are best-effort and may need updating when the site
/// changes.
#[derive(Debug, Clone)]
pub struct PageLayout {
    pub donation_container: String,
    pub donation_item: String,
    pub donor_name: String,
    pub amount: String,
    pub relative_time: String,
    pub comment: String,
    /// Give-button counter: primary locator first, then fallbacks.
    pub total_donors: Vec<Locator>,
    pub details_containers: Vec<Locator>,
    pub creator_block: String,
    pub creator_marker: String,
    pub receiver_block: String,
    pub receiver_marker: String,
    pub emphasis: String,
    pub raised_marker: String,
    pub raised_fallback: String,
    pub load_more: Locator,
}

impl Default for PageLayout {
    fn default() -> Self {
        PageLayout {
            donation_container: "div.recent-donations__wrapper".to_string(),
            donation_item: "div.recent-donations__loop".to_string(),
            donor_name: "span.font-bold".to_string(),
            amount: "div.donation__amount span".to_string(),
            relative_time: "span.text-xs".to_string(),
            comment: "p.mt-2".to_string(),
            total_donors: vec![
                Locator::xpath(
                    "//div[contains(@class, 'lg:flex') and contains(@class, 'space-y-4')]\
                     /button[contains(@class, 'give-button') and contains(@class, 'lg:flex')]\
                     //span[contains(@class, 'ml-auto') and contains(@class, 'button__counter--give')]",
                ),
                Locator::css(r"button.give-button.lg\:flex span.ml-auto.button__counter--give"),
            ],
            details_containers: vec![
                Locator::css("div.donation__details"),
                Locator::css("div.camp-details__wrapper"),
                Locator::css("div.max-w-md.space-y-10"),
            ],
            creator_block: "div.mt-4".to_string(),
            creator_marker: "Campaign created by".to_string(),
            receiver_block: "p.mt-4.text-base".to_string(),
            receiver_marker: "Campaign funds will be received by".to_string(),
            emphasis: "span.font-semibold".to_string(),
            raised_marker: "Raised:".to_string(),
            raised_fallback: "p.text-base".to_string(),
            load_more: Locator::xpath(
                "//div[contains(@class, 'recent-donations__wrapper')]//button[contains(., 'Load More')]",
            ),
        }
    }
}

/// One visible donation entry before it becomes a record.
#[derive(Debug, Clone, PartialEq)]
pub struct DonationEntry {
    /// Outer HTML of the entry; identifies it within one session.
    pub raw_identity: String,
    pub donor_name: Option<String>,
    pub amount: Option<String>,
    pub relative_time: Option<String>,
    pub comment: Option<String>,
}

impl DonationEntry {
    pub fn into_record(self, campaign_id: &str, observed_at: NaiveDateTime) -> DonationRecord {
        DonationRecord::from_fields(
            campaign_id,
            self.donor_name,
            self.amount,
            self.relative_time,
            self.comment,
            observed_at,
        )
    }
}

/// Compiled selectors for a [`PageLayout`].
#[derive(Debug)]
pub struct Extractor {
    container: Selector,
    item: Selector,
    donor_name: Selector,
    amount: Selector,
    relative_time: Selector,
    comment: Selector,
    creator_block: Selector,
    receiver_block: Selector,
    emphasis: Selector,
    paragraph: Selector,
    raised_fallback: Selector,
    creator_marker: String,
    receiver_marker: String,
    raised_marker: String,
}

fn compile(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow::anyhow!("invalid selector `{selector}`: {e}"))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

impl Extractor {
    pub fn new(layout: &PageLayout) -> anyhow::Result<Self> {
        Ok(Extractor {
            container: compile(&layout.donation_container)?,
            item: compile(&layout.donation_item)?,
            donor_name: compile(&layout.donor_name)?,
            amount: compile(&layout.amount)?,
            relative_time: compile(&layout.relative_time)?,
            comment: compile(&layout.comment)?,
            creator_block: compile(&layout.creator_block)?,
            receiver_block: compile(&layout.receiver_block)?,
            emphasis: compile(&layout.emphasis)?,
            paragraph: compile("p")?,
            raised_fallback: compile(&layout.raised_fallback)?,
            creator_marker: layout.creator_marker.clone(),
            receiver_marker: layout.receiver_marker.clone(),
            raised_marker: layout.raised_marker.clone(),
        })
    }

    /// Visible donation entries in page order, or `None` when the donation
    /// list container is not on the page.
    pub fn donation_entries(&self, markup: &str) -> Option<Vec<DonationEntry>> {
        let document = Html::parse_document(markup);
        let container = document.select(&self.container).next()?;

        let entries = container
            .select(&self.item)
            .map(|item| {
                let field = |selector: &Selector| item.select(selector).next().map(element_text);
                DonationEntry {
                    raw_identity: item.html(),
                    donor_name: field(&self.donor_name),
                    amount: field(&self.amount),
                    relative_time: field(&self.relative_time),
                    comment: field(&self.comment),
                }
            })
            .collect();

        Some(entries)
    }

    pub fn campaign_creator(&self, markup: &str) -> Option<String> {
        self.labelled_value(markup, &self.creator_block, &self.creator_marker)
    }

    pub fn funds_receiver(&self, markup: &str) -> Option<String> {
        self.labelled_value(markup, &self.receiver_block, &self.receiver_marker)
    }

    /// First block containing `marker` that has an emphasized value.
    fn labelled_value(&self, markup: &str, block: &Selector, marker: &str) -> Option<String> {
        let document = Html::parse_document(markup);
        document
            .select(block)
            .filter(|element| element.text().collect::<String>().contains(marker))
            .find_map(|element| element.select(&self.emphasis).next().map(element_text))
    }

    /// Reads the value paragraph following the "Raised:" label inside a
    /// campaign details container.
    pub fn amount_raised(&self, details_html: &str) -> Option<String> {
        let fragment = Html::parse_fragment(details_html);

        let labelled = fragment
            .select(&self.paragraph)
            .find(|p| element_text(*p).contains(&self.raised_marker))
            .and_then(|label| {
                label
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|sibling| sibling.value().name() == "p")
            })
            .map(element_text);
        if labelled.is_some() {
            return labelled;
        }

        let candidates: Vec<ElementRef<'_>> = fragment.select(&self.raised_fallback).collect();
        candidates
            .iter()
            .position(|p| element_text(*p).contains(&self.raised_marker))
            .and_then(|index| candidates.get(index + 1))
            .map(|p| element_text(*p))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub fn donation_html(name: &str, amount: &str, when: &str, comment: Option<&str>) -> String {
        let comment = comment
            .map(|c| format!(r#"<p class="mt-2">{c}</p>"#))
            .unwrap_or_default();
        format!(
            r#"<div class="recent-donations__loop">
                 <span class="font-bold">{name}</span>
                 <div class="donation__amount"><span>{amount}</span></div>
                 <span class="text-xs">{when}</span>
                 {comment}
               </div>"#
        )
    }

    pub fn page(entries: &[String]) -> String {
        format!(
            r#"<html><body>
                 <div class="recent-donations__wrapper">{}<button>Load More</button></div>
               </body></html>"#,
            entries.join("\n")
        )
    }
}
