use std::fmt::Write;

use chrono::NaiveDateTime;

use crate::models::{CampaignSummary, CanonicalDonorGroup};

const BAR_WIDTH: usize = 40;

/// Renders an amount as dollars with thousands separators, e.g. `$1,234.50`.
pub fn format_amount(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::new();
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

pub fn donor_label(group: &CanonicalDonorGroup) -> String {
    let others = group.other_aliases();
    if others.is_empty() {
        group.primary_alias().to_string()
    } else {
        format!("{} (aka: {})", group.primary_alias(), others.join(", "))
    }
}

pub fn render_top_list(groups: &[CanonicalDonorGroup]) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "--- Top {} Donors (Grouped by Similar Names) ---",
        groups.len()
    );
    for (rank, group) in groups.iter().enumerate() {
        let _ = writeln!(
            output,
            "{}. {}: {}",
            rank + 1,
            donor_label(group),
            format_amount(group.total_amount)
        );
    }
    let _ = writeln!(output, "--- End of List ---");
    output
}

fn bar(amount: f64, max: f64) -> String {
    if max <= 0.0 {
        return String::new();
    }
    let width = ((amount / max) * BAR_WIDTH as f64).round() as usize;
    "█".repeat(width.max(1))
}

/// Markdown report of the ranked donors with a text bar chart and the
/// stored campaign summaries for the same scope.
pub fn build_report(
    campaign: Option<&str>,
    generated_at: NaiveDateTime,
    groups: &[CanonicalDonorGroup],
    campaigns: &[CampaignSummary],
) -> String {
    let mut output = String::new();
    let scope = campaign.unwrap_or("all campaigns");

    let _ = writeln!(output, "# Top Donors Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        scope,
        generated_at.format("%Y-%m-%d %H:%M")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Top {} Donors (Grouped by Similar Names)", groups.len());

    if groups.is_empty() {
        let _ = writeln!(output, "No named donations with readable amounts.");
    } else {
        let _ = writeln!(output, "| Rank | Donor | Aliases | Donations | Total |");
        let _ = writeln!(output, "|---:|---|---|---:|---:|");
        for (rank, group) in groups.iter().enumerate() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} |",
                rank + 1,
                group.primary_alias(),
                group.other_aliases().join(", "),
                group.donation_count,
                format_amount(group.total_amount)
            );
        }

        let max = groups
            .iter()
            .map(|g| g.total_amount)
            .fold(0.0_f64, f64::max);
        let _ = writeln!(output);
        let _ = writeln!(output, "## Chart");
        let _ = writeln!(output, "```");
        let width = groups
            .iter()
            .map(|g| g.primary_alias().chars().count())
            .max()
            .unwrap_or(0);
        for group in groups {
            let _ = writeln!(
                output,
                "{:<width$} | {} {}",
                group.primary_alias(),
                bar(group.total_amount, max),
                format_amount(group.total_amount)
            );
        }
        let _ = writeln!(output, "```");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Campaigns");
    let scoped: Vec<&CampaignSummary> = campaigns
        .iter()
        .filter(|c| campaign.map_or(true, |id| c.campaign_id == id))
        .collect();
    if scoped.is_empty() {
        let _ = writeln!(output, "No campaigns harvested yet.");
    } else {
        for summary in scoped {
            let _ = writeln!(
                output,
                "- {}: {} donors, {} raised (created by {}, received by {}; scraped {})",
                summary.campaign_id,
                summary.total_donors_count,
                summary.amount_raised,
                summary.campaign_creator,
                summary.funds_receiver,
                summary.scraped_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn group(key: &str, aliases: &[&str], total: f64) -> CanonicalDonorGroup {
        CanonicalDonorGroup {
            canonical_key: key.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            total_amount: total,
            donation_count: aliases.len(),
        }
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .and_then(|d| d.and_hms_opt(8, 15, 0))
            .expect("valid timestamp")
    }

    #[test]
    fn amounts_use_thousands_separators() {
        assert_eq!(format_amount(75.0), "$75.00");
        assert_eq!(format_amount(1234.5), "$1,234.50");
        assert_eq!(format_amount(1_000_000.0), "$1,000,000.00");
        assert_eq!(format_amount(0.0), "$0.00");
        assert_eq!(format_amount(-12.5), "-$12.50");
    }

    #[test]
    fn list_shows_aliases_after_primary() {
        let groups = vec![
            group("jane doe", &["Jane Doe", "jane doe"], 75.0),
            group("mary major", &["Mary Major"], 10.0),
        ];
        let text = render_top_list(&groups);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "--- Top 2 Donors (Grouped by Similar Names) ---");
        assert_eq!(lines[1], "1. Jane Doe (aka: jane doe): $75.00");
        assert_eq!(lines[2], "2. Mary Major: $10.00");
        assert_eq!(lines[3], "--- End of List ---");
    }

    #[test]
    fn report_includes_chart_and_scoped_campaigns() {
        let groups = vec![
            group("jane doe", &["Jane Doe"], 100.0),
            group("mary major", &["Mary Major"], 50.0),
        ];
        let campaigns = vec![
            CampaignSummary::unavailable("https://www.givesendgo.com/a", at()),
            CampaignSummary::unavailable("https://www.givesendgo.com/b", at()),
        ];
        let report = build_report(Some("https://www.givesendgo.com/a"), at(), &groups, &campaigns);

        assert!(report.contains("Generated for https://www.givesendgo.com/a at 2026-05-04 08:15"));
        assert!(report.contains("| 1 | Jane Doe |  | 1 | $100.00 |"));
        assert!(report.contains(&format!("Jane Doe   | {} $100.00", "█".repeat(40))));
        assert!(report.contains(&format!("Mary Major | {} $50.00", "█".repeat(20))));
        assert!(report.contains("- https://www.givesendgo.com/a: N/A donors"));
        assert!(!report.contains("givesendgo.com/b"));
    }
}
