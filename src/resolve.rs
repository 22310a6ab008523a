use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ResolverConfig;
use crate::models::{normalize_name, CanonicalDonorGroup, DonationRecord};
use crate::similarity::token_sort_ratio;

#[derive(Debug, Default)]
struct NameTotals {
    originals: BTreeSet<String>,
    total: f64,
    count: usize,
}

/// Groups donor-name variants into canonical identities and ranks them by
/// total donated. Returns `None` when no named donation with a readable
/// amount remains.
pub fn resolve_donors(
    records: &[DonationRecord],
    config: &ResolverConfig,
    top_n: usize,
) -> Option<Vec<CanonicalDonorGroup>> {
    let mut by_name: BTreeMap<String, NameTotals> = BTreeMap::new();
    let mut unparsable = 0usize;

    for record in records {
        let Some(amount) = parse_amount(&record.amount) else {
            tracing::debug!(donor = %record.donor_name, amount = %record.amount, "unparsable amount");
            unparsable += 1;
            continue;
        };
        let normalized = normalize_name(&record.donor_name);
        if normalized.is_empty() || config.anonymous_names.contains(&normalized) {
            continue;
        }

        let totals = by_name.entry(normalized).or_default();
        totals.originals.insert(record.donor_name.trim().to_string());
        totals.total += amount;
        totals.count += 1;
    }

    if unparsable > 0 {
        tracing::info!("skipped {unparsable} donations with unparsable amounts");
    }
    if by_name.is_empty() {
        return None;
    }

    let names: Vec<&str> = by_name.keys().map(String::as_str).collect();
    let threshold = config.similarity_threshold;
    let components = cluster_names(&names, |a, b| token_sort_ratio(a, b) > threshold);

    let mut groups: Vec<CanonicalDonorGroup> = components
        .into_iter()
        .map(|members| {
            let mut aliases = BTreeSet::new();
            let mut total_amount = 0.0;
            let mut donation_count = 0;
            for &index in &members {
                let totals = &by_name[names[index]];
                aliases.extend(totals.originals.iter().cloned());
                total_amount += totals.total;
                donation_count += totals.count;
            }
            CanonicalDonorGroup {
                // members are sorted and names are in lexicographic order
                canonical_key: names[members[0]].to_string(),
                aliases: aliases.into_iter().collect(),
                total_amount,
                donation_count,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.total_amount
            .partial_cmp(&a.total_amount)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.canonical_key.cmp(&b.canonical_key))
    });
    groups.truncate(top_n);
    Some(groups)
}

/// Connected components of `names` under `linked`, as sorted index lists.
///
/// Seeds are taken in input order and each component grows breadth-first;
/// a name joins the first component that reaches it and is never moved.
/// Two names that are only similar through a third still share a component.
pub fn cluster_names<F>(names: &[&str], linked: F) -> Vec<Vec<usize>>
where
    F: Fn(&str, &str) -> bool,
{
    let mut assigned = vec![false; names.len()];
    let mut components = Vec::new();

    for seed in 0..names.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut members = vec![seed];
        let mut cursor = 0;

        while cursor < members.len() {
            let current = members[cursor];
            for candidate in 0..names.len() {
                if !assigned[candidate] && linked(names[current], names[candidate]) {
                    assigned[candidate] = true;
                    members.push(candidate);
                }
            }
            cursor += 1;
        }

        members.sort_unstable();
        components.push(members);
    }

    components
}

/// Parses a displayed amount such as "$1,250.00 USD".
pub fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | 'U' | 'S' | 'D') && !c.is_whitespace())
        .collect();
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 2)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .expect("valid timestamp")
    }

    fn donation(name: &str, amount: &str) -> DonationRecord {
        DonationRecord {
            campaign_id: "https://www.givesendgo.com/example".to_string(),
            donor_name: name.to_string(),
            amount: amount.to_string(),
            relative_time: "1 day ago".to_string(),
            comment: String::new(),
            observed_at: at(),
        }
    }

    #[test]
    fn parses_displayed_amounts() {
        assert_eq!(parse_amount("$50"), Some(50.0));
        assert_eq!(parse_amount("$1,250.00 USD"), Some(1250.0));
        assert_eq!(parse_amount(" 25.5 "), Some(25.5));
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn case_variants_merge_and_anonymous_is_excluded() {
        let records = vec![
            donation("Jane Doe", "$50"),
            donation("jane doe", "$25.00"),
            donation("Anonymous", "$1000"),
        ];
        let groups = resolve_donors(&records, &ResolverConfig::default(), 10).expect("data");

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].canonical_key, "jane doe");
        assert_eq!(groups[0].aliases, vec!["Jane Doe", "jane doe"]);
        assert_eq!(groups[0].primary_alias(), "Jane Doe");
        assert!((groups[0].total_amount - 75.0).abs() < 1e-9);
        assert_eq!(groups[0].donation_count, 2);
    }

    #[test]
    fn unparsable_amount_is_excluded_without_failing() {
        let records = vec![donation("Mary Major", "N/A"), donation("Mary Major", "$10")];
        let groups = resolve_donors(&records, &ResolverConfig::default(), 10).expect("data");
        assert_eq!(groups[0].total_amount, 10.0);
        assert_eq!(groups[0].donation_count, 1);
    }

    #[test]
    fn nothing_left_reports_no_data() {
        let records = vec![
            donation("Anonymous Giver", "$5"),
            donation(" ANONYMOUS ", "$5"),
            donation("Mary Major", "N/A"),
        ];
        assert!(resolve_donors(&records, &ResolverConfig::default(), 10).is_none());
        assert!(resolve_donors(&[], &ResolverConfig::default(), 10).is_none());
    }

    #[test]
    fn similar_spellings_join_through_a_shared_neighbour() {
        // Each adjacent pair scores above 88; the outer pair scores 84.
        let records = vec![
            donation("Alxandr Hmltn", "$5"),
            donation("Alexander Hamilton", "$10"),
            donation("Alexandr Hamiltn", "$20"),
            donation("Richard Roe", "$1"),
        ];
        let groups = resolve_donors(&records, &ResolverConfig::default(), 10).expect("data");

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].canonical_key, "alexander hamilton");
        assert_eq!(
            groups[0].aliases,
            vec!["Alexander Hamilton", "Alexandr Hamiltn", "Alxandr Hmltn"]
        );
        assert_eq!(groups[0].total_amount, 35.0);
        assert_eq!(groups[1].canonical_key, "richard roe");
    }

    #[test]
    fn clustering_is_transitive_by_construction() {
        let names = ["jon smith", "jonh smith", "john smyth"];
        let linked = |a: &str, b: &str| {
            let pair = [a, b];
            pair.contains(&"jonh smith") && (pair.contains(&"jon smith") || pair.contains(&"john smyth"))
        };
        assert_eq!(cluster_names(&names, linked), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn unrelated_names_stay_apart() {
        let names = ["a", "b", "c"];
        assert_eq!(
            cluster_names(&names, |_, _| false),
            vec![vec![0], vec![1], vec![2]]
        );
    }

    #[test]
    fn resolution_is_deterministic_and_ranked() {
        let records = vec![
            donation("Bob Brown", "$40"),
            donation("Mary Major", "$40"),
            donation("Jane Doe", "$100"),
            donation("Janet Doe", "$1"),
            donation("Richard Roe", "$5"),
        ];
        let config = ResolverConfig::default();
        let first = resolve_donors(&records, &config, 3).expect("data");
        let mut reversed = records.clone();
        reversed.reverse();
        let second = resolve_donors(&reversed, &config, 3).expect("data");

        assert_eq!(first, second);
        let keys: Vec<_> = first.iter().map(|g| g.canonical_key.as_str()).collect();
        // "janet doe" scores 94 against "jane doe"; equal totals tie-break by key.
        assert_eq!(keys, vec!["jane doe", "bob brown", "mary major"]);
        assert_eq!(first[0].total_amount, 101.0);
    }
}
