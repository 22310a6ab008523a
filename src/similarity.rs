use textdistance::{Algorithm, LCSSeq};

/// Word-order-insensitive similarity on a 0..=100 scale.
///
/// Both inputs are reduced to ASCII alphanumerics, lowercased, split into
/// tokens, sorted and re-joined; the score is the indel similarity
/// `2 * lcs / (len_a + len_b)` rounded half-to-even.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(char::is_ascii)
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn ratio(a: &str, b: &str) -> u8 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 0;
    }
    let lcs = LCSSeq::default().for_str(a, b).sim();
    (200.0 * lcs as f64 / total as f64).round_ties_even() as u8
}
