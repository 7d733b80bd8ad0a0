//! Card deck and round results.

use std::collections::BTreeMap;

/// Cards offered to voters.
pub const DECK: [&str; 11] = ["0", "1", "2", "3", "5", "8", "13", "21", "34", "?", "☕"];

/// Whether `value` is one of the deck's cards.
pub fn is_deck_value(value: &str) -> bool {
    DECK.contains(&value)
}

/// Summary of a revealed round.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteSummary {
    /// Mean of the numeric votes, `None` when there are none
    pub average: Option<f64>,
    /// Most frequent value; ties go to the value seen first in peer-id order
    pub most_common: Option<String>,
    pub count: usize,
}

impl VoteSummary {
    /// Average formatted with one decimal, or `-`.
    pub fn average_label(&self) -> String {
        match self.average {
            Some(avg) => format!("{avg:.1}"),
            None => "-".to_string(),
        }
    }
}

/// Summarize a vote set.
pub fn summarize(votes: &BTreeMap<String, String>) -> VoteSummary {
    let numeric: Vec<f64> = votes
        .values()
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .collect();
    let average = if numeric.is_empty() {
        None
    } else {
        Some(numeric.iter().sum::<f64>() / numeric.len() as f64)
    };

    // value -> (count, first position)
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in votes.values() {
        match counts.iter_mut().find(|(v, _)| *v == value.as_str()) {
            Some((_, n)) => *n += 1,
            None => counts.push((value.as_str(), 1)),
        }
    }
    let mut most_common: Option<(&str, usize)> = None;
    for (value, n) in counts {
        if most_common.map_or(true, |(_, best)| n > best) {
            most_common = Some((value, n));
        }
    }

    VoteSummary {
        average,
        most_common: most_common.map(|(v, _)| v.to_string()),
        count: votes.len(),
    }
}
