//! Rule-based labelling of rating events.
//!
//! Four independent sources contribute labels: sector keywords in the company
//! name, target-price momentum, the analyst action and the new rating. Their
//! union is the label set; `Neutral` is used only when every source is silent.

use std::collections::BTreeSet;

use crate::domain::label::Label;
use crate::domain::stock::StockRating;

/// Sector keyword groups, highest priority first.
const SECTOR_RULES: [(Label, &[&str]); 4] = [
    (
        Label::Biotech,
        &["Medical", "Therapeutics", "Biopharma", "Pharma"],
    ),
    (
        Label::Tech,
        &["Tech", "Software", "Group", "Systems", "Solutions"],
    ),
    (
        Label::Financial,
        &[
            "Financial",
            "Bank",
            "Banc",
            "Capital",
            "Insurance",
            "Investments",
            "Advisors",
        ],
    ),
    (
        Label::Energy,
        &["Energy", "Resources", "Petroleum", "Gas"],
    ),
];

const ACTION_RULES: [(&str, Label); 3] = [
    ("upgraded", Label::BullishSignal),
    ("downgraded", Label::BearishSignal),
    ("initiated", Label::NewCoverage),
];

const HIGH_RISK_BELOW_PCT: f64 = -20.0;
const GROWTH_ABOVE_PCT: f64 = 10.0;

/// Computes the label set of `rating` and stores it on the rating.
///
/// Any labels already present are replaced, so reclassifying is idempotent.
pub fn classify(rating: &mut StockRating) -> BTreeSet<Label> {
    let labels = derive_labels(rating);
    rating.classifications = labels.iter().map(|l| l.as_str().to_string()).collect();
    labels
}

pub fn classify_batch(batch: &mut [StockRating]) {
    for rating in batch.iter_mut() {
        classify(rating);
    }
}

/// Pure form of [`classify`].
pub fn derive_labels(rating: &StockRating) -> BTreeSet<Label> {
    let mut labels = BTreeSet::new();

    labels.extend(sector_label(&rating.company));
    labels.extend(momentum_label(rating));
    labels.extend(action_label(&rating.action));
    labels.extend(rating_label(&rating.rating_to));

    if labels.is_empty() {
        labels.insert(Label::Neutral);
    }
    labels
}

/// Case-sensitive keyword match; the first matching group wins. A non-blank
/// name matching no group is `Other Sector`.
fn sector_label(company: &str) -> Option<Label> {
    // Unlike a keyword miss, a blank name yields no sector at all, so an event
    // with no other signal still classifies as `Neutral`.
    if company.trim().is_empty() {
        return None;
    }
    let matched = SECTOR_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| company.contains(k)))
        .map(|(label, _)| *label);
    Some(matched.unwrap_or(Label::OtherSector))
}

fn momentum_label(rating: &StockRating) -> Option<Label> {
    if rating.target_from.trim().is_empty() && rating.target_to.trim().is_empty() {
        return None;
    }
    let pct = match rating.upside() {
        Ok(pct) => pct,
        Err(err) => {
            tracing::debug!(
                ticker = %rating.ticker,
                target_from = %rating.target_from,
                target_to = %rating.target_to,
                error = %err,
                "skipping target-price momentum"
            );
            return None;
        }
    };

    if pct < HIGH_RISK_BELOW_PCT {
        Some(Label::HighRiskSpeculative)
    } else if pct > GROWTH_ABOVE_PCT {
        Some(Label::PotentialGrowth)
    } else {
        None
    }
}

fn action_label(action: &str) -> Option<Label> {
    let lower = action.to_lowercase();
    ACTION_RULES
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, label)| *label)
}

fn rating_label(rating_to: &str) -> Option<Label> {
    match rating_to {
        "Buy" | "Outperform" | "Strong-Buy" => Some(Label::AnalystPositive),
        "Sell" | "Underweight" => Some(Label::AnalystNegative),
        _ => None,
    }
}
