//! "Best investments" scoring.
//!
//! score = min(2 × upside%, 100) + Σ label bonus + rating bonus
//!
//! Events whose target prices cannot be parsed keep their label and rating
//! bonuses and get no growth contribution.

use crate::domain::label::Label;
use crate::domain::recommendation::Recommendation;
use crate::domain::stock::StockRating;

const GROWTH_CAP: f64 = 100.0;
const GROWTH_MULTIPLIER: f64 = 2.0;
const RATIONALE_UPSIDE_PCT: f64 = 10.0;

fn label_bonus(label: Label) -> f64 {
    match label {
        Label::PotentialGrowth => 30.0,
        Label::BullishSignal => 25.0,
        Label::NewCoverage => 20.0,
        Label::AnalystPositive => 15.0,
        Label::Tech => 10.0,
        Label::Biotech => 8.0,
        _ => 0.0,
    }
}

fn rating_bonus(rating_to: &str) -> f64 {
    match rating_to {
        "Strong-Buy" => 40.0,
        "Outperform" => 30.0,
        "Buy" => 20.0,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub total: f64,
    /// `None` when the target prices were unusable.
    pub upside: Option<f64>,
}

pub fn score(rating: &StockRating) -> Score {
    let upside = match rating.upside() {
        Ok(u) => Some(u),
        Err(err) => {
            tracing::warn!(
                ticker = %rating.ticker,
                target_from = %rating.target_from,
                target_to = %rating.target_to,
                error = %err,
                "unusable target prices; scoring without growth"
            );
            None
        }
    };

    let growth = upside
        .map(|u| (u * GROWTH_MULTIPLIER).min(GROWTH_CAP))
        .unwrap_or(0.0);

    // Stored labels may repeat; each entry counts.
    let labels: f64 = rating
        .classifications
        .iter()
        .filter_map(|c| Label::parse(c))
        .map(label_bonus)
        .sum();

    Score {
        total: growth + labels + rating_bonus(&rating.rating_to),
        upside,
    }
}

pub fn rationale(rating: &StockRating, upside: Option<f64>) -> String {
    let mut reasons: Vec<String> = Vec::new();

    if let Some(u) = upside.filter(|u| *u > RATIONALE_UPSIDE_PCT) {
        reasons.push(format!("Potential of {u:.1}%"));
    }
    let phrases = [
        (Label::BullishSignal, "Recent upgrade"),
        (Label::NewCoverage, "New coverage"),
        (Label::Tech, "Technology sector"),
        (Label::Biotech, "Biotechnology sector"),
    ];
    for (label, phrase) in phrases {
        if rating.has_label(label.as_str()) {
            reasons.push(phrase.to_string());
        }
    }

    if reasons.is_empty() {
        "Solid fundamentals".to_string()
    } else {
        reasons.join(", ")
    }
}

/// Scores every event and returns the best `limit`, highest first.
///
/// Equal scores keep their input order.
pub fn rank<'a, I>(events: I, limit: usize) -> Vec<Recommendation>
where
    I: IntoIterator<Item = &'a StockRating>,
{
    let mut scored: Vec<(Score, &StockRating)> =
        events.into_iter().map(|r| (score(r), r)).collect();

    // `sort_by` is stable.
    scored.sort_by(|a, b| {
        b.0.total
            .partial_cmp(&a.0.total)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    scored
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(idx, (s, r))| Recommendation {
            position: idx + 1,
            ticker: r.ticker.clone(),
            company: r.company.clone(),
            score: s.total,
            rationale: rationale(r, s.upside),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ticker: &str, labels: &[&str], rating_to: &str, from: &str, to: &str) -> StockRating {
        StockRating {
            ticker: ticker.to_string(),
            company: format!("{ticker} Inc."),
            classifications: labels.iter().map(|s| s.to_string()).collect(),
            rating_to: rating_to.to_string(),
            target_from: from.to_string(),
            target_to: to.to_string(),
            ..Default::default()
        }
    }

    fn fixture() -> Vec<StockRating> {
        vec![
            event(
                "AAPL",
                &["Potential Growth", "Bullish Signal"],
                "Strong-Buy",
                "$100.00",
                "$115.00",
            ),
            event("TSLA", &["High-Risk Speculative"], "Buy", "$200.00", "$240.00"),
            event(
                "MSFT",
                &["Potential Growth", "New Coverage"],
                "Outperform",
                "$150.00",
                "$168.00",
            ),
        ]
    }

    #[test]
    fn top_two_by_score() {
        let events = fixture();
        let recs = rank(&events, 2);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].ticker, "AAPL");
        assert_eq!(recs[1].ticker, "MSFT");
        assert_eq!(recs[0].position, 1);
        assert_eq!(recs[1].position, 2);
        for limit in 0..=2 {
            assert!(rank(&events, limit).iter().all(|r| r.ticker != "TSLA"));
        }
    }

    #[test]
    fn score_components() {
        let events = fixture();
        // 15% upside -> 30, labels 30 + 25, Strong-Buy 40.
        assert!((score(&events[0]).total - 125.0).abs() < 1e-9);
        // 12% upside -> 24, labels 30 + 20, Outperform 30.
        assert!((score(&events[2]).total - 104.0).abs() < 1e-9);
        // 20% upside -> 40, no bonus label, Buy 20.
        assert!((score(&events[1]).total - 60.0).abs() < 1e-9);
    }

    #[test]
    fn growth_is_capped() {
        let e = event("NVDA", &[], "", "$10.00", "$100.00");
        assert!((score(&e).total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn length_is_min_of_limit_and_input() {
        let events = fixture();
        assert_eq!(rank(&events, 10).len(), 3);
        assert!(rank(&events, 0).is_empty());
        assert!(rank(std::iter::empty(), 5).is_empty());
    }

    #[test]
    fn ties_keep_input_order() {
        let events: Vec<_> = ["A", "B", "C", "D"]
            .iter()
            .map(|t| event(t, &["Tech"], "Buy", "$10.00", "$10.00"))
            .collect();
        let tickers: Vec<_> = rank(&events, 4).into_iter().map(|r| r.ticker).collect();
        assert_eq!(tickers, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn output_is_descending() {
        let mut events = fixture();
        events.push(event("X", &[], "", "$1.00", "$1.00"));
        events.push(event("Y", &["Biotech"], "Buy", "$5.00", "$6.00"));
        let recs = rank(&events, events.len());
        assert!(recs.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn malformed_targets_do_not_abort_ranking() {
        let mut events = fixture();
        events.push(event("BAD", &["Bullish Signal"], "Buy", "$0.00", "$10.00"));
        events.push(event("UGLY", &[], "", "n/a", "$10.00"));
        let recs = rank(&events, 10);
        assert_eq!(recs.len(), 5);
        let bad = recs.iter().find(|r| r.ticker == "BAD").unwrap();
        assert!((bad.score - 45.0).abs() < 1e-9);
        assert_eq!(bad.rationale, "Recent upgrade");
        assert_eq!(recs.last().unwrap().ticker, "UGLY");
    }

    #[test]
    fn rationale_text() {
        let events = fixture();
        let recs = rank(&events, 1);
        assert_eq!(recs[0].rationale, "Potential of 15.0%, Recent upgrade");

        let e = event("NEW", &["New Coverage", "Tech", "Biotech"], "", "$10", "$10");
        assert_eq!(
            rationale(&e, e.upside().ok()),
            "New coverage, Technology sector, Biotechnology sector"
        );

        let plain = event("P", &["Financial"], "Hold", "$10", "$10.50");
        assert_eq!(rationale(&plain, plain.upside().ok()), "Solid fundamentals");
    }
}
