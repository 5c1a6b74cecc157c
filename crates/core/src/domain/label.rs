use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed vocabulary of classification labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Biotech,
    Tech,
    Financial,
    Energy,
    #[serde(rename = "Other Sector")]
    OtherSector,
    #[serde(rename = "High-Risk Speculative")]
    HighRiskSpeculative,
    #[serde(rename = "Potential Growth")]
    PotentialGrowth,
    #[serde(rename = "Bullish Signal")]
    BullishSignal,
    #[serde(rename = "Bearish Signal")]
    BearishSignal,
    #[serde(rename = "New Coverage")]
    NewCoverage,
    #[serde(rename = "Analyst Positive")]
    AnalystPositive,
    #[serde(rename = "Analyst Negative")]
    AnalystNegative,
    Neutral,
}

impl Label {
    pub const ALL: [Label; 13] = [
        Label::Biotech,
        Label::Tech,
        Label::Financial,
        Label::Energy,
        Label::OtherSector,
        Label::HighRiskSpeculative,
        Label::PotentialGrowth,
        Label::BullishSignal,
        Label::BearishSignal,
        Label::NewCoverage,
        Label::AnalystPositive,
        Label::AnalystNegative,
        Label::Neutral,
    ];

    /// Labels that keep an event out of the recommendation list.
    pub const RISK_FLAGS: [Label; 3] = [
        Label::HighRiskSpeculative,
        Label::BearishSignal,
        Label::AnalystNegative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Biotech => "Biotech",
            Label::Tech => "Tech",
            Label::Financial => "Financial",
            Label::Energy => "Energy",
            Label::OtherSector => "Other Sector",
            Label::HighRiskSpeculative => "High-Risk Speculative",
            Label::PotentialGrowth => "Potential Growth",
            Label::BullishSignal => "Bullish Signal",
            Label::BearishSignal => "Bearish Signal",
            Label::NewCoverage => "New Coverage",
            Label::AnalystPositive => "Analyst Positive",
            Label::AnalystNegative => "Analyst Negative",
            Label::Neutral => "Neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Label> {
        Label::ALL.into_iter().find(|l| l.as_str() == s)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
