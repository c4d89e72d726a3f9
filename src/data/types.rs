use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Answer index -> weight. Weights sum to 100 by convention.
pub type Distribution = BTreeMap<usize, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeType {
    Binary,
    PseudoNumeric,
    FreeResponse,
    MultipleChoice,
}

impl OutcomeType {
    /// Free response and multiple choice both resolve to a distribution over answers
    pub fn is_categorical(&self) -> bool {
        matches!(self, OutcomeType::FreeResponse | OutcomeType::MultipleChoice)
    }
}

impl fmt::Display for OutcomeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeType::Binary => write!(f, "BINARY"),
            OutcomeType::PseudoNumeric => write!(f, "PSEUDO_NUMERIC"),
            OutcomeType::FreeResponse => write!(f, "FREE_RESPONSE"),
            OutcomeType::MultipleChoice => write!(f, "MULTIPLE_CHOICE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OutcomeValue {
    Bool(bool),
    Probability(f64),
    Numeric(f64),
    Distribution(Distribution),
    /// Refund every trade; N/A on the platform
    Cancel,
}

impl OutcomeValue {
    pub fn variant_name(&self) -> &'static str {
        match self {
            OutcomeValue::Bool(_) => "Bool",
            OutcomeValue::Probability(_) => "Probability",
            OutcomeValue::Numeric(_) => "Numeric",
            OutcomeValue::Distribution(_) => "Distribution",
            OutcomeValue::Cancel => "Cancel",
        }
    }

    /// Certain distribution on a single answer
    pub fn single_answer(index: usize) -> Self {
        OutcomeValue::Distribution(BTreeMap::from([(index, 100.0)]))
    }
}

impl fmt::Display for OutcomeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeValue::Bool(true) => write!(f, "YES"),
            OutcomeValue::Bool(false) => write!(f, "NO"),
            OutcomeValue::Probability(p) => write!(f, "{}%", round_sig_figs(*p, 4)),
            OutcomeValue::Numeric(x) => write!(f, "{}", round_sig_figs(*x, 4)),
            OutcomeValue::Distribution(dist) => {
                let total: f64 = dist.values().sum();
                write!(f, "{{")?;
                for (i, (idx, weight)) in dist.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let pct = if total > 0.0 { weight * 100.0 / total } else { 0.0 };
                    write!(f, "{}: {}%", idx, round_sig_figs(pct, 4))?;
                }
                write!(f, "}}")
            }
            OutcomeValue::Cancel => write!(f, "CANCEL"),
        }
    }
}

/// Format a number with a fixed count of significant figures
pub fn round_sig_figs(num: f64, sig_figs: i32) -> String {
    if num == 0.0 || !num.is_finite() {
        return format!("{}", num);
    }
    let magnitude = num.abs().log10().floor() as i32;
    let decimals = (sig_figs - 1 - magnitude).max(0) as usize;
    let factor = 10f64.powi(sig_figs - 1 - magnitude);
    let rounded = (num * factor).round() / factor;
    format!("{:.*}", decimals, rounded)
}

/// Snapshot of a market as reported by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRef {
    pub id: String,
    pub url: String,
    pub question: String,
    pub outcome_type: OutcomeType,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub is_log_scale: bool,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_resolved: bool,
}

/// Another market, as seen through the lookup capability
#[derive(Debug, Clone, PartialEq)]
pub struct OtherMarket {
    pub question: String,
    pub closed: bool,
    pub resolved: bool,
    pub value: OutcomeValue,
}

/// Window a cached user statistic covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Period {
    #[default]
    AllTime,
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::AllTime => "allTime",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allTime" => Ok(Period::AllTime),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            other => Err(format!("unknown period {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    #[serde(default)]
    pub all_time: f64,
    #[serde(default)]
    pub daily: f64,
    #[serde(default)]
    pub weekly: f64,
    #[serde(default)]
    pub monthly: f64,
}

impl PeriodStats {
    pub fn get(&self, period: Period) -> f64 {
        match period {
            Period::AllTime => self.all_time,
            Period::Daily => self.daily,
            Period::Weekly => self.weekly,
            Period::Monthly => self.monthly,
        }
    }
}

/// Cached statistics of a platform user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserStats {
    pub profit: PeriodStats,
    pub created_volume: PeriodStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

impl PrState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PrState::Open)
    }
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrState::Open => write!(f, "open"),
            PrState::Merged => write!(f, "merged"),
            PrState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub state: PrState,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Identifies one pull request on the source-hosting platform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PullRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_sig_figs() {
        assert_eq!(round_sig_figs(70.0, 4), "70.00");
        assert_eq!(round_sig_figs(0.123456, 4), "0.1235");
        assert_eq!(round_sig_figs(12345.0, 4), "12350");
    }

    #[test]
    fn test_distribution_display() {
        let value = OutcomeValue::Distribution(BTreeMap::from([(0, 1.0), (1, 3.0)]));
        assert_eq!(value.to_string(), "{0: 25.00%, 1: 75.00%}");
    }

    #[test]
    fn test_cancel_serializes_without_value() {
        let json = serde_json::to_value(OutcomeValue::Cancel).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "cancel" }));
        assert_eq!(serde_json::from_value::<OutcomeValue>(json).unwrap(), OutcomeValue::Cancel);
        assert_eq!(OutcomeValue::Cancel.to_string(), "CANCEL");
    }

    #[test]
    fn test_period_names() {
        assert_eq!("weekly".parse::<Period>(), Ok(Period::Weekly));
        assert!("yearly".parse::<Period>().is_err());
        let stats = PeriodStats { all_time: 9.0, daily: 1.0, weekly: 3.0, monthly: 5.0 };
        assert_eq!(stats.get(Period::Monthly), 5.0);
        assert_eq!(Period::default().as_str(), "allTime");
    }
}
