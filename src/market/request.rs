use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::data::types::{MarketRef, OutcomeType};
use crate::market::model::{explain_rules, validate_rules, Market};
use crate::rules::{RuleError, TriggerRule, ValueRule};

fn default_check_rate() -> f64 {
    24.0
}

/// A market waiting to be created on the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationRequest {
    pub question: String,
    #[serde(default)]
    pub description: String,
    pub outcome_type: OutcomeType,
    pub close_time: DateTime<Utc>,
    #[serde(default)]
    pub initial_probability: Option<f64>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub initial_value: Option<f64>,
    #[serde(default)]
    pub is_log_scale: bool,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Answer text -> opening bet placed right after a categorical market is created
    #[serde(default)]
    pub initial_values: BTreeMap<String, f64>,
    pub time_rules: Vec<TriggerRule>,
    pub value_rules: Vec<ValueRule>,
    #[serde(default = "default_check_rate")]
    pub check_rate: f64,
    #[serde(default)]
    pub notes: String,
}

impl CreationRequest {
    pub fn validate(&self) -> Result<(), RuleError> {
        validate_rules(&self.time_rules, &self.value_rules, self.check_rate)?;
        match self.outcome_type {
            OutcomeType::PseudoNumeric => match (self.min_value, self.max_value) {
                (Some(min), Some(max)) if min < max => Ok(()),
                _ => Err(RuleError::InvalidMarket(
                    "numeric markets need min_value < max_value".to_string(),
                )),
            },
            OutcomeType::MultipleChoice if self.answers.len() < 2 => Err(RuleError::InvalidMarket(
                "multiple choice markets need at least two answers".to_string(),
            )),
            _ => Ok(()),
        }?;
        if self.initial_values.is_empty() {
            return Ok(());
        }
        if !self.outcome_type.is_categorical() {
            return Err(RuleError::InvalidMarket(format!(
                "initial values only apply to categorical markets, not {}",
                self.outcome_type
            )));
        }
        for (answer, weight) in &self.initial_values {
            if !(weight.is_finite() && *weight > 0.0) {
                return Err(RuleError::InvalidMarket(format!(
                    "initial value for {:?} must be positive",
                    answer
                )));
            }
            if !self.answers.contains(answer) {
                return Err(RuleError::InvalidMarket(format!("{:?} is not one of the answers", answer)));
            }
        }
        Ok(())
    }

    /// Description as posted: the author's text followed by the rule explanation
    pub fn full_description(&self) -> String {
        let explanation = explain_rules(&self.time_rules, &self.value_rules);
        if self.description.trim().is_empty() {
            explanation
        } else {
            format!("{}\n\n{}", self.description.trim_end(), explanation)
        }
    }

    /// Bind the request's rules to the market the platform created
    pub fn into_market(self, created: MarketRef) -> Result<Market, RuleError> {
        let market =
            Market::new(created, self.time_rules, self.value_rules, self.check_rate)?.with_notes(self.notes);
        if self.initial_values.is_empty() {
            return Ok(market);
        }
        Ok(market.with_initial_values(self.initial_values))
    }
}
