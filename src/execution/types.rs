use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::data::types::OutcomeValue;

/// Answer from the confirmation channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Resolve,
    Cancel,
    Skip,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Resolve => write!(f, "resolve"),
            Decision::Cancel => write!(f, "cancel"),
            Decision::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for Decision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resolve" | "r" | "yes" | "y" => Ok(Decision::Resolve),
            "cancel" | "c" => Ok(Decision::Cancel),
            "skip" | "s" | "no" | "n" | "" => Ok(Decision::Skip),
            other => anyhow::bail!("Unknown decision: {}", other),
        }
    }
}

/// What the scheduler wants to do with a triggered market
#[derive(Debug, Clone)]
pub struct Proposal {
    pub market_id: String,
    pub question: String,
    pub url: String,
    pub value: OutcomeValue,
    pub explanation: String,
}

impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.question)?;
        writeln!(f, "{}", self.url)?;
        writeln!(f)?;
        writeln!(f, "{}", self.explanation.trim_end())?;
        writeln!(f)?;
        write!(f, "Proposed resolution: {}", self.value)
    }
}

/// Where a market is within one check cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Idle,
    Due,
    Evaluating,
    Triggered,
    AwaitingConfirmation,
    Resolved,
    Cancelled,
    Skipped,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckState::Idle => "idle",
            CheckState::Due => "due",
            CheckState::Evaluating => "evaluating",
            CheckState::Triggered => "triggered",
            CheckState::AwaitingConfirmation => "awaiting confirmation",
            CheckState::Resolved => "resolved",
            CheckState::Cancelled => "cancelled",
            CheckState::Skipped => "skipped",
        };
        write!(f, "{}", name)
    }
}

/// Result of one pass over the store
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub created: usize,
    pub checked: usize,
    pub resolved: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_parse() {
        assert_eq!("Resolve".parse::<Decision>().unwrap(), Decision::Resolve);
        assert_eq!("c".parse::<Decision>().unwrap(), Decision::Cancel);
        assert_eq!("".parse::<Decision>().unwrap(), Decision::Skip);
        assert!("maybe".parse::<Decision>().is_err());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CheckState::AwaitingConfirmation.to_string(), "awaiting confirmation");
        assert_eq!(CheckState::Cancelled.to_string(), "cancelled");
    }
}
