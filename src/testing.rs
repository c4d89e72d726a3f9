//! Fixtures and in-memory collaborators shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use crate::data::accessor::{AccessorError, Applier, MarketAccessor, SourceHostAccessor};
use crate::data::types::{
    Distribution, MarketRef, OtherMarket, OutcomeType, OutcomeValue, PullRef, PullRequest,
    UserStats,
};
use crate::market::CreationRequest;

pub fn past() -> DateTime<Utc> {
    Utc::now() - Duration::days(1)
}

pub fn future() -> DateTime<Utc> {
    Utc::now() + Duration::days(1)
}

fn market(id: &str, outcome_type: OutcomeType) -> MarketRef {
    MarketRef {
        id: id.to_string(),
        url: format!("https://manifold.markets/test/{}", id),
        question: format!("Test market {}?", id),
        outcome_type,
        min_value: None,
        max_value: None,
        is_log_scale: false,
        answers: Vec::new(),
        close_time: None,
        is_resolved: false,
    }
}

pub fn binary_market() -> MarketRef {
    market("binary", OutcomeType::Binary)
}

pub fn numeric_market(min: f64, max: f64) -> MarketRef {
    MarketRef {
        min_value: Some(min),
        max_value: Some(max),
        ..market("numeric", OutcomeType::PseudoNumeric)
    }
}

pub fn categorical_market(answers: &[&str]) -> MarketRef {
    MarketRef {
        answers: answers.iter().map(|a| a.to_string()).collect(),
        ..market("categorical", OutcomeType::FreeResponse)
    }
}

/// Platform double with call counters. Markets fall back to a neutral value
/// (50%, the range midpoint, or a uniform distribution) when none is set.
#[derive(Default)]
pub struct MockPlatform {
    current: Option<OutcomeValue>,
    others: HashMap<String, OtherMarket>,
    users: HashMap<String, UserStats>,
    failing: HashSet<String>,
    markets: Mutex<HashMap<String, MarketRef>>,
    current_value_calls: AtomicUsize,
    other_market_calls: AtomicUsize,
}

impl MockPlatform {
    pub fn with_current(mut self, value: OutcomeValue) -> Self {
        self.current = Some(value);
        self
    }

    pub fn with_other(mut self, url: &str, closed: bool, resolved: bool) -> Self {
        let value = OutcomeValue::Probability(if resolved { 100.0 } else { 50.0 });
        self.others.insert(
            url.to_string(),
            OtherMarket {
                question: format!("Other market at {}", url),
                closed,
                resolved,
                value,
            },
        );
        self
    }

    pub fn with_other_value(mut self, url: &str, resolved: bool, value: OutcomeValue) -> Self {
        self.others.insert(
            url.to_string(),
            OtherMarket {
                question: format!("Other market at {}", url),
                closed: resolved,
                resolved,
                value,
            },
        );
        self
    }

    pub fn with_user(mut self, username: &str, stats: UserStats) -> Self {
        self.users.insert(username.to_string(), stats);
        self
    }

    /// Any read keyed by `key` (a URL or market id) fails
    pub fn failing(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    pub fn with_market(self, market: MarketRef) -> Self {
        self.set_market(market);
        self
    }

    pub fn set_market(&self, market: MarketRef) {
        if let Ok(mut markets) = self.markets.lock() {
            markets.insert(market.id.clone(), market);
        }
    }

    pub fn current_value_calls(&self) -> usize {
        self.current_value_calls.load(Ordering::SeqCst)
    }

    pub fn other_market_calls(&self) -> usize {
        self.other_market_calls.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> Result<(), AccessorError> {
        if self.failing.contains(key) {
            return Err(AccessorError::Request(format!("connection refused: {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketAccessor for MockPlatform {
    async fn get_current_value(&self, market: &MarketRef) -> Result<OutcomeValue, AccessorError> {
        self.current_value_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&market.url)?;
        if let Some(value) = &self.current {
            return Ok(value.clone());
        }
        let value = match market.outcome_type {
            OutcomeType::Binary => OutcomeValue::Probability(50.0),
            OutcomeType::PseudoNumeric => OutcomeValue::Numeric(
                (market.min_value.unwrap_or(0.0) + market.max_value.unwrap_or(0.0)) / 2.0,
            ),
            _ => {
                let share = 100.0 / market.answers.len().max(1) as f64;
                let dist: Distribution = (0..market.answers.len()).map(|i| (i, share)).collect();
                OutcomeValue::Distribution(dist)
            }
        };
        Ok(value)
    }

    async fn get_other_market(&self, url: &str) -> Result<OtherMarket, AccessorError> {
        self.other_market_calls.fetch_add(1, Ordering::SeqCst);
        self.check(url)?;
        self.others
            .get(url)
            .cloned()
            .ok_or_else(|| AccessorError::NotFound(url.to_string()))
    }

    async fn get_market(&self, id: &str) -> Result<MarketRef, AccessorError> {
        self.check(id)?;
        self.markets
            .lock()
            .map_err(|e| AccessorError::Unexpected(e.to_string()))?
            .get(id)
            .cloned()
            .ok_or_else(|| AccessorError::NotFound(id.to_string()))
    }

    async fn get_user(&self, username: &str) -> Result<UserStats, AccessorError> {
        self.check(username)?;
        self.users
            .get(username)
            .cloned()
            .ok_or_else(|| AccessorError::NotFound(username.to_string()))
    }
}

#[derive(Default)]
pub struct MockSourceHost {
    pulls: HashMap<PullRef, PullRequest>,
    calls: AtomicUsize,
}

impl MockSourceHost {
    pub fn with_pull(mut self, pull: PullRef, pr: PullRequest) -> Self {
        self.pulls.insert(pull, pr);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceHostAccessor for MockSourceHost {
    async fn get_pull_request(&self, pull: &PullRef) -> Result<PullRequest, AccessorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pulls
            .get(pull)
            .cloned()
            .ok_or_else(|| AccessorError::NotFound(pull.to_string()))
    }
}

/// Records every write instead of performing it
#[derive(Default)]
pub struct RecordingApplier {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingApplier {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl Applier for RecordingApplier {
    async fn resolve(&self, market: &MarketRef, value: &OutcomeValue) -> anyhow::Result<()> {
        self.record(format!("resolve {} {}", market.id, value));
        Ok(())
    }

    async fn cancel(&self, market: &MarketRef) -> anyhow::Result<()> {
        self.record(format!("cancel {}", market.id));
        Ok(())
    }

    async fn create_market(&self, request: &CreationRequest) -> anyhow::Result<MarketRef> {
        self.record(format!("create {}", request.question));
        Ok(MarketRef {
            id: format!("created-{}", request.question.len()),
            url: format!("https://manifold.markets/test/created-{}", request.question.len()),
            question: request.question.clone(),
            outcome_type: request.outcome_type,
            min_value: request.min_value,
            max_value: request.max_value,
            is_log_scale: request.is_log_scale,
            answers: request.answers.clone(),
            close_time: Some(request.close_time),
            is_resolved: false,
        })
    }
}
