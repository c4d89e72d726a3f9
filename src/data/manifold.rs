use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};
use crate::data::accessor::{AccessorError, Applier, MarketAccessor};
use crate::data::types::{
    Distribution, MarketRef, OtherMarket, OutcomeType, OutcomeValue, PeriodStats, UserStats,
};
use crate::market::CreationRequest;

/// REST client for a Manifold-style market platform
pub struct ManifoldClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAnswer {
    #[serde(default)]
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    probability: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMarket {
    id: String,
    url: String,
    question: String,
    outcome_type: OutcomeType,
    #[serde(default)]
    probability: Option<f64>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    is_log_scale: bool,
    #[serde(default)]
    answers: Vec<ApiAnswer>,
    #[serde(default)]
    close_time: Option<i64>,
    #[serde(default)]
    is_resolved: bool,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    resolution_probability: Option<f64>,
}

impl ApiMarket {
    fn close_time(&self) -> Option<DateTime<Utc>> {
        self.close_time.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    fn snapshot(&self) -> MarketRef {
        MarketRef {
            id: self.id.clone(),
            url: self.url.clone(),
            question: self.question.clone(),
            outcome_type: self.outcome_type,
            min_value: self.min,
            max_value: self.max,
            is_log_scale: self.is_log_scale,
            answers: self.answers.iter().map(|a| a.text.clone()).collect(),
            close_time: self.close_time(),
            is_resolved: self.is_resolved,
        }
    }

    fn closed(&self) -> bool {
        self.is_resolved || self.close_time().map_or(false, |at| at < Utc::now())
    }

    /// Probability as a fraction, preferring the resolution once resolved
    fn binary_fraction(&self) -> Result<f64, AccessorError> {
        if self.is_resolved {
            match self.resolution.as_deref() {
                Some("YES") => return Ok(1.0),
                Some("NO") => return Ok(0.0),
                _ => {
                    if let Some(p) = self.resolution_probability {
                        return Ok(p);
                    }
                }
            }
        }
        self.probability
            .ok_or_else(|| AccessorError::Unexpected(format!("market {} has no probability", self.id)))
    }

    fn answer_distribution(&self) -> Distribution {
        self.answers
            .iter()
            .enumerate()
            .map(|(index, answer)| (index, answer.probability * 100.0))
            .collect()
    }

    /// Resolved value when resolved, live value otherwise
    fn value(&self) -> Result<OutcomeValue, AccessorError> {
        if self.is_resolved && self.resolution.as_deref() == Some("CANCEL") {
            return Ok(OutcomeValue::Cancel);
        }
        match self.outcome_type {
            OutcomeType::Binary => Ok(OutcomeValue::Probability(self.binary_fraction()? * 100.0)),
            OutcomeType::PseudoNumeric => {
                let (min, max) = (self.min.unwrap_or(0.0), self.max.unwrap_or(0.0));
                Ok(OutcomeValue::Numeric(prob_to_number(
                    self.binary_fraction()?,
                    min,
                    max,
                    self.is_log_scale,
                )))
            }
            OutcomeType::FreeResponse | OutcomeType::MultipleChoice => {
                Ok(OutcomeValue::Distribution(self.answer_distribution()))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUser {
    #[serde(default)]
    profit_cached: PeriodStats,
    #[serde(default)]
    creator_volume_cached: PeriodStats,
}

impl From<ApiUser> for UserStats {
    fn from(user: ApiUser) -> Self {
        UserStats {
            profit: user.profit_cached,
            created_volume: user.creator_volume_cached,
        }
    }
}

/// Map a fraction in [0, 1] onto a numeric market's range
pub fn prob_to_number(prob: f64, min: f64, max: f64, is_log_scale: bool) -> f64 {
    if is_log_scale {
        10f64.powf(prob * (max - min + 1.0).log10()) + min - 1.0
    } else {
        prob * (max - min) + min
    }
}

/// Inverse of [`prob_to_number`]
pub fn number_to_prob(number: f64, min: f64, max: f64, is_log_scale: bool) -> f64 {
    let prob = if is_log_scale {
        (number - min + 1.0).log10() / (max - min + 1.0).log10()
    } else {
        (number - min) / (max - min)
    };
    prob.clamp(0.0, 1.0)
}

/// Market slug from a URL like `https://manifold.markets/user/some-slug`
pub fn slug_from_url(url: &str) -> Option<String> {
    static SLUG: OnceLock<Option<Regex>> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^https?://[^/]+/[^/]+/([^/?#]+)").ok())
        .as_ref()?
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// Body of the resolve call for a conformed value
fn resolution_body(market: &MarketRef, value: &OutcomeValue) -> Result<Value> {
    let body = match (market.outcome_type, value) {
        (_, OutcomeValue::Cancel) => json!({ "outcome": "CANCEL" }),
        (OutcomeType::Binary, OutcomeValue::Probability(p)) if *p >= 100.0 => json!({ "outcome": "YES" }),
        (OutcomeType::Binary, OutcomeValue::Probability(p)) if *p <= 0.0 => json!({ "outcome": "NO" }),
        (OutcomeType::Binary, OutcomeValue::Probability(p)) => {
            json!({ "outcome": "MKT", "probabilityInt": p.round() as i64 })
        }
        (OutcomeType::PseudoNumeric, OutcomeValue::Numeric(x)) => {
            let min = market.min_value.unwrap_or(0.0);
            let max = market.max_value.unwrap_or(0.0);
            let prob = number_to_prob(*x, min, max, market.is_log_scale);
            json!({ "outcome": "MKT", "value": x, "probabilityInt": (prob * 100.0).round() as i64 })
        }
        (t, OutcomeValue::Distribution(dist)) if t.is_categorical() => {
            let resolutions: Vec<Value> = dist
                .iter()
                .filter(|(_, weight)| **weight > 0.0)
                .map(|(index, weight)| json!({ "answer": index, "pct": weight }))
                .collect();
            json!({ "outcome": "MKT", "resolutions": resolutions })
        }
        (t, v) => anyhow::bail!("Cannot resolve a {} market to {}", t, v.variant_name()),
    };
    Ok(body)
}

fn creation_body(request: &CreationRequest) -> Value {
    let mut body = json!({
        "outcomeType": request.outcome_type,
        "question": request.question,
        "descriptionMarkdown": request.full_description(),
        "closeTime": request.close_time.timestamp_millis(),
    });
    match request.outcome_type {
        OutcomeType::Binary => {
            body["initialProb"] = json!(request.initial_probability.unwrap_or(50.0).round() as i64);
        }
        OutcomeType::PseudoNumeric => {
            body["min"] = json!(request.min_value);
            body["max"] = json!(request.max_value);
            body["isLogScale"] = json!(request.is_log_scale);
            body["initialValue"] = json!(request.initial_value);
        }
        OutcomeType::FreeResponse | OutcomeType::MultipleChoice => {
            body["answers"] = json!(request.answers);
        }
    }
    if !request.tags.is_empty() {
        body["groupIds"] = json!(request.tags);
    }
    body
}

/// Opening bets for a freshly created categorical market, one per weighted answer
fn initial_bets(market: &ApiMarket, values: &BTreeMap<String, f64>) -> Result<Vec<Value>> {
    values
        .iter()
        .map(|(text, amount)| {
            let answer = market
                .answers
                .iter()
                .find(|a| &a.text == text)
                .with_context(|| format!("Market {} has no answer {:?}", market.id, text))?;
            Ok(json!({
                "contractId": market.id,
                "amount": amount,
                "outcome": "YES",
                "answerId": answer.id,
            }))
        })
        .collect()
}

impl ManifoldClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("market-resolver/0.1")
            .build()
            .context("Failed to build platform HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let parsed = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;
        Ok(parsed)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<ApiMarket> {
        self.get(&format!("/v0/market/{}", id)).await
    }

    async fn fetch_by_url(&self, url: &str) -> Result<ApiMarket> {
        let slug = slug_from_url(url).with_context(|| format!("No market slug in {}", url))?;
        self.get(&format!("/v0/slug/{}", slug)).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let key = self.api_key.as_deref().context("MANIFOLD_API_KEY is required for writes")?;
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {} {}", url, body);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", key))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to post to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {}: {}", url, status, text);
        }
        response.json().await.context("Failed to parse platform response")
    }

    /// Look up a market by its URL and return its snapshot
    pub async fn market_by_url(&self, url: &str) -> Result<MarketRef> {
        Ok(self.fetch_by_url(url).await?.snapshot())
    }
}

#[async_trait]
impl MarketAccessor for ManifoldClient {
    async fn get_current_value(&self, market: &MarketRef) -> Result<OutcomeValue, AccessorError> {
        self.fetch_by_id(&market.id)
            .await
            .map_err(AccessorError::request)?
            .value()
    }

    async fn get_other_market(&self, url: &str) -> Result<OtherMarket, AccessorError> {
        let market = self.fetch_by_url(url).await.map_err(AccessorError::request)?;
        Ok(OtherMarket {
            question: market.question.clone(),
            closed: market.closed(),
            resolved: market.is_resolved,
            value: market.value()?,
        })
    }

    async fn get_market(&self, id: &str) -> Result<MarketRef, AccessorError> {
        Ok(self.fetch_by_id(id).await.map_err(AccessorError::request)?.snapshot())
    }

    async fn get_user(&self, username: &str) -> Result<UserStats, AccessorError> {
        let user: ApiUser = self
            .get(&format!("/v0/user/{}", username))
            .await
            .map_err(AccessorError::request)?;
        Ok(user.into())
    }
}

#[async_trait]
impl Applier for ManifoldClient {
    async fn resolve(&self, market: &MarketRef, value: &OutcomeValue) -> Result<()> {
        let body = resolution_body(market, value)?;
        self.post(&format!("/v0/market/{}/resolve", market.id), &body).await?;
        info!("Resolved {} to {}", market.id, value);
        Ok(())
    }

    async fn cancel(&self, market: &MarketRef) -> Result<()> {
        self.post(&format!("/v0/market/{}/resolve", market.id), &json!({ "outcome": "CANCEL" }))
            .await?;
        info!("Cancelled {}", market.id);
        Ok(())
    }

    async fn create_market(&self, request: &CreationRequest) -> Result<MarketRef> {
        let response = self.post("/v0/market", &creation_body(request)).await?;
        let id = response["id"]
            .as_str()
            .context("Platform did not return a market id")?
            .to_string();
        info!("Created market {}: {}", id, request.question);

        let market = self.fetch_by_id(&id).await?;
        for bet in initial_bets(&market, &request.initial_values)? {
            self.post("/v0/bet", &bet).await?;
        }
        if !request.initial_values.is_empty() {
            info!("Placed {} opening bets on {}", request.initial_values.len(), id);
        }
        Ok(market.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{TriggerRule, ValueRule};
    use crate::testing::{binary_market, categorical_market, numeric_market};

    fn api_market(value: Value) -> ApiMarket {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_binary_snapshot_and_value() {
        let market = api_market(json!({
            "id": "abc",
            "url": "https://manifold.markets/user/will-it-rain",
            "question": "Will it rain?",
            "outcomeType": "BINARY",
            "probability": 0.42,
            "closeTime": 1_700_000_000_000i64,
            "isResolved": false,
        }));
        let snapshot = market.snapshot();
        assert_eq!(snapshot.outcome_type, OutcomeType::Binary);
        assert_eq!(snapshot.close_time.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(market.value().unwrap(), OutcomeValue::Probability(42.0));
    }

    #[test]
    fn test_resolved_value_wins() {
        let market = api_market(json!({
            "id": "abc",
            "url": "https://manifold.markets/user/x",
            "question": "X?",
            "outcomeType": "BINARY",
            "probability": 0.42,
            "isResolved": true,
            "resolution": "YES",
        }));
        assert!(market.closed());
        assert_eq!(market.value().unwrap(), OutcomeValue::Probability(100.0));

        let cancelled = api_market(json!({
            "id": "c",
            "url": "https://manifold.markets/user/c",
            "question": "C?",
            "outcomeType": "BINARY",
            "isResolved": true,
            "resolution": "CANCEL",
        }));
        assert_eq!(cancelled.value().unwrap(), OutcomeValue::Cancel);
    }

    #[test]
    fn test_user_stats_from_cached_fields() {
        let user: ApiUser = serde_json::from_value(json!({
            "id": "u1",
            "username": "alice",
            "profitCached": { "daily": 3.5, "weekly": 10.0, "monthly": 22.0, "allTime": 140.0 },
            "creatorVolumeCached": { "allTime": 5000.0 },
        }))
        .unwrap();
        let stats = UserStats::from(user);
        assert_eq!(stats.profit.get(crate::data::types::Period::Weekly), 10.0);
        assert_eq!(stats.created_volume.all_time, 5000.0);
        assert_eq!(stats.created_volume.daily, 0.0);
    }

    #[test]
    fn test_initial_bets_by_answer_id() {
        let market = api_market(json!({
            "id": "fr",
            "url": "https://manifold.markets/user/fr",
            "question": "Which?",
            "outcomeType": "FREE_RESPONSE",
            "answers": [
                {"id": "a0", "text": "Rust", "probability": 0.5},
                {"id": "a1", "text": "Go", "probability": 0.5},
            ],
        }));
        let values = BTreeMap::from([("Go".to_string(), 25.0)]);
        let bets = initial_bets(&market, &values).unwrap();
        assert_eq!(
            bets,
            vec![json!({ "contractId": "fr", "amount": 25.0, "outcome": "YES", "answerId": "a1" })]
        );

        let missing = BTreeMap::from([("Zig".to_string(), 5.0)]);
        assert!(initial_bets(&market, &missing).is_err());
        assert!(initial_bets(&market, &BTreeMap::new()).unwrap().is_empty());
    }

    #[test]
    fn test_answers_become_distribution() {
        let market = api_market(json!({
            "id": "fr",
            "url": "https://manifold.markets/user/fr",
            "question": "Which?",
            "outcomeType": "FREE_RESPONSE",
            "answers": [
                {"text": "A", "probability": 0.25},
                {"text": "B", "probability": 0.75},
            ],
        }));
        assert_eq!(market.snapshot().answers, vec!["A", "B"]);
        assert_eq!(
            market.value().unwrap(),
            OutcomeValue::Distribution(Distribution::from([(0, 25.0), (1, 75.0)]))
        );
    }

    #[test]
    fn test_number_conversions() {
        assert_eq!(prob_to_number(0.5, 0.0, 100.0, false), 50.0);
        assert!((number_to_prob(50.0, 0.0, 100.0, false) - 0.5).abs() < 1e-9);

        let x = prob_to_number(0.5, 0.0, 99.0, true);
        assert!((x - 9.0).abs() < 1e-9);
        assert!((number_to_prob(x, 0.0, 99.0, true) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_slug_from_url() {
        assert_eq!(
            slug_from_url("https://manifold.markets/user/will-it-rain?r=abc").as_deref(),
            Some("will-it-rain")
        );
        assert_eq!(slug_from_url("not a url"), None);
    }

    #[test]
    fn test_resolution_bodies() {
        let body = resolution_body(&binary_market(), &OutcomeValue::Probability(100.0)).unwrap();
        assert_eq!(body, json!({ "outcome": "YES" }));
        let body = resolution_body(&binary_market(), &OutcomeValue::Probability(37.4)).unwrap();
        assert_eq!(body, json!({ "outcome": "MKT", "probabilityInt": 37 }));

        let body = resolution_body(&numeric_market(0.0, 10.0), &OutcomeValue::Numeric(5.0)).unwrap();
        assert_eq!(body["probabilityInt"], json!(50));

        let market = categorical_market(&["A", "B", "C"]);
        let value = OutcomeValue::Distribution(Distribution::from([(0, 50.0), (1, 0.0), (2, 50.0)]));
        let body = resolution_body(&market, &value).unwrap();
        assert_eq!(body["resolutions"].as_array().map(Vec::len), Some(2));

        assert!(resolution_body(&binary_market(), &OutcomeValue::Numeric(1.0)).is_err());
        let body = resolution_body(&market, &OutcomeValue::Cancel).unwrap();
        assert_eq!(body, json!({ "outcome": "CANCEL" }));
    }

    #[test]
    fn test_creation_body_carries_explanation() {
        let request = CreationRequest {
            question: "Will PR 830 merge?".to_string(),
            description: String::new(),
            outcome_type: OutcomeType::Binary,
            close_time: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            initial_probability: Some(30.0),
            min_value: None,
            max_value: None,
            initial_value: None,
            is_log_scale: false,
            answers: Vec::new(),
            tags: Vec::new(),
            initial_values: Default::default(),
            time_rules: vec![TriggerRule::ThisMarketClosed { resolve_at: None }],
            value_rules: vec![ValueRule::CurrentValue],
            check_rate: 24.0,
            notes: String::new(),
        };
        let body = creation_body(&request);
        assert_eq!(body["outcomeType"], json!("BINARY"));
        assert_eq!(body["initialProb"], json!(30));
        assert!(body["descriptionMarkdown"]
            .as_str()
            .unwrap()
            .contains("If this market reaches its close date"));
    }
}
