use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::data::accessor::{MarketAccessor, SourceHostAccessor};
use crate::data::types::{MarketRef, OutcomeValue};
use crate::rules::explain::kind_summary;
use crate::rules::outcome::conform;
use crate::rules::{EvalContext, RuleError, TriggerRule, ValueRule};

/// A managed market: platform snapshot, resolution rules and schedule.
///
/// Rule lists are fixed at construction. The scheduler only touches the
/// snapshot and `last_checked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MarketRecord")]
pub struct Market {
    market: MarketRef,
    time_rules: Vec<TriggerRule>,
    value_rules: Vec<ValueRule>,
    check_rate: f64,
    last_checked: Option<DateTime<Utc>>,
    notes: String,
    initial_values: Option<BTreeMap<String, f64>>,
}

#[derive(Deserialize)]
struct MarketRecord {
    market: MarketRef,
    time_rules: Vec<TriggerRule>,
    value_rules: Vec<ValueRule>,
    check_rate: f64,
    #[serde(default)]
    last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    initial_values: Option<BTreeMap<String, f64>>,
}

impl TryFrom<MarketRecord> for Market {
    type Error = RuleError;

    fn try_from(record: MarketRecord) -> Result<Self, Self::Error> {
        let mut market = Market::new(record.market, record.time_rules, record.value_rules, record.check_rate)?;
        market.last_checked = record.last_checked;
        market.notes = record.notes;
        market.initial_values = record.initial_values;
        Ok(market)
    }
}

/// Check the invariants every stored market satisfies
pub fn validate_rules(
    time_rules: &[TriggerRule],
    value_rules: &[ValueRule],
    check_rate: f64,
) -> Result<(), RuleError> {
    if time_rules.is_empty() {
        return Err(RuleError::InvalidMarket("at least one trigger rule is required".to_string()));
    }
    if value_rules.is_empty() {
        return Err(RuleError::InvalidMarket("at least one value rule is required".to_string()));
    }
    if !check_rate.is_finite() || check_rate < 0.0 {
        return Err(RuleError::InvalidMarket(format!(
            "check rate must be a non-negative number of hours, got {}",
            check_rate
        )));
    }
    Ok(())
}

/// Context-free explanation of a rule set, with a glossary of the kinds used
pub fn explain_rules(time_rules: &[TriggerRule], value_rules: &[ValueRule]) -> String {
    let mut out = String::from("This market will resolve if any of the following are true:\n");
    for rule in time_rules {
        out.push_str(&rule.explain_abstract(0));
    }
    out.push_str("\nIt will then resolve to:\n");
    for rule in value_rules {
        out.push_str(&rule.explain_abstract(0));
    }

    let mut kinds = Vec::new();
    for rule in time_rules {
        rule.collect_kinds(&mut kinds);
    }
    for rule in value_rules {
        rule.collect_kinds(&mut kinds);
    }
    out.push_str("\nRules used:\n");
    for kind in kinds {
        if let Some(summary) = kind_summary(kind) {
            out.push_str(&format!("- `{}`: {}\n", kind, summary));
        }
    }
    out
}

impl Market {
    pub fn new(
        market: MarketRef,
        time_rules: Vec<TriggerRule>,
        value_rules: Vec<ValueRule>,
        check_rate: f64,
    ) -> Result<Self, RuleError> {
        validate_rules(&time_rules, &value_rules, check_rate)?;
        Ok(Self {
            market,
            time_rules,
            value_rules,
            check_rate,
            last_checked: None,
            notes: String::new(),
            initial_values: None,
        })
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_initial_values(mut self, values: BTreeMap<String, f64>) -> Self {
        self.initial_values = Some(values);
        self
    }

    pub fn id(&self) -> &str {
        &self.market.id
    }

    pub fn market(&self) -> &MarketRef {
        &self.market
    }

    pub fn time_rules(&self) -> &[TriggerRule] {
        &self.time_rules
    }

    pub fn value_rules(&self) -> &[ValueRule] {
        &self.value_rules
    }

    pub fn check_rate(&self) -> f64 {
        self.check_rate
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.last_checked
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn initial_values(&self) -> Option<&BTreeMap<String, f64>> {
        self.initial_values.as_ref()
    }

    /// Replace the platform snapshot, keeping rules and schedule
    pub fn refresh(&mut self, snapshot: MarketRef) {
        self.market = snapshot;
    }

    pub fn mark_checked(&mut self, at: DateTime<Utc>) {
        self.last_checked = Some(at);
    }

    /// Never-checked markets are always due
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked {
            None => true,
            Some(last) => {
                let rate = Duration::milliseconds((self.check_rate * 3_600_000.0) as i64);
                now >= last + rate
            }
        }
    }

    /// Start an evaluation pass over this market's current snapshot
    pub fn context<'a>(
        &'a self,
        platform: &'a dyn MarketAccessor,
        source_host: &'a dyn SourceHostAccessor,
        now: DateTime<Utc>,
    ) -> EvalContext<'a> {
        EvalContext::new(&self.market, platform, source_host, now)
    }

    /// True when any top-level trigger fires. Checked in order; stops at the
    /// first true rule.
    pub async fn should_resolve(&self, ctx: &EvalContext<'_>) -> Result<bool, RuleError> {
        if ctx.market.is_resolved {
            return Ok(false);
        }
        for rule in &self.time_rules {
            if rule.evaluate(ctx).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Value to resolve to, in the market's outcome shape
    pub async fn resolve_to(&self, ctx: &EvalContext<'_>) -> Result<OutcomeValue, RuleError> {
        match self.value_rules.as_slice() {
            [rule] => conform(rule.evaluate(ctx).await?, ctx.market),
            rules => Err(RuleError::AmbiguousResolution(rules.len())),
        }
    }

    pub fn explain_abstract(&self) -> String {
        explain_rules(&self.time_rules, &self.value_rules)
    }

    pub async fn explain_specific(&self, ctx: &EvalContext<'_>) -> Result<String, RuleError> {
        let mut out = String::from("Resolution triggers (any):\n");
        let mut fired = false;
        for rule in &self.time_rules {
            if fired {
                out.push_str(&rule.explain_skipped(0));
                continue;
            }
            let (text, value) = rule.explain_with_value(ctx, 0).await?;
            out.push_str(&text);
            fired = value;
        }
        out.push_str("\nResolution value:\n");
        for rule in &self.value_rules {
            out.push_str(&rule.explain_specific(ctx, 0).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::outcome::ConstantValue;
    use crate::rules::random::RandomIndex;
    use crate::testing::{binary_market, categorical_market, future, past, MockPlatform, MockSourceHost};

    fn yes() -> ValueRule {
        ValueRule::constant(ConstantValue::Bool(true))
    }

    #[tokio::test]
    async fn test_should_resolve_any_top_level_rule() {
        let market = Market::new(
            binary_market(),
            vec![TriggerRule::at(future()), TriggerRule::at(past())],
            vec![yes()],
            1.0,
        )
        .unwrap();
        let platform = MockPlatform::default();
        let source_host = MockSourceHost::default();
        let ctx = market.context(&platform, &source_host, Utc::now());
        assert!(market.should_resolve(&ctx).await.unwrap());

        let market = Market::new(binary_market(), vec![TriggerRule::at(future())], vec![yes()], 1.0).unwrap();
        let ctx = market.context(&platform, &source_host, Utc::now());
        assert!(!market.should_resolve(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_already_resolved_never_fires() {
        let mut snapshot = binary_market();
        snapshot.is_resolved = true;
        let market = Market::new(snapshot, vec![TriggerRule::at(past())], vec![yes()], 1.0).unwrap();
        let platform = MockPlatform::default();
        let source_host = MockSourceHost::default();
        let ctx = market.context(&platform, &source_host, Utc::now());
        assert!(!market.should_resolve(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_to_conforms() {
        let market = Market::new(binary_market(), vec![TriggerRule::at(past())], vec![yes()], 1.0).unwrap();
        let platform = MockPlatform::default();
        let source_host = MockSourceHost::default();
        let ctx = market.context(&platform, &source_host, Utc::now());
        assert_eq!(market.resolve_to(&ctx).await.unwrap(), OutcomeValue::Probability(100.0));
    }

    #[tokio::test]
    async fn test_two_value_rules_are_ambiguous() {
        let market = Market::new(
            binary_market(),
            vec![TriggerRule::at(past())],
            vec![yes(), ValueRule::CurrentValue],
            1.0,
        )
        .unwrap();
        let platform = MockPlatform::default();
        let source_host = MockSourceHost::default();
        let ctx = market.context(&platform, &source_host, Utc::now());
        assert!(matches!(
            market.resolve_to(&ctx).await,
            Err(RuleError::AmbiguousResolution(2))
        ));
    }

    #[test]
    fn test_invariants() {
        assert!(matches!(
            Market::new(binary_market(), vec![], vec![yes()], 1.0),
            Err(RuleError::InvalidMarket(_))
        ));
        assert!(matches!(
            Market::new(binary_market(), vec![TriggerRule::at(past())], vec![], 1.0),
            Err(RuleError::InvalidMarket(_))
        ));
        assert!(matches!(
            Market::new(binary_market(), vec![TriggerRule::at(past())], vec![yes()], -1.0),
            Err(RuleError::InvalidMarket(_))
        ));
    }

    #[tokio::test]
    async fn test_pass_cache_dedups_reads() {
        let url = "https://manifold.markets/user/shared";
        let market = Market::new(
            binary_market(),
            vec![
                TriggerRule::OtherMarketResolved { url: url.to_string() },
                TriggerRule::OtherMarketClosed { url: url.to_string() },
            ],
            vec![ValueRule::OtherMarketValue { url: url.to_string() }],
            1.0,
        )
        .unwrap();
        let platform = MockPlatform::default().with_other(url, true, false);
        let source_host = MockSourceHost::default();
        let ctx = market.context(&platform, &source_host, Utc::now());

        assert!(market.should_resolve(&ctx).await.unwrap());
        assert_eq!(market.resolve_to(&ctx).await.unwrap(), OutcomeValue::Probability(50.0));
        assert_eq!(platform.other_market_calls(), 1);
        assert_eq!(ctx.cached_reads(), 1);

        // a new pass reads again
        let ctx = market.context(&platform, &source_host, Utc::now());
        assert!(market.should_resolve(&ctx).await.unwrap());
        assert_eq!(platform.other_market_calls(), 2);
    }

    #[test]
    fn test_is_due() {
        let mut market = Market::new(binary_market(), vec![TriggerRule::at(past())], vec![yes()], 2.0).unwrap();
        let now = Utc::now();
        assert!(market.is_due(now));
        market.mark_checked(now - Duration::hours(1));
        assert!(!market.is_due(now));
        market.mark_checked(now - Duration::hours(3));
        assert!(market.is_due(now));
    }

    #[test]
    fn test_json_round_trip() {
        let market = Market::new(
            categorical_market(&["A", "B", "C"]),
            vec![TriggerRule::not(TriggerRule::at(future()))],
            vec![ValueRule::Popular { size: 2 }],
            6.0,
        )
        .unwrap()
        .with_notes("imported")
        .with_initial_values(BTreeMap::from([("A".to_string(), 10.0)]));
        let text = serde_json::to_string(&market).unwrap();
        let back: Market = serde_json::from_str(&text).unwrap();
        assert_eq!(back, market);
    }

    #[test]
    fn test_deserialize_enforces_invariants() {
        let text = serde_json::json!({
            "market": binary_market(),
            "time_rules": [],
            "value_rules": [["manifold.this.CurrentValueRule", {}]],
            "check_rate": 1.0,
        })
        .to_string();
        assert!(serde_json::from_str::<Market>(&text).is_err());
    }

    #[test]
    fn test_abstract_lists_each_kind_once() {
        let market = Market::new(
            binary_market(),
            vec![
                TriggerRule::at(past()),
                TriggerRule::either(TriggerRule::at(past()), TriggerRule::at(future())),
            ],
            vec![yes()],
            1.0,
        )
        .unwrap();
        let text = market.explain_abstract();
        assert_eq!(text.matches("- `generic.ResolveAtTime`:").count(), 1);
        assert!(text.contains("- `generic.EitherRule`:"));
        assert!(text.contains("- `generic.ResolveToValue`:"));
    }

    #[tokio::test]
    async fn test_explanation_stops_at_first_trigger() {
        let broken = "https://manifold.markets/user/unreachable";
        let market = Market::new(
            binary_market(),
            vec![
                TriggerRule::either(TriggerRule::at(past()), TriggerRule::OtherMarketClosed { url: broken.into() }),
                TriggerRule::OtherMarketResolved { url: broken.into() },
            ],
            vec![yes()],
            1.0,
        )
        .unwrap();
        let platform = MockPlatform::default().failing(broken);
        let source_host = MockSourceHost::default();
        let ctx = market.context(&platform, &source_host, Utc::now());

        let text = market.explain_specific(&ctx).await.unwrap();
        assert!(text.contains("- If either of the rules below resolves True (-> true)\n"));
        assert!(text.contains(&format!("  - If `{}` closes (not evaluated)\n", broken)));
        assert!(text.contains(&format!("- If `{}` is resolved (not evaluated)\n", broken)));
        assert_eq!(platform.other_market_calls(), 0);
    }

    #[tokio::test]
    async fn test_explanation_shows_the_drawn_answer() {
        let answers: Vec<String> = (0..10).map(|i| format!("answer {}", i)).collect();
        let answers: Vec<&str> = answers.iter().map(String::as_str).collect();
        let market = Market::new(
            categorical_market(&answers),
            vec![TriggerRule::at(past())],
            vec![ValueRule::RandomIndex(RandomIndex::default())],
            1.0,
        )
        .unwrap();
        let platform = MockPlatform::default();
        let source_host = MockSourceHost::default();

        for _ in 0..20 {
            let ctx = market.context(&platform, &source_host, Utc::now());
            let value = market.resolve_to(&ctx).await.unwrap();
            let text = market.explain_specific(&ctx).await.unwrap();
            assert!(text.contains(&format!("(-> {})", value)), "{} not in {}", value, text);
        }
    }
}
