//! Value rules compute what a market should resolve to.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use crate::data::types::{Distribution, OutcomeValue, Period, PullRef};
use crate::rules::context::EvalContext;
use crate::rules::outcome::{check_answers, normalize, ConstantValue};
use crate::rules::random::{draw_rng, RandomIndex, Seed};
use crate::rules::registry::to_json;
use crate::rules::trigger::{require_many, TriggerRule};
use crate::rules::{github, RuleError};

/// Default floor below which an answer earns no Fibonacci weight
pub const DEFAULT_MIN_REWARDED: f64 = 0.0001;

/// Which cached user statistic a user rule reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMetric {
    Profit,
    CreatedVolume,
}

impl UserMetric {
    pub fn describe(&self) -> &'static str {
        match self {
            UserMetric::Profit => "profit of",
            UserMetric::CreatedVolume => "market volume created by",
        }
    }
}

/// One weighted input to a blend
#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    pub rule: ValueRule,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueRule {
    ResolveToValue(ConstantValue),
    CurrentValue,
    OtherMarketValue { url: String },
    Negate(Box<ValueRule>),
    Sum(Vec<ValueRule>),
    Product(Vec<ValueRule>),
    Modulus(Vec<ValueRule>),
    RandomIndex(RandomIndex),
    MultipleValues(Vec<Share>),
    PrDelta { pull: PullRef, start: DateTime<Utc> },
    PrMerged(PullRef),
    Popular { size: usize },
    Fibonacci { exclude: BTreeSet<usize>, min_rewarded: f64 },
    Round,
    /// Reference market's odds scaled up by `a`; a NO there only sticks with
    /// probability `1 / a` and cancels otherwise
    AmplifiedOdds { url: String, a: u64, seed: Option<Seed> },
    /// Cancels unless `premise` holds, otherwise resolves to `value`
    Conditional { premise: Box<TriggerRule>, value: Box<ValueRule> },
    UserStat { user: String, metric: UserMetric, period: Period },
}

impl ValueRule {
    pub fn constant(value: ConstantValue) -> Self {
        ValueRule::ResolveToValue(value)
    }

    pub fn negate(child: ValueRule) -> Self {
        ValueRule::Negate(Box::new(child))
    }

    pub fn sum(rules: Vec<ValueRule>) -> Result<Self, RuleError> {
        require_many("generic.SumRule", &rules)?;
        Ok(ValueRule::Sum(rules))
    }

    pub fn product(rules: Vec<ValueRule>) -> Result<Self, RuleError> {
        require_many("generic.ProductRule", &rules)?;
        Ok(ValueRule::Product(rules))
    }

    pub fn modulus(rules: Vec<ValueRule>) -> Result<Self, RuleError> {
        require_many("generic.ModulusRule", &rules)?;
        Ok(ValueRule::Modulus(rules))
    }

    pub fn blend(shares: Vec<Share>) -> Result<Self, RuleError> {
        let kind = "generic.ResolveMultipleValues";
        if shares.is_empty() {
            return Err(RuleError::malformed(kind, "needs at least one share"));
        }
        if let Some(share) = shares.iter().find(|s| !s.weight.is_finite() || s.weight < 0.0) {
            return Err(RuleError::malformed(
                kind,
                format!("share weight {} must be a non-negative number", share.weight),
            ));
        }
        Ok(ValueRule::MultipleValues(shares))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ValueRule::ResolveToValue(_) => "generic.ResolveToValue",
            ValueRule::CurrentValue => "manifold.this.CurrentValueRule",
            ValueRule::OtherMarketValue { .. } => "manifold.other.OtherMarketValue",
            ValueRule::Negate(_) => "generic.NegateRule",
            ValueRule::Sum(_) => "generic.SumRule",
            ValueRule::Product(_) => "generic.ProductRule",
            ValueRule::Modulus(_) => "generic.ModulusRule",
            ValueRule::RandomIndex(_) => "generic.ResolveRandomIndex",
            ValueRule::MultipleValues(_) => "generic.ResolveMultipleValues",
            ValueRule::PrDelta { .. } => "github.ResolveToPRDelta",
            ValueRule::PrMerged(_) => "github.ResolveToPR",
            ValueRule::Popular { .. } => "manifold.this.PopularValueRule",
            ValueRule::Fibonacci { .. } => "manifold.this.FibonacciValueRule",
            ValueRule::Round => "manifold.this.RoundValueRule",
            ValueRule::AmplifiedOdds { .. } => "manifold.other.AmplifiedOddsRule",
            ValueRule::Conditional { .. } => "generic.ConditionalRule",
            ValueRule::UserStat { metric: UserMetric::Profit, .. } => "manifold.user.ResolveToUserProfit",
            ValueRule::UserStat { metric: UserMetric::CreatedVolume, .. } => {
                "manifold.user.ResolveToUserCreatedVolume"
            }
        }
    }

    pub fn args(&self) -> Map<String, Value> {
        let args = match self {
            ValueRule::ResolveToValue(constant) => json!({ "resolve_value": constant.to_json() }),
            ValueRule::CurrentValue | ValueRule::Round => json!({}),
            ValueRule::OtherMarketValue { url } => json!({ "url": url }),
            ValueRule::Negate(child) => json!({ "child": to_json(child.as_ref()) }),
            ValueRule::Sum(rules) | ValueRule::Product(rules) | ValueRule::Modulus(rules) => {
                json!({ "rules": rules.iter().map(to_json).collect::<Vec<_>>() })
            }
            ValueRule::RandomIndex(random) => {
                let mut args = json!({ "start": random.start, "weighted": random.weighted });
                if let Some(limit) = random.limit {
                    args["limit"] = json!(limit);
                }
                if let Some(seed) = &random.seed {
                    args["seed"] = seed.to_json();
                }
                args
            }
            ValueRule::MultipleValues(shares) => {
                let shares: Vec<Value> = shares
                    .iter()
                    .map(|share| json!([to_json(&share.rule), share.weight]))
                    .collect();
                json!({ "shares": shares })
            }
            ValueRule::PrDelta { pull, start } => json!({
                "owner": pull.owner,
                "repo": pull.repo,
                "number": pull.number,
                "start": start.to_rfc3339(),
            }),
            ValueRule::PrMerged(pull) => {
                json!({ "owner": pull.owner, "repo": pull.repo, "number": pull.number })
            }
            ValueRule::Popular { size } => json!({ "size": size }),
            ValueRule::Fibonacci { exclude, min_rewarded } => {
                json!({ "exclude": exclude, "min_rewarded": min_rewarded })
            }
            ValueRule::AmplifiedOdds { url, a, seed } => {
                let mut args = json!({ "url": url, "a": a });
                if let Some(seed) = seed {
                    args["seed"] = seed.to_json();
                }
                args
            }
            ValueRule::Conditional { premise, value } => json!({
                "rule1": to_json(premise.as_ref()),
                "rule2": to_json(value.as_ref()),
            }),
            ValueRule::UserStat { user, period, .. } => json!({ "user": user, "field": period.as_str() }),
        };
        match args {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Direct children in declaration order
    pub fn children(&self) -> Vec<&ValueRule> {
        match self {
            ValueRule::Negate(child) => vec![child.as_ref()],
            ValueRule::Sum(rules) | ValueRule::Product(rules) | ValueRule::Modulus(rules) => {
                rules.iter().collect()
            }
            ValueRule::MultipleValues(shares) => shares.iter().map(|s| &s.rule).collect(),
            ValueRule::Conditional { value, .. } => vec![value.as_ref()],
            _ => Vec::new(),
        }
    }

    pub fn evaluate<'a>(&'a self, ctx: &'a EvalContext<'a>) -> BoxFuture<'a, Result<OutcomeValue, RuleError>> {
        async move {
            match self {
                ValueRule::ResolveToValue(constant) => constant.interpret(ctx.market),
                ValueRule::CurrentValue => ctx.current_value().await,
                ValueRule::OtherMarketValue { url } => Ok(ctx.other_market(url).await?.value),
                ValueRule::Negate(child) => match child.evaluate(ctx).await? {
                    OutcomeValue::Cancel => Ok(OutcomeValue::Cancel),
                    OutcomeValue::Probability(p) => Ok(OutcomeValue::Probability(100.0 - p)),
                    OutcomeValue::Bool(b) => Ok(OutcomeValue::Bool(!b)),
                    other => Err(RuleError::mismatch("Probability or Bool", other.variant_name())),
                },
                ValueRule::Sum(rules) => fold_scalars(rules, ctx, |a, b| Ok(a + b)).await,
                ValueRule::Product(rules) => fold_scalars(rules, ctx, |a, b| Ok(a * b)).await,
                ValueRule::Modulus(rules) => fold_scalars(rules, ctx, floored_mod).await,
                ValueRule::RandomIndex(random) => random.evaluate(ctx).await,
                ValueRule::MultipleValues(shares) => blend(shares, ctx).await,
                ValueRule::PrDelta { pull, start } => github::merge_delta(pull, *start, ctx).await,
                ValueRule::PrMerged(pull) => Ok(OutcomeValue::Bool(github::is_merged(pull, ctx).await?)),
                ValueRule::Popular { size } => {
                    let current = ctx.current_distribution().await?;
                    normalize(&most_popular(&current, *size))
                        .map(OutcomeValue::Distribution)
                }
                ValueRule::Fibonacci { exclude, min_rewarded } => {
                    let current = ctx.current_distribution().await?;
                    normalize(&fibonacci_weights(&current, exclude, *min_rewarded))
                        .map(OutcomeValue::Distribution)
                }
                ValueRule::Round => match ctx.current_value().await? {
                    OutcomeValue::Probability(p) => {
                        Ok(OutcomeValue::Probability(if p > 50.0 { 100.0 } else { 0.0 }))
                    }
                    OutcomeValue::Numeric(x) => Ok(OutcomeValue::Numeric(x.round())),
                    other => Err(RuleError::mismatch("Probability or Numeric", other.variant_name())),
                },
                ValueRule::AmplifiedOdds { url, a, seed } => {
                    let other = ctx.other_market(url).await?;
                    let node = self as *const Self as usize;
                    amplified_odds(other.resolved, other.value, *a, || {
                        draw_rng(seed.as_ref(), ctx, node).gen::<f64>()
                    })
                }
                ValueRule::Conditional { premise, value } => {
                    if premise.evaluate(ctx).await? {
                        value.evaluate(ctx).await
                    } else {
                        Ok(OutcomeValue::Cancel)
                    }
                }
                ValueRule::UserStat { user, metric, period } => {
                    let stats = ctx.user(user).await?;
                    let table = match metric {
                        UserMetric::Profit => &stats.profit,
                        UserMetric::CreatedVolume => &stats.created_volume,
                    };
                    Ok(OutcomeValue::Numeric(table.get(*period)))
                }
            }
        }
        .boxed()
    }
}

/// Scale a reference market's probability by `a`.
///
/// A YES there resolves YES. A NO resolves NO when `draw()` (uniform in
/// `[0, 1)`) falls below `1 / a` and cancels otherwise. Anything unresolved
/// maps `p` to `p / (p + (1 - p) / a)`.
pub fn amplified_odds(
    resolved: bool,
    value: OutcomeValue,
    a: u64,
    draw: impl FnOnce() -> f64,
) -> Result<OutcomeValue, RuleError> {
    if a == 0 {
        return Err(RuleError::InvalidValue("amplification must be at least 1".to_string()));
    }
    let a = a as f64;
    let p = match value {
        OutcomeValue::Cancel => return Ok(OutcomeValue::Cancel),
        OutcomeValue::Bool(b) => {
            if b {
                1.0
            } else {
                0.0
            }
        }
        OutcomeValue::Probability(p) => p / 100.0,
        other => return Err(RuleError::mismatch("Probability", other.variant_name())),
    };
    if resolved && p >= 1.0 {
        return Ok(OutcomeValue::Bool(true));
    }
    if resolved && p <= 0.0 {
        if draw() < 1.0 / a {
            return Ok(OutcomeValue::Bool(false));
        }
        return Ok(OutcomeValue::Cancel);
    }
    Ok(OutcomeValue::Probability(p / (p + (1.0 - p) / a) * 100.0))
}

fn floored_mod(a: f64, b: f64) -> Result<f64, RuleError> {
    if b == 0.0 {
        return Err(RuleError::InvalidValue(format!("{} mod 0", a)));
    }
    Ok(a - b * (a / b).floor())
}

/// Combine scalar children left to right. Every child must produce the same
/// scalar variant as the first.
async fn fold_scalars<F>(rules: &[ValueRule], ctx: &EvalContext<'_>, op: F) -> Result<OutcomeValue, RuleError>
where
    F: Fn(f64, f64) -> Result<f64, RuleError>,
{
    let mut acc: Option<OutcomeValue> = None;
    for rule in rules {
        let value = rule.evaluate(ctx).await?;
        acc = Some(match (acc, value) {
            (_, OutcomeValue::Cancel) => return Ok(OutcomeValue::Cancel),
            (None, value @ (OutcomeValue::Probability(_) | OutcomeValue::Numeric(_))) => value,
            (None, other) => {
                return Err(RuleError::mismatch("Probability or Numeric", other.variant_name()))
            }
            (Some(OutcomeValue::Probability(a)), OutcomeValue::Probability(b)) => {
                OutcomeValue::Probability(op(a, b)?)
            }
            (Some(OutcomeValue::Numeric(a)), OutcomeValue::Numeric(b)) => {
                OutcomeValue::Numeric(op(a, b)?)
            }
            (Some(current), other) => {
                return Err(RuleError::mismatch(current.variant_name(), other.variant_name()))
            }
        });
    }
    acc.ok_or_else(|| RuleError::InvalidValue("no operands".to_string()))
}

enum Blended {
    Probability(f64),
    Distribution(Distribution),
}

/// Weighted union of child outputs. Distributions are normalized before
/// mixing so each child contributes exactly its share.
async fn blend(shares: &[Share], ctx: &EvalContext<'_>) -> Result<OutcomeValue, RuleError> {
    let total: f64 = shares.iter().map(|s| s.weight).sum();
    if total <= 0.0 {
        return Err(RuleError::InvalidValue("share weights sum to zero".to_string()));
    }

    let mut acc: Option<Blended> = None;
    for share in shares {
        let fraction = share.weight / total;
        let value = share.rule.evaluate(ctx).await?;
        let value = match value {
            OutcomeValue::Cancel => return Ok(OutcomeValue::Cancel),
            OutcomeValue::Bool(b) => OutcomeValue::Probability(if b { 100.0 } else { 0.0 }),
            other => other,
        };
        acc = Some(match (acc.take(), value) {
            (None, OutcomeValue::Probability(p)) => Blended::Probability(p * fraction),
            (Some(Blended::Probability(sum)), OutcomeValue::Probability(p)) => {
                Blended::Probability(sum + p * fraction)
            }
            (None, OutcomeValue::Distribution(dist)) => {
                let mut mixed = Distribution::new();
                mix_into(&mut mixed, &dist, fraction, ctx)?;
                Blended::Distribution(mixed)
            }
            (Some(Blended::Distribution(mut mixed)), OutcomeValue::Distribution(dist)) => {
                mix_into(&mut mixed, &dist, fraction, ctx)?;
                Blended::Distribution(mixed)
            }
            (Some(Blended::Probability(_)), other) => {
                return Err(RuleError::mismatch("Probability", other.variant_name()))
            }
            (Some(Blended::Distribution(_)), other) => {
                return Err(RuleError::mismatch("Distribution", other.variant_name()))
            }
            (None, other) => {
                return Err(RuleError::mismatch("Probability or Distribution", other.variant_name()))
            }
        });
    }

    match acc {
        Some(Blended::Probability(p)) => Ok(OutcomeValue::Probability(p)),
        Some(Blended::Distribution(dist)) => Ok(OutcomeValue::Distribution(dist)),
        None => Err(RuleError::InvalidValue("nothing to blend".to_string())),
    }
}

fn mix_into(
    mixed: &mut Distribution,
    dist: &Distribution,
    fraction: f64,
    ctx: &EvalContext<'_>,
) -> Result<(), RuleError> {
    check_answers(dist, ctx.market)?;
    for (index, weight) in normalize(dist)? {
        *mixed.entry(index).or_insert(0.0) += weight * fraction;
    }
    Ok(())
}

/// The `size` heaviest answers, ties broken by lower index
pub fn most_popular(current: &Distribution, size: usize) -> Distribution {
    let mut ranked: Vec<(usize, f64)> = current.iter().map(|(i, w)| (*i, *w)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(size).collect()
}

/// Rank surviving answers by ascending probability and weight them along
/// the Fibonacci sequence.
pub fn fibonacci_weights(current: &Distribution, exclude: &BTreeSet<usize>, min_rewarded: f64) -> Distribution {
    let total: f64 = current.values().sum();
    let mut ranked: Vec<(usize, f64)> = current
        .iter()
        .filter(|(index, _)| !exclude.contains(index))
        .filter(|(_, weight)| total > 0.0 && **weight / total >= min_rewarded)
        .map(|(i, w)| (*i, *w))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let (mut a, mut b) = (1.0, 1.0);
    let mut weights = Distribution::new();
    for (index, _) in ranked {
        weights.insert(index, a);
        (a, b) = (b, a + b);
    }
    weights
}
