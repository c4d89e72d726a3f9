//! Trigger rules decide whether a market should resolve now.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use crate::data::types::PullRef;
use crate::rules::context::EvalContext;
use crate::rules::registry::to_json;
use crate::rules::{github, RuleError};

/// Two operands of a binary combinator
pub type Pair = Box<[TriggerRule; 2]>;

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerRule {
    ResolveAtTime { resolve_at: DateTime<Utc> },
    ThisMarketClosed { resolve_at: Option<DateTime<Utc>> },
    ResolveWithPR(PullRef),
    OtherMarketClosed { url: String },
    OtherMarketResolved { url: String },
    Not(Box<TriggerRule>),
    All(Vec<TriggerRule>),
    Both(Pair),
    Any(Vec<TriggerRule>),
    Either(Pair),
    Xor(Vec<TriggerRule>),
    Xnor(Vec<TriggerRule>),
    Nand(Pair),
    Neither(Pair),
    Implies(Pair),
}

/// Variadic combinators need at least two children
pub(crate) fn require_many<T>(kind: &str, rules: &[T]) -> Result<(), RuleError> {
    if rules.len() < 2 {
        return Err(RuleError::malformed(
            kind,
            format!("needs at least two child rules, got {}", rules.len()),
        ));
    }
    Ok(())
}

impl TriggerRule {
    pub fn at(resolve_at: DateTime<Utc>) -> Self {
        TriggerRule::ResolveAtTime { resolve_at }
    }

    pub fn not(child: TriggerRule) -> Self {
        TriggerRule::Not(Box::new(child))
    }

    pub fn both(rule1: TriggerRule, rule2: TriggerRule) -> Self {
        TriggerRule::Both(Box::new([rule1, rule2]))
    }

    pub fn either(rule1: TriggerRule, rule2: TriggerRule) -> Self {
        TriggerRule::Either(Box::new([rule1, rule2]))
    }

    pub fn all(rules: Vec<TriggerRule>) -> Result<Self, RuleError> {
        require_many("generic.AllRule", &rules)?;
        Ok(TriggerRule::All(rules))
    }

    pub fn any(rules: Vec<TriggerRule>) -> Result<Self, RuleError> {
        require_many("generic.AnyRule", &rules)?;
        Ok(TriggerRule::Any(rules))
    }

    pub fn xor(rules: Vec<TriggerRule>) -> Result<Self, RuleError> {
        require_many("generic.XORRule", &rules)?;
        Ok(TriggerRule::Xor(rules))
    }

    pub fn xnor(rules: Vec<TriggerRule>) -> Result<Self, RuleError> {
        require_many("generic.XNORRule", &rules)?;
        Ok(TriggerRule::Xnor(rules))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TriggerRule::ResolveAtTime { .. } => "generic.ResolveAtTime",
            TriggerRule::ThisMarketClosed { .. } => "manifold.this.ThisMarketClosed",
            TriggerRule::ResolveWithPR(_) => "github.ResolveWithPR",
            TriggerRule::OtherMarketClosed { .. } => "manifold.other.OtherMarketClosed",
            TriggerRule::OtherMarketResolved { .. } => "manifold.other.OtherMarketResolved",
            TriggerRule::Not(_) => "generic.NotRule",
            TriggerRule::All(_) => "generic.AllRule",
            TriggerRule::Both(_) => "generic.BothRule",
            TriggerRule::Any(_) => "generic.AnyRule",
            TriggerRule::Either(_) => "generic.EitherRule",
            TriggerRule::Xor(_) => "generic.XORRule",
            TriggerRule::Xnor(_) => "generic.XNORRule",
            TriggerRule::Nand(_) => "generic.NANDRule",
            TriggerRule::Neither(_) => "generic.NeitherRule",
            TriggerRule::Implies(_) => "generic.ImpliesRule",
        }
    }

    pub fn args(&self) -> Map<String, Value> {
        let args = match self {
            TriggerRule::ResolveAtTime { resolve_at } => json!({ "resolve_at": resolve_at.to_rfc3339() }),
            TriggerRule::ThisMarketClosed { resolve_at: Some(at) } => json!({ "resolve_at": at.to_rfc3339() }),
            TriggerRule::ThisMarketClosed { resolve_at: None } => json!({}),
            TriggerRule::ResolveWithPR(pull) => {
                json!({ "owner": pull.owner, "repo": pull.repo, "number": pull.number })
            }
            TriggerRule::OtherMarketClosed { url } | TriggerRule::OtherMarketResolved { url } => {
                json!({ "url": url })
            }
            TriggerRule::Not(child) => json!({ "child": to_json(child.as_ref()) }),
            TriggerRule::All(rules)
            | TriggerRule::Any(rules)
            | TriggerRule::Xor(rules)
            | TriggerRule::Xnor(rules) => {
                json!({ "rules": rules.iter().map(to_json).collect::<Vec<_>>() })
            }
            TriggerRule::Both(pair)
            | TriggerRule::Either(pair)
            | TriggerRule::Nand(pair)
            | TriggerRule::Neither(pair)
            | TriggerRule::Implies(pair) => {
                json!({ "rule1": to_json(&pair[0]), "rule2": to_json(&pair[1]) })
            }
        };
        match args {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Direct children in declaration order
    pub fn children(&self) -> &[TriggerRule] {
        match self {
            TriggerRule::Not(child) => std::slice::from_ref(child.as_ref()),
            TriggerRule::All(rules)
            | TriggerRule::Any(rules)
            | TriggerRule::Xor(rules)
            | TriggerRule::Xnor(rules) => rules,
            TriggerRule::Both(pair)
            | TriggerRule::Either(pair)
            | TriggerRule::Nand(pair)
            | TriggerRule::Neither(pair)
            | TriggerRule::Implies(pair) => &pair[..],
            _ => &[],
        }
    }

    /// Evaluate depth-first, left to right. AND-like and OR-like combinators
    /// stop at the first child that decides the result.
    pub fn evaluate<'a>(&'a self, ctx: &'a EvalContext<'a>) -> BoxFuture<'a, Result<bool, RuleError>> {
        async move {
            match self {
                TriggerRule::ResolveAtTime { resolve_at } => Ok(ctx.now >= *resolve_at),
                TriggerRule::ThisMarketClosed { resolve_at } => {
                    let close = (*resolve_at).or(ctx.market.close_time);
                    Ok(close.map_or(false, |at| ctx.now >= at))
                }
                TriggerRule::ResolveWithPR(pull) => github::is_terminal(pull, ctx).await,
                TriggerRule::OtherMarketClosed { url } => Ok(ctx.other_market(url).await?.closed),
                TriggerRule::OtherMarketResolved { url } => Ok(ctx.other_market(url).await?.resolved),
                TriggerRule::Not(child) => Ok(!child.evaluate(ctx).await?),
                TriggerRule::All(rules) => all_true(rules, ctx).await,
                TriggerRule::Both(pair) => all_true(&pair[..], ctx).await,
                TriggerRule::Any(rules) => any_true(rules, ctx).await,
                TriggerRule::Either(pair) => any_true(&pair[..], ctx).await,
                TriggerRule::Xor(rules) => {
                    let mut odd = false;
                    for rule in rules {
                        odd ^= rule.evaluate(ctx).await?;
                    }
                    Ok(odd)
                }
                TriggerRule::Xnor(rules) => all_agree(rules, ctx).await,
                TriggerRule::Nand(pair) => Ok(!all_true(&pair[..], ctx).await?),
                TriggerRule::Neither(pair) => Ok(!any_true(&pair[..], ctx).await?),
                TriggerRule::Implies(pair) => {
                    if !pair[0].evaluate(ctx).await? {
                        return Ok(true);
                    }
                    pair[1].evaluate(ctx).await
                }
            }
        }
        .boxed()
    }
}

async fn all_true(rules: &[TriggerRule], ctx: &EvalContext<'_>) -> Result<bool, RuleError> {
    for rule in rules {
        if !rule.evaluate(ctx).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn any_true(rules: &[TriggerRule], ctx: &EvalContext<'_>) -> Result<bool, RuleError> {
    for rule in rules {
        if rule.evaluate(ctx).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn all_agree(rules: &[TriggerRule], ctx: &EvalContext<'_>) -> Result<bool, RuleError> {
    let mut first = None;
    for rule in rules {
        let value = rule.evaluate(ctx).await?;
        match first {
            None => first = Some(value),
            Some(expected) if expected != value => return Ok(false),
            Some(_) => {}
        }
    }
    Ok(true)
}
