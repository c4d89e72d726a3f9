//! Kind-name dispatch for rule trees.
//!
//! Every rule serializes to `[kind, args]`. Parsing looks the kind up in a
//! static table built once per process and hands the arguments to its
//! constructor, which materializes nested children first.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use crate::data::types::{Period, PullRef};
use crate::rules::outcome::ConstantValue;
use crate::rules::random::{RandomIndex, Seed};
use crate::rules::resolve::{Share, UserMetric, ValueRule, DEFAULT_MIN_REWARDED};
use crate::rules::trigger::{Pair, TriggerRule};
use crate::rules::RuleError;

/// A parsed node of either family
#[derive(Debug, Clone, PartialEq)]
pub enum AnyRule {
    Trigger(TriggerRule),
    Value(ValueRule),
}

impl AnyRule {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyRule::Trigger(rule) => rule.kind(),
            AnyRule::Value(rule) => rule.kind(),
        }
    }

    fn family(&self) -> &'static str {
        match self {
            AnyRule::Trigger(_) => "trigger",
            AnyRule::Value(_) => "value",
        }
    }
}

impl From<TriggerRule> for AnyRule {
    fn from(rule: TriggerRule) -> Self {
        AnyRule::Trigger(rule)
    }
}

impl From<ValueRule> for AnyRule {
    fn from(rule: ValueRule) -> Self {
        AnyRule::Value(rule)
    }
}

/// Anything that serializes as a `(kind, args)` pair
pub trait RuleNode {
    fn kind(&self) -> &'static str;
    fn args(&self) -> Map<String, Value>;
}

impl RuleNode for TriggerRule {
    fn kind(&self) -> &'static str {
        TriggerRule::kind(self)
    }

    fn args(&self) -> Map<String, Value> {
        TriggerRule::args(self)
    }
}

impl RuleNode for ValueRule {
    fn kind(&self) -> &'static str {
        ValueRule::kind(self)
    }

    fn args(&self) -> Map<String, Value> {
        ValueRule::args(self)
    }
}

impl RuleNode for AnyRule {
    fn kind(&self) -> &'static str {
        AnyRule::kind(self)
    }

    fn args(&self) -> Map<String, Value> {
        match self {
            AnyRule::Trigger(rule) => rule.args(),
            AnyRule::Value(rule) => rule.args(),
        }
    }
}

pub fn to_dict<R: RuleNode>(rule: &R) -> (&'static str, Map<String, Value>) {
    (rule.kind(), rule.args())
}

/// Serialized `[kind, args]` form
pub fn to_json<R: RuleNode>(rule: &R) -> Value {
    let (kind, args) = to_dict(rule);
    json!([kind, args])
}

type Constructor = fn(&Args<'_>) -> Result<AnyRule, RuleError>;

static BUILTIN: &[(&str, Constructor)] = &[
    ("generic.ResolveAtTime", resolve_at_time),
    ("manifold.this.ThisMarketClosed", this_market_closed),
    ("github.ResolveWithPR", resolve_with_pr),
    ("manifold.other.OtherMarketClosed", other_market_closed),
    ("manifold.other.OtherMarketResolved", other_market_resolved),
    ("generic.NotRule", not_rule),
    ("generic.AllRule", all_rule),
    ("generic.BothRule", both_rule),
    ("generic.AnyRule", any_rule),
    ("generic.EitherRule", either_rule),
    ("generic.XORRule", xor_rule),
    ("generic.XNORRule", xnor_rule),
    ("generic.NANDRule", nand_rule),
    ("generic.NeitherRule", neither_rule),
    ("generic.ImpliesRule", implies_rule),
    ("generic.ResolveToValue", resolve_to_value),
    ("manifold.this.CurrentValueRule", current_value),
    ("manifold.other.OtherMarketValue", other_market_value),
    ("generic.NegateRule", negate_rule),
    ("generic.SumRule", sum_rule),
    ("generic.ProductRule", product_rule),
    ("generic.ModulusRule", modulus_rule),
    ("generic.ResolveRandomIndex", random_index),
    ("generic.ResolveMultipleValues", multiple_values),
    ("github.ResolveToPRDelta", pr_delta),
    ("github.ResolveToPR", pr_merged),
    ("manifold.this.PopularValueRule", popular_value),
    ("manifold.this.FibonacciValueRule", fibonacci_value),
    ("manifold.this.RoundValueRule", round_value),
    ("manifold.other.AmplifiedOddsRule", amplified_odds),
    ("generic.ConditionalRule", conditional_rule),
    ("manifold.user.ResolveToUserProfit", user_profit),
    ("manifold.user.ResolveToUserCreatedVolume", user_created_volume),
];

pub struct Registry {
    constructors: HashMap<&'static str, Constructor>,
}

impl Registry {
    fn from_table(table: &[(&'static str, Constructor)]) -> Self {
        Self {
            constructors: table.iter().copied().collect(),
        }
    }

    /// Process-wide registry of the built-in kinds
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| Registry::from_table(BUILTIN))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    pub fn from_dict(&self, kind: &str, args: &Value) -> Result<AnyRule, RuleError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| RuleError::UnknownRuleKind(kind.to_string()))?;
        let args = Args::new(self, kind, args)?;
        constructor(&args)
    }

    /// Parse a serialized `[kind, args]` pair
    pub fn parse(&self, value: &Value) -> Result<AnyRule, RuleError> {
        match value.as_array().map(Vec::as_slice) {
            Some([Value::String(kind), args]) => self.from_dict(kind, args),
            Some([Value::String(kind)]) => self.from_dict(kind, &Value::Null),
            _ => Err(RuleError::malformed(
                "rule",
                format!("expected [kind, args], got {}", value),
            )),
        }
    }
}

pub fn parse_trigger(value: &Value) -> Result<TriggerRule, RuleError> {
    match Registry::global().parse(value)? {
        AnyRule::Trigger(rule) => Ok(rule),
        other => Err(RuleError::malformed(
            other.kind(),
            "expected a trigger rule, found a value rule",
        )),
    }
}

pub fn parse_value(value: &Value) -> Result<ValueRule, RuleError> {
    match Registry::global().parse(value)? {
        AnyRule::Value(rule) => Ok(rule),
        other => Err(RuleError::malformed(
            other.kind(),
            "expected a value rule, found a trigger rule",
        )),
    }
}

/// Read RFC 3339, or a naive date / datetime taken as UTC
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Typed view over one node's arguments. Nested rules parse through the
/// same registry as their parent.
struct Args<'a> {
    registry: &'a Registry,
    kind: &'a str,
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Args<'a> {
    fn new(registry: &'a Registry, kind: &'a str, value: &'a Value) -> Result<Self, RuleError> {
        let map = match value {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(RuleError::malformed(kind, format!("arguments must be an object, got {}", other)))
            }
        };
        Ok(Self { registry, kind, map })
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.and_then(|map| map.get(name)).filter(|v| !v.is_null())
    }

    fn required(&self, name: &str) -> Result<&'a Value, RuleError> {
        self.get(name)
            .ok_or_else(|| RuleError::malformed(self.kind, format!("missing `{}`", name)))
    }

    fn invalid(&self, name: &str, expected: &str) -> RuleError {
        RuleError::malformed(self.kind, format!("`{}` must be {}", name, expected))
    }

    fn string(&self, name: &str) -> Result<String, RuleError> {
        self.required(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(name, "a string"))
    }

    fn u64(&self, name: &str) -> Result<u64, RuleError> {
        self.required(name)?
            .as_u64()
            .ok_or_else(|| self.invalid(name, "a non-negative integer"))
    }

    fn optional_usize(&self, name: &str) -> Result<Option<usize>, RuleError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| self.invalid(name, "a non-negative integer")),
        }
    }

    fn bool_or(&self, name: &str, default: bool) -> Result<bool, RuleError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.as_bool().ok_or_else(|| self.invalid(name, "a boolean")),
        }
    }

    fn f64_or(&self, name: &str, default: f64) -> Result<f64, RuleError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.as_f64().ok_or_else(|| self.invalid(name, "a number")),
        }
    }

    fn datetime(&self, name: &str) -> Result<DateTime<Utc>, RuleError> {
        self.required(name)?
            .as_str()
            .and_then(parse_datetime)
            .ok_or_else(|| self.invalid(name, "an RFC 3339 timestamp"))
    }

    fn optional_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>, RuleError> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.datetime(name).map(Some),
        }
    }

    fn pull(&self) -> Result<PullRef, RuleError> {
        Ok(PullRef::new(self.string("owner")?, self.string("repo")?, self.u64("number")?))
    }

    fn child(&self, name: &str, value: &Value) -> Result<AnyRule, RuleError> {
        self.registry
            .parse(value)
            .map_err(|e| match e {
                RuleError::MalformedArguments { kind, reason } if kind == "rule" => {
                    RuleError::malformed(self.kind, format!("`{}`: {}", name, reason))
                }
                other => other,
            })
    }

    fn trigger_from(&self, name: &str, value: &Value) -> Result<TriggerRule, RuleError> {
        match self.child(name, value)? {
            AnyRule::Trigger(rule) => Ok(rule),
            other => Err(self.wrong_family(name, &other, "trigger")),
        }
    }

    fn value_from(&self, name: &str, value: &Value) -> Result<ValueRule, RuleError> {
        match self.child(name, value)? {
            AnyRule::Value(rule) => Ok(rule),
            other => Err(self.wrong_family(name, &other, "value")),
        }
    }

    fn wrong_family(&self, name: &str, found: &AnyRule, expected: &str) -> RuleError {
        RuleError::malformed(
            self.kind,
            format!(
                "`{}` expects a {} rule, found {} rule {}",
                name,
                expected,
                found.family(),
                found.kind()
            ),
        )
    }

    fn list(&self, name: &str) -> Result<&'a Vec<Value>, RuleError> {
        self.required(name)?
            .as_array()
            .ok_or_else(|| self.invalid(name, "a list of rules"))
    }

    fn trigger(&self, name: &str) -> Result<TriggerRule, RuleError> {
        self.trigger_from(name, self.required(name)?)
    }

    fn triggers(&self, name: &str) -> Result<Vec<TriggerRule>, RuleError> {
        self.list(name)?
            .iter()
            .map(|value| self.trigger_from(name, value))
            .collect()
    }

    fn trigger_pair(&self) -> Result<Pair, RuleError> {
        Ok(Box::new([self.trigger("rule1")?, self.trigger("rule2")?]))
    }

    fn value(&self, name: &str) -> Result<ValueRule, RuleError> {
        self.value_from(name, self.required(name)?)
    }

    fn values(&self, name: &str) -> Result<Vec<ValueRule>, RuleError> {
        self.list(name)?
            .iter()
            .map(|value| self.value_from(name, value))
            .collect()
    }
}

fn resolve_at_time(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::at(args.datetime("resolve_at")?).into())
}

fn this_market_closed(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    let resolve_at = args.optional_datetime("resolve_at")?;
    Ok(TriggerRule::ThisMarketClosed { resolve_at }.into())
}

fn resolve_with_pr(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::ResolveWithPR(args.pull()?).into())
}

fn other_market_closed(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::OtherMarketClosed { url: args.string("url")? }.into())
}

fn other_market_resolved(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::OtherMarketResolved { url: args.string("url")? }.into())
}

fn not_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::not(args.trigger("child")?).into())
}

fn all_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::all(args.triggers("rules")?)?.into())
}

fn both_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::Both(args.trigger_pair()?).into())
}

fn any_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::any(args.triggers("rules")?)?.into())
}

fn either_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::Either(args.trigger_pair()?).into())
}

fn xor_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::xor(args.triggers("rules")?)?.into())
}

fn xnor_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::xnor(args.triggers("rules")?)?.into())
}

fn nand_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::Nand(args.trigger_pair()?).into())
}

fn neither_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::Neither(args.trigger_pair()?).into())
}

fn implies_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(TriggerRule::Implies(args.trigger_pair()?).into())
}

fn resolve_to_value(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    let constant = ConstantValue::from_json(args.kind, args.required("resolve_value")?)?;
    Ok(ValueRule::constant(constant).into())
}

fn current_value(_: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::CurrentValue.into())
}

fn other_market_value(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::OtherMarketValue { url: args.string("url")? }.into())
}

fn negate_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::negate(args.value("child")?).into())
}

fn sum_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::sum(args.values("rules")?)?.into())
}

fn product_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::product(args.values("rules")?)?.into())
}

fn modulus_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::modulus(args.values("rules")?)?.into())
}

fn random_index(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    let seed = match args.get("seed") {
        Some(value) => Some(Seed::from_json(args.kind, value)?),
        None => None,
    };
    let random = RandomIndex {
        start: args.optional_usize("start")?.unwrap_or(0),
        limit: args.optional_usize("limit")?,
        weighted: args.bool_or("weighted", false)?,
        seed,
    };
    Ok(ValueRule::RandomIndex(random).into())
}

fn multiple_values(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    let mut shares = Vec::new();
    for entry in args.list("shares")? {
        match entry.as_array().map(Vec::as_slice) {
            Some([rule, weight]) => shares.push(Share {
                rule: args.value_from("shares", rule)?,
                weight: weight
                    .as_f64()
                    .ok_or_else(|| args.invalid("shares", "a list of [rule, weight] pairs"))?,
            }),
            _ => return Err(args.invalid("shares", "a list of [rule, weight] pairs")),
        }
    }
    Ok(ValueRule::blend(shares)?.into())
}

fn pr_delta(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::PrDelta {
        pull: args.pull()?,
        start: args.datetime("start")?,
    }
    .into())
}

fn pr_merged(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::PrMerged(args.pull()?).into())
}

fn popular_value(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    let size = args.optional_usize("size")?.unwrap_or(1);
    if size == 0 {
        return Err(args.invalid("size", "at least 1"));
    }
    Ok(ValueRule::Popular { size }.into())
}

fn fibonacci_value(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    let exclude = match args.get("exclude") {
        None => BTreeSet::new(),
        Some(value) => value
            .as_array()
            .and_then(|items| items.iter().map(|i| i.as_u64().map(|n| n as usize)).collect::<Option<_>>())
            .ok_or_else(|| args.invalid("exclude", "a list of answer indexes"))?,
    };
    let min_rewarded = args.f64_or("min_rewarded", DEFAULT_MIN_REWARDED)?;
    Ok(ValueRule::Fibonacci { exclude, min_rewarded }.into())
}

fn round_value(_: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::Round.into())
}

fn amplified_odds(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    let a = match args.get("a") {
        None => 1,
        Some(_) => args.u64("a")?,
    };
    if a == 0 {
        return Err(args.invalid("a", "at least 1"));
    }
    let seed = match args.get("seed") {
        Some(value) => Some(Seed::from_json(args.kind, value)?),
        None => None,
    };
    Ok(ValueRule::AmplifiedOdds { url: args.string("url")?, a, seed }.into())
}

fn conditional_rule(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    Ok(ValueRule::Conditional {
        premise: Box::new(args.trigger("rule1")?),
        value: Box::new(args.value("rule2")?),
    }
    .into())
}

fn user_stat(args: &Args<'_>, metric: UserMetric) -> Result<AnyRule, RuleError> {
    let period = match args.get("field") {
        None => Period::default(),
        Some(value) => value
            .as_str()
            .and_then(|name| name.parse::<Period>().ok())
            .ok_or_else(|| args.invalid("field", "one of allTime, daily, weekly, monthly"))?,
    };
    Ok(ValueRule::UserStat { user: args.string("user")?, metric, period }.into())
}

fn user_profit(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    user_stat(args, UserMetric::Profit)
}

fn user_created_volume(args: &Args<'_>) -> Result<AnyRule, RuleError> {
    user_stat(args, UserMetric::CreatedVolume)
}

impl Serialize for TriggerRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_json(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TriggerRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_trigger(&value).map_err(D::Error::custom)
    }
}

impl Serialize for ValueRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_json(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ValueRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_value(&value).map_err(D::Error::custom)
    }
}
