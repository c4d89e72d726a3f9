//! Human-readable explanations of rule trees.
//!
//! Each node renders as one `- ...` line indented two spaces per level, with
//! its children below it. The specific form evaluates nodes against a live
//! context and appends `(-> value)`. It visits children exactly as evaluation
//! does; children a combinator never reaches are marked `(not evaluated)`.

use futures::future::{BoxFuture, FutureExt};
use crate::data::types::OutcomeValue;
use crate::rules::context::EvalContext;
use crate::rules::resolve::ValueRule;
use crate::rules::trigger::TriggerRule;
use crate::rules::RuleError;

fn line(indent: usize, text: &str) -> String {
    format!("{}- {}\n", "  ".repeat(indent), text)
}

/// One-sentence description of what a kind does, shown once per kind
pub fn kind_summary(kind: &str) -> Option<&'static str> {
    let summary = match kind {
        "generic.ResolveAtTime" => "true once the given time has passed",
        "manifold.this.ThisMarketClosed" => "true once this market's close time (or the given override) has passed",
        "github.ResolveWithPR" => "true once the pull request is merged or closed",
        "manifold.other.OtherMarketClosed" => "true once the referenced market has closed",
        "manifold.other.OtherMarketResolved" => "true once the referenced market has resolved",
        "generic.NotRule" => "inverts its child",
        "generic.AllRule" | "generic.BothRule" => "true if every child is true, checked in order until one is false",
        "generic.AnyRule" | "generic.EitherRule" => "true if any child is true, checked in order until one is true",
        "generic.XORRule" => "true if an odd number of children are true",
        "generic.XNORRule" => "true if every child gives the same answer",
        "generic.NANDRule" => "true unless both children are true",
        "generic.NeitherRule" => "true if both children are false",
        "generic.ImpliesRule" => "true if the first child is false or the second is true",
        "generic.ResolveToValue" => "a fixed value, read in this market's outcome type",
        "manifold.this.CurrentValueRule" => "this market's current probability or value",
        "manifold.other.OtherMarketValue" => "another market's resolved value, or its current value if unresolved",
        "generic.NegateRule" => "100 minus its child's probability",
        "generic.SumRule" => "the sum of its children",
        "generic.ProductRule" => "the product of its children",
        "generic.ModulusRule" => "the first child modulo each following child",
        "generic.ResolveRandomIndex" => "a random answer, optionally weighted by current probability, reproducible when seeded",
        "generic.ResolveMultipleValues" => "a weighted blend of its children",
        "github.ResolveToPRDelta" => "days from a start date until the pull request merged, or the market maximum if it never did",
        "github.ResolveToPR" => "YES if the pull request merged, otherwise NO",
        "manifold.this.PopularValueRule" => "the most probable answers, weighted by probability",
        "manifold.this.FibonacciValueRule" => "answers weighted by the Fibonacci number of their probability rank",
        "manifold.this.RoundValueRule" => "this market's current value, rounded",
        "manifold.other.AmplifiedOddsRule" => "another market's odds amplified by a factor; a NO there holds with probability 1/a and cancels otherwise",
        "generic.ConditionalRule" => "cancels unless its first rule is true, otherwise the value of its second",
        "manifold.user.ResolveToUserProfit" => "a user's cached profit over the chosen period",
        "manifold.user.ResolveToUserCreatedVolume" => "the cached volume of markets a user created over the chosen period",
        _ => return None,
    };
    Some(summary)
}

impl TriggerRule {
    fn describe(&self) -> String {
        match self {
            TriggerRule::ResolveAtTime { resolve_at } => {
                format!("If the current time is past {}", resolve_at.to_rfc3339())
            }
            TriggerRule::ThisMarketClosed { resolve_at: None } => {
                "If this market reaches its close date".to_string()
            }
            TriggerRule::ThisMarketClosed { resolve_at: Some(at) } => {
                format!("If this market reaches its close date, taken as {}", at.to_rfc3339())
            }
            TriggerRule::ResolveWithPR(pull) => {
                format!("If the GitHub PR {} is merged or closed", pull)
            }
            TriggerRule::OtherMarketClosed { url } => format!("If `{}` closes", url),
            TriggerRule::OtherMarketResolved { url } => format!("If `{}` is resolved", url),
            TriggerRule::Not(_) => "If the rule below resolves False".to_string(),
            TriggerRule::All(_) => "If all of the rules below resolve True".to_string(),
            TriggerRule::Both(_) => "If both of the rules below resolve True".to_string(),
            TriggerRule::Any(_) => "If any of the rules below resolve True".to_string(),
            TriggerRule::Either(_) => "If either of the rules below resolves True".to_string(),
            TriggerRule::Xor(_) => "If an odd number of the rules below resolve True".to_string(),
            TriggerRule::Xnor(_) => "If all of the rules below resolve to the same value".to_string(),
            TriggerRule::Nand(_) => "If one or more of the rules below resolves False".to_string(),
            TriggerRule::Neither(_) => "If both of the rules below resolve False".to_string(),
            TriggerRule::Implies(_) => {
                "If the first rule below resolves False, or both resolve True".to_string()
            }
        }
    }

    pub fn explain_abstract(&self, indent: usize) -> String {
        let mut out = line(indent, &self.describe());
        for child in self.children() {
            out.push_str(&child.explain_abstract(indent + 1));
        }
        out
    }

    pub fn explain_specific<'a>(
        &'a self,
        ctx: &'a EvalContext<'a>,
        indent: usize,
    ) -> BoxFuture<'a, Result<String, RuleError>> {
        async move { Ok(self.explain_with_value(ctx, indent).await?.0) }.boxed()
    }

    /// Explanation plus the value it shows, reached the way `evaluate` reaches it
    pub(crate) fn explain_with_value<'a>(
        &'a self,
        ctx: &'a EvalContext<'a>,
        indent: usize,
    ) -> BoxFuture<'a, Result<(String, bool), RuleError>> {
        async move {
            let mut text = self.describe();
            if let TriggerRule::OtherMarketClosed { url } | TriggerRule::OtherMarketResolved { url } = self {
                text.push_str(&format!(" ({})", ctx.other_market(url).await?.question));
            }
            let children = self.children();
            if children.is_empty() {
                let value = self.evaluate(ctx).await?;
                return Ok((line(indent, &format!("{} (-> {})", text, value)), value));
            }

            let mut body = String::new();
            let mut values = Vec::with_capacity(children.len());
            for child in children {
                let (child_text, value) = child.explain_with_value(ctx, indent + 1).await?;
                body.push_str(&child_text);
                values.push(value);
                if self.decided(&values) {
                    break;
                }
            }
            for child in &children[values.len()..] {
                body.push_str(&child.explain_skipped(indent + 1));
            }

            let value = self.combine(&values);
            Ok((line(indent, &format!("{} (-> {})", text, value)) + &body, value))
        }
        .boxed()
    }

    /// Whether the child values seen so far settle this combinator
    fn decided(&self, values: &[bool]) -> bool {
        let last = values.last().copied();
        match self {
            TriggerRule::All(_) | TriggerRule::Both(_) | TriggerRule::Nand(_) => last == Some(false),
            TriggerRule::Any(_) | TriggerRule::Either(_) | TriggerRule::Neither(_) => last == Some(true),
            TriggerRule::Implies(_) => values == [false],
            TriggerRule::Xnor(_) => values.first() != last.as_ref(),
            _ => false,
        }
    }

    /// This combinator's value from the child values `decided` stopped at
    fn combine(&self, values: &[bool]) -> bool {
        match self {
            TriggerRule::Not(_) => !values.iter().all(|v| *v),
            TriggerRule::All(_) | TriggerRule::Both(_) => values.iter().all(|v| *v),
            TriggerRule::Any(_) | TriggerRule::Either(_) => values.iter().any(|v| *v),
            TriggerRule::Xor(_) => values.iter().fold(false, |odd, v| odd ^ v),
            TriggerRule::Xnor(_) => values.iter().all(|v| Some(v) == values.first()),
            TriggerRule::Nand(_) => !values.iter().all(|v| *v),
            TriggerRule::Neither(_) => !values.iter().any(|v| *v),
            TriggerRule::Implies(_) => values.first() == Some(&false) || values.get(1) == Some(&true),
            _ => values.iter().all(|v| *v),
        }
    }

    /// Abstract form of a subtree that evaluation never reached
    pub(crate) fn explain_skipped(&self, indent: usize) -> String {
        let mut out = line(indent, &format!("{} (not evaluated)", self.describe()));
        for child in self.children() {
            out.push_str(&child.explain_abstract(indent + 1));
        }
        out
    }

    /// Kinds in this tree, depth-first, first occurrence only
    pub fn collect_kinds(&self, kinds: &mut Vec<&'static str>) {
        if !kinds.contains(&self.kind()) {
            kinds.push(self.kind());
        }
        for child in self.children() {
            child.collect_kinds(kinds);
        }
    }
}

impl ValueRule {
    fn describe(&self) -> String {
        match self {
            ValueRule::ResolveToValue(constant) => {
                format!("Resolves to the specific value {}", constant.to_json())
            }
            ValueRule::CurrentValue => "Resolves to the current market value".to_string(),
            ValueRule::OtherMarketValue { url } => {
                format!("Resolved (or current, if not resolved) value of `{}`", url)
            }
            ValueRule::Negate(_) => "100 minus the value below".to_string(),
            ValueRule::Sum(_) => "The sum of the below".to_string(),
            ValueRule::Product(_) => "The product of the below".to_string(),
            ValueRule::Modulus(_) => {
                "A mod B, where A is the first line below and B each line after".to_string()
            }
            ValueRule::RandomIndex(random) => {
                let mut text = format!("Resolves to a random answer at index {} or later", random.start);
                if let Some(limit) = random.limit {
                    text.push_str(&format!(", among the first {} of those", limit));
                }
                if random.weighted {
                    text.push_str(", weighted by current probability");
                }
                if let Some(seed) = &random.seed {
                    text.push_str(&format!(", seeded with {}", seed.to_json()));
                }
                text
            }
            ValueRule::MultipleValues(_) => "Resolves to the weighted union of the below".to_string(),
            ValueRule::PrDelta { pull, start } => format!(
                "Resolves to the days between {} and the merge of GitHub PR {}, or MAX if it is not merged",
                start.to_rfc3339(),
                pull
            ),
            ValueRule::PrMerged(pull) => {
                format!("Resolves YES if GitHub PR {} is merged, otherwise NO", pull)
            }
            ValueRule::Popular { size } => format!(
                "Resolves to the {} most probable answers, weighted by their probability",
                size
            ),
            ValueRule::Fibonacci { .. } => {
                "Weight each answer by the Fibonacci rank of its probability".to_string()
            }
            ValueRule::Round => "Resolves to round(MKT)".to_string(),
            ValueRule::AmplifiedOdds { url, a, .. } => {
                format!("Amplified odds of `{}` by a factor of {}", url, a)
            }
            ValueRule::Conditional { .. } => {
                "Cancels if the first rule below resolves False, otherwise resolves to the value of the second"
                    .to_string()
            }
            ValueRule::UserStat { user, metric, period } => format!(
                "Resolves to the current {} {} user {}",
                period.as_str(),
                metric.describe(),
                user
            ),
        }
    }

    fn details(&self, indent: usize) -> String {
        match self {
            ValueRule::Fibonacci { exclude, min_rewarded } => {
                let mut out = String::new();
                if !exclude.is_empty() {
                    out.push_str(&line(indent, &format!("Skip answers {:?}", exclude)));
                }
                out.push_str(&line(
                    indent,
                    &format!("Skip answers below {}%", min_rewarded * 100.0),
                ));
                out.push_str(&line(indent, "Sort the rest by ascending probability"));
                out.push_str(&line(indent, "Weight them 1, 1, 2, 3, 5, ... in that order"));
                out
            }
            ValueRule::AmplifiedOdds { a, seed, .. } => {
                let mut out = line(indent, "If the referenced market resolves YES, resolve YES");
                let draw = match seed {
                    Some(seed) => format!("If it resolves NO, draw a random number seeded with {}", seed.to_json()),
                    None => "If it resolves NO, draw a random number".to_string(),
                };
                out.push_str(&line(indent, &draw));
                out.push_str(&line(
                    indent + 1,
                    &format!("If the number is less than 1 / {} (~{:.4}), resolve NO", a, 1.0 / *a as f64),
                ));
                out.push_str(&line(indent + 1, "Otherwise, resolve N/A"));
                out.push_str(&line(
                    indent,
                    &format!(
                        "Otherwise, resolve to the reference probability p scaled to p / (p + (1 - p) / {})",
                        a
                    ),
                ));
                out
            }
            _ => String::new(),
        }
    }

    pub fn explain_abstract(&self, indent: usize) -> String {
        let mut out = line(indent, &self.describe());
        out.push_str(&self.details(indent + 1));
        match self {
            ValueRule::MultipleValues(shares) => {
                for share in shares {
                    out.push_str(&line(indent + 1, &format!("At a weight of {}:", share.weight)));
                    out.push_str(&share.rule.explain_abstract(indent + 2));
                }
            }
            ValueRule::Conditional { premise, value } => {
                out.push_str(&premise.explain_abstract(indent + 1));
                out.push_str(&value.explain_abstract(indent + 1));
            }
            _ => {
                for child in self.children() {
                    out.push_str(&child.explain_abstract(indent + 1));
                }
            }
        }
        out
    }

    fn explain_skipped(&self, indent: usize) -> String {
        let mut out = line(indent, &format!("{} (not evaluated)", self.describe()));
        out.push_str(&self.details(indent + 1));
        for child in self.children() {
            out.push_str(&child.explain_abstract(indent + 1));
        }
        out
    }

    pub fn explain_specific<'a>(
        &'a self,
        ctx: &'a EvalContext<'a>,
        indent: usize,
    ) -> BoxFuture<'a, Result<String, RuleError>> {
        async move { Ok(self.explain_with_value(ctx, indent).await?.0) }.boxed()
    }

    /// Children stop rendering values where evaluation stops: after a
    /// CANCEL, or past a conditional whose premise failed.
    fn explain_with_value<'a>(
        &'a self,
        ctx: &'a EvalContext<'a>,
        indent: usize,
    ) -> BoxFuture<'a, Result<(String, OutcomeValue), RuleError>> {
        async move {
            let mut text = self.describe();
            if let ValueRule::OtherMarketValue { url } | ValueRule::AmplifiedOdds { url, .. } = self {
                text.push_str(&format!(" ({})", ctx.other_market(url).await?.question));
            }
            let value = self.evaluate(ctx).await?;
            let mut out = line(indent, &format!("{} (-> {})", text, value));
            out.push_str(&self.details(indent + 1));
            match self {
                ValueRule::Conditional { premise, value: then } => {
                    let (premise_text, holds) = premise.explain_with_value(ctx, indent + 1).await?;
                    out.push_str(&premise_text);
                    if holds {
                        out.push_str(&then.explain_with_value(ctx, indent + 1).await?.0);
                    } else {
                        out.push_str(&then.explain_skipped(indent + 1));
                    }
                }
                ValueRule::MultipleValues(shares) => {
                    let mut cancelled = false;
                    for share in shares {
                        out.push_str(&line(indent + 1, &format!("At a weight of {}:", share.weight)));
                        if cancelled {
                            out.push_str(&share.rule.explain_skipped(indent + 2));
                            continue;
                        }
                        let (child_text, child_value) = share.rule.explain_with_value(ctx, indent + 2).await?;
                        out.push_str(&child_text);
                        cancelled = child_value == OutcomeValue::Cancel;
                    }
                }
                _ => {
                    let mut cancelled = false;
                    for child in self.children() {
                        if cancelled {
                            out.push_str(&child.explain_skipped(indent + 1));
                            continue;
                        }
                        let (child_text, child_value) = child.explain_with_value(ctx, indent + 1).await?;
                        out.push_str(&child_text);
                        cancelled = child_value == OutcomeValue::Cancel;
                    }
                }
            }
            Ok((out, value))
        }
        .boxed()
    }

    pub fn collect_kinds(&self, kinds: &mut Vec<&'static str>) {
        if !kinds.contains(&self.kind()) {
            kinds.push(self.kind());
        }
        if let ValueRule::Conditional { premise, .. } = self {
            premise.collect_kinds(kinds);
        }
        for child in self.children() {
            child.collect_kinds(kinds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::OutcomeValue;
    use crate::rules::outcome::ConstantValue;
    use crate::rules::registry::Registry;
    use crate::rules::resolve::Share;
    use crate::testing::{binary_market, future, past, MockPlatform, MockSourceHost};
    use chrono::Utc;

    #[test]
    fn test_abstract_indents_children() {
        let rule = TriggerRule::not(TriggerRule::at(past()));
        let text = rule.explain_abstract(0);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "- If the rule below resolves False");
        assert!(lines[1].starts_with("  - If the current time is past "));
    }

    #[test]
    fn test_blend_lists_weights() {
        let rule = ValueRule::blend(vec![
            Share { rule: ValueRule::CurrentValue, weight: 2.0 },
            Share { rule: ValueRule::constant(ConstantValue::Number(10.0)), weight: 1.0 },
        ])
        .unwrap();
        let text = rule.explain_abstract(1);
        assert!(text.starts_with("  - Resolves to the weighted union of the below\n"));
        assert!(text.contains("    - At a weight of 2:\n      - Resolves to the current market value\n"));
    }

    #[tokio::test]
    async fn test_specific_shows_values() {
        let market = binary_market();
        let platform = MockPlatform::default().with_current(OutcomeValue::Probability(30.0));
        let source_host = MockSourceHost::default();
        let ctx = EvalContext::new(&market, &platform, &source_host, Utc::now());

        let rule = ValueRule::negate(ValueRule::CurrentValue);
        let text = rule.explain_specific(&ctx, 0).await.unwrap();
        assert_eq!(
            text,
            "- 100 minus the value below (-> 70.00%)\n  - Resolves to the current market value (-> 30.00%)\n"
        );

        let rule = TriggerRule::either(TriggerRule::at(future()), TriggerRule::at(past()));
        let text = rule.explain_specific(&ctx, 0).await.unwrap();
        assert!(text.starts_with("- If either of the rules below resolves True (-> true)\n"));
        assert!(text.contains("(-> false)"));
    }

    #[tokio::test]
    async fn test_unreached_children_not_evaluated() {
        let url = "https://manifold.markets/user/elsewhere";
        let market = binary_market();
        let platform = MockPlatform::default().failing(url);
        let source_host = MockSourceHost::default();
        let ctx = EvalContext::new(&market, &platform, &source_host, Utc::now());

        let rule = TriggerRule::all(vec![
            TriggerRule::at(future()),
            TriggerRule::OtherMarketClosed { url: url.into() },
            TriggerRule::not(TriggerRule::at(past())),
        ])
        .unwrap();
        let text = rule.explain_specific(&ctx, 0).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "- If all of the rules below resolve True (-> false)");
        assert!(lines[1].ends_with("(-> false)"));
        assert_eq!(lines[2], format!("  - If `{}` closes (not evaluated)", url));
        assert_eq!(lines[3], "  - If the rule below resolves False (not evaluated)");
        assert!(lines[4].starts_with("    - If the current time is past "));
        assert_eq!(platform.other_market_calls(), 0);
    }

    #[tokio::test]
    async fn test_conditional_skips_value_when_premise_fails() {
        let market = binary_market();
        let platform = MockPlatform::default();
        let source_host = MockSourceHost::default();
        let ctx = EvalContext::new(&market, &platform, &source_host, Utc::now());

        let rule = ValueRule::Conditional {
            premise: Box::new(TriggerRule::at(future())),
            value: Box::new(ValueRule::CurrentValue),
        };
        let text = rule.explain_specific(&ctx, 0).await.unwrap();
        assert!(text.starts_with("- Cancels if the first rule below resolves False"));
        assert!(text.lines().next().unwrap().ends_with("(-> CANCEL)"));
        assert!(text.ends_with("  - Resolves to the current market value (not evaluated)\n"));
        assert_eq!(platform.current_value_calls(), 0);

        let abstract_text = rule.explain_abstract(0);
        assert_eq!(abstract_text.lines().count(), 3);
    }

    #[test]
    fn test_amplified_odds_lists_steps() {
        let rule = ValueRule::AmplifiedOdds { url: "https://manifold.markets/a/b".into(), a: 4, seed: None };
        let text = rule.explain_abstract(0);
        assert!(text.starts_with("- Amplified odds of `https://manifold.markets/a/b` by a factor of 4\n"));
        assert!(text.contains("    - If the number is less than 1 / 4 (~0.2500), resolve NO\n"));
        assert!(text.contains("    - Otherwise, resolve N/A\n"));
    }

    #[test]
    fn test_every_kind_has_summary() {
        for kind in Registry::global().kinds() {
            assert!(kind_summary(kind).is_some(), "{} has no summary", kind);
        }
        assert!(kind_summary("generic.Bogus").is_none());
    }

    #[test]
    fn test_collect_kinds_dedups() {
        let rule = TriggerRule::both(
            TriggerRule::at(past()),
            TriggerRule::not(TriggerRule::at(future())),
        );
        let mut kinds = Vec::new();
        rule.collect_kinds(&mut kinds);
        assert_eq!(kinds, vec!["generic.BothRule", "generic.ResolveAtTime", "generic.NotRule"]);
    }
}
