use rand::distributions::{Distribution as _, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::ops::Range;
use crate::data::types::OutcomeValue;
use crate::rules::context::EvalContext;
use crate::rules::RuleError;

/// Seed for a reproducible draw. Text seeds are hashed into the generator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    Int(u64),
    Text(String),
}

impl Seed {
    pub fn rng(&self) -> StdRng {
        match self {
            Seed::Int(n) => StdRng::seed_from_u64(*n),
            Seed::Text(text) => {
                let digest = Sha256::digest(text.as_bytes());
                StdRng::from_seed(digest.into())
            }
        }
    }

    pub fn from_json(kind: &str, value: &Value) -> Result<Self, RuleError> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(Seed::Int)
                .ok_or_else(|| RuleError::malformed(kind, "seed must be a non-negative integer or a string")),
            Value::String(text) => Ok(Seed::Text(text.clone())),
            _ => Err(RuleError::malformed(kind, "seed must be a non-negative integer or a string")),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Seed::Int(n) => Value::from(*n),
            Seed::Text(text) => Value::from(text.as_str()),
        }
    }
}

/// Pick one answer index at random, optionally weighted by the market's
/// current probabilities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RandomIndex {
    pub start: usize,
    pub limit: Option<usize>,
    pub weighted: bool,
    pub seed: Option<Seed>,
}

impl RandomIndex {
    /// Answers at index >= start, capped to the first `limit` of those
    pub fn candidates(&self, answer_count: usize) -> Range<usize> {
        let end = match self.limit {
            Some(limit) => self.start.saturating_add(limit).min(answer_count),
            None => answer_count,
        };
        self.start..end.max(self.start)
    }

    pub async fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<OutcomeValue, RuleError> {
        if !ctx.market.outcome_type.is_categorical() {
            return Err(RuleError::mismatch(
                "categorical market",
                ctx.market.outcome_type.to_string(),
            ));
        }
        let candidates = self.candidates(ctx.market.answers.len());
        if candidates.is_empty() {
            return Err(RuleError::InvalidValue(format!(
                "no answers at or after index {}",
                self.start
            )));
        }

        let weights: Vec<f64> = if self.weighted {
            let current = ctx.current_distribution().await?;
            candidates
                .clone()
                .map(|index| current.get(&index).copied().unwrap_or(0.0))
                .collect()
        } else {
            vec![1.0; candidates.len()]
        };

        let mut rng = draw_rng(self.seed.as_ref(), ctx, self as *const Self as usize);
        let offset = sample_index(&weights, &mut rng)?;
        Ok(OutcomeValue::single_answer(candidates.start + offset))
    }
}

/// Generator for one draw: the rule's own seed, or pass entropy tied to `node`
pub fn draw_rng(seed: Option<&Seed>, ctx: &EvalContext<'_>, node: usize) -> StdRng {
    match seed {
        Some(seed) => seed.rng(),
        None => StdRng::seed_from_u64(ctx.entropy_seed(node)),
    }
}

/// Draw a position in `weights` with probability proportional to its weight
pub fn sample_index<R: Rng>(weights: &[f64], rng: &mut R) -> Result<usize, RuleError> {
    let dist = WeightedIndex::new(weights)
        .map_err(|e| RuleError::InvalidValue(format!("cannot sample from weights {:?}: {}", weights, e)))?;
    Ok(dist.sample(rng))
}
