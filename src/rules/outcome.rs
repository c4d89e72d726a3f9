//! Interpretation of raw constants and conformance of rule outputs to a
//! market's outcome type.

use serde_json::{Map, Value};
use crate::data::types::{Distribution, MarketRef, OutcomeType, OutcomeValue};
use crate::rules::RuleError;

/// A constant as written in a rule, before it meets a market
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Bool(bool),
    Number(f64),
    Distribution(Distribution),
    /// Written as the string `"CANCEL"`
    Cancel,
}

impl ConstantValue {
    pub fn from_json(kind: &str, value: &Value) -> Result<Self, RuleError> {
        match value {
            Value::Bool(b) => Ok(ConstantValue::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(ConstantValue::Number)
                .ok_or_else(|| RuleError::malformed(kind, format!("unrepresentable number {}", n))),
            Value::Object(map) => {
                let mut dist = Distribution::new();
                for (key, weight) in map {
                    let index = key
                        .parse::<usize>()
                        .map_err(|_| RuleError::malformed(kind, format!("answer index {:?} is not an integer", key)))?;
                    let weight = weight
                        .as_f64()
                        .filter(|w| *w >= 0.0)
                        .ok_or_else(|| RuleError::malformed(kind, format!("weight for answer {} must be a non-negative number", index)))?;
                    dist.insert(index, weight);
                }
                Ok(ConstantValue::Distribution(dist))
            }
            Value::String(s) if s == "CANCEL" => Ok(ConstantValue::Cancel),
            other => Err(RuleError::malformed(kind, format!("unsupported constant {}", other))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ConstantValue::Bool(b) => Value::Bool(*b),
            ConstantValue::Number(x) => serde_json::json!(x),
            ConstantValue::Distribution(dist) => {
                let map: Map<String, Value> = dist
                    .iter()
                    .map(|(index, weight)| (index.to_string(), serde_json::json!(weight)))
                    .collect();
                Value::Object(map)
            }
            ConstantValue::Cancel => Value::String("CANCEL".to_string()),
        }
    }

    /// Read the constant in the shape the market resolves to
    pub fn interpret(&self, market: &MarketRef) -> Result<OutcomeValue, RuleError> {
        match (market.outcome_type, self) {
            (_, ConstantValue::Cancel) => Ok(OutcomeValue::Cancel),
            (OutcomeType::Binary, ConstantValue::Bool(b)) => Ok(OutcomeValue::Bool(*b)),
            (OutcomeType::Binary, ConstantValue::Number(p)) => Ok(OutcomeValue::Probability(*p)),
            (OutcomeType::PseudoNumeric, ConstantValue::Number(x)) => Ok(OutcomeValue::Numeric(*x)),
            (t, ConstantValue::Number(x)) if t.is_categorical() => {
                if x.fract() != 0.0 || *x < 0.0 {
                    return Err(RuleError::mismatch("answer index", x.to_string()));
                }
                Ok(OutcomeValue::single_answer(*x as usize))
            }
            (t, ConstantValue::Distribution(dist)) if t.is_categorical() => {
                Ok(OutcomeValue::Distribution(dist.clone()))
            }
            (t, constant) => Err(RuleError::mismatch(t.to_string(), format!("{:?}", constant))),
        }
    }
}

/// Rescale weights so they sum to 100
pub fn normalize(dist: &Distribution) -> Result<Distribution, RuleError> {
    let total: f64 = dist.values().sum();
    if total <= 0.0 {
        return Err(RuleError::InvalidValue("distribution has no weight".to_string()));
    }
    Ok(dist
        .iter()
        .map(|(index, weight)| (*index, weight * 100.0 / total))
        .collect())
}

/// Fail if a distribution names an answer the market does not have
pub fn check_answers(dist: &Distribution, market: &MarketRef) -> Result<(), RuleError> {
    match dist.keys().find(|index| **index >= market.answers.len()) {
        Some(index) => Err(RuleError::mismatch(
            format!("distribution over {} answers", market.answers.len()),
            format!("answer index {}", index),
        )),
        None => Ok(()),
    }
}

/// Final shape check before a value is offered for resolution
pub fn conform(value: OutcomeValue, market: &MarketRef) -> Result<OutcomeValue, RuleError> {
    match (market.outcome_type, value) {
        (_, OutcomeValue::Cancel) => Ok(OutcomeValue::Cancel),
        (OutcomeType::Binary, OutcomeValue::Bool(b)) => {
            Ok(OutcomeValue::Probability(if b { 100.0 } else { 0.0 }))
        }
        (OutcomeType::Binary, OutcomeValue::Probability(p)) => {
            if !(0.0..=100.0).contains(&p) {
                return Err(RuleError::InvalidValue(format!("probability {} outside 0-100", p)));
            }
            Ok(OutcomeValue::Probability(p))
        }
        (OutcomeType::PseudoNumeric, OutcomeValue::Numeric(x)) => {
            let lower = market.min_value.unwrap_or(f64::NEG_INFINITY);
            let upper = market.max_value.unwrap_or(f64::INFINITY);
            Ok(OutcomeValue::Numeric(x.max(lower).min(upper)))
        }
        (t, OutcomeValue::Distribution(dist)) if t.is_categorical() => {
            check_answers(&dist, market)?;
            Ok(OutcomeValue::Distribution(normalize(&dist)?))
        }
        (t, other) => Err(RuleError::mismatch(t.to_string(), other.variant_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{binary_market, categorical_market, numeric_market};
    use serde_json::json;

    #[test]
    fn test_constant_depends_on_market() {
        let constant = ConstantValue::Number(1.0);
        assert_eq!(
            constant.interpret(&binary_market()).unwrap(),
            OutcomeValue::Probability(1.0)
        );
        assert_eq!(
            constant.interpret(&numeric_market(0.0, 10.0)).unwrap(),
            OutcomeValue::Numeric(1.0)
        );
        assert_eq!(
            constant.interpret(&categorical_market(&["A", "B"])).unwrap(),
            OutcomeValue::single_answer(1)
        );
    }

    #[test]
    fn test_fractional_index_rejected() {
        let err = ConstantValue::Number(1.5)
            .interpret(&categorical_market(&["A", "B"]))
            .unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
    }

    #[test]
    fn test_constant_distribution_json() {
        let constant = ConstantValue::from_json("generic.ResolveToValue", &json!({"0": 25, "2": 75})).unwrap();
        let ConstantValue::Distribution(dist) = &constant else {
            panic!("expected a distribution");
        };
        assert_eq!(dist.get(&2), Some(&75.0));

        let back = ConstantValue::from_json("generic.ResolveToValue", &constant.to_json()).unwrap();
        assert_eq!(back, constant);

        let err = ConstantValue::from_json("generic.ResolveToValue", &json!({"x": 1})).unwrap_err();
        assert!(matches!(err, RuleError::MalformedArguments { .. }));
    }

    #[test]
    fn test_conform_binary_bool() {
        assert_eq!(
            conform(OutcomeValue::Bool(true), &binary_market()).unwrap(),
            OutcomeValue::Probability(100.0)
        );
        assert!(conform(OutcomeValue::Probability(130.0), &binary_market()).is_err());
    }

    #[test]
    fn test_conform_clamps_numeric() {
        let market = numeric_market(0.0, 10.0);
        assert_eq!(
            conform(OutcomeValue::Numeric(12.0), &market).unwrap(),
            OutcomeValue::Numeric(10.0)
        );
    }

    #[test]
    fn test_conform_rejects_foreign_answers() {
        let market = categorical_market(&["A", "B"]);
        let err = conform(OutcomeValue::single_answer(2), &market).unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));

        let err = conform(OutcomeValue::Probability(50.0), &market).unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
    }

    #[test]
    fn test_cancel_constant_fits_every_market() {
        let constant = ConstantValue::from_json("generic.ResolveToValue", &json!("CANCEL")).unwrap();
        assert_eq!(constant, ConstantValue::Cancel);
        assert_eq!(constant.to_json(), json!("CANCEL"));
        for market in [binary_market(), numeric_market(0.0, 1.0), categorical_market(&["A"])] {
            let value = constant.interpret(&market).unwrap();
            assert_eq!(conform(value, &market).unwrap(), OutcomeValue::Cancel);
        }
        assert!(ConstantValue::from_json("generic.ResolveToValue", &json!("YES")).is_err());
    }

    #[test]
    fn test_conform_renormalizes() {
        let market = categorical_market(&["A", "B"]);
        let value = OutcomeValue::Distribution(Distribution::from([(0, 1.0), (1, 1.0)]));
        assert_eq!(
            conform(value, &market).unwrap(),
            OutcomeValue::Distribution(Distribution::from([(0, 50.0), (1, 50.0)]))
        );
    }
}
