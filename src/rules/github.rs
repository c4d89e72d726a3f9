//! Rules backed by pull-request state on the source-hosting platform.

use chrono::{DateTime, Utc};
use crate::data::types::{OutcomeType, OutcomeValue, PrState, PullRef};
use crate::rules::context::EvalContext;
use crate::rules::RuleError;

const SECONDS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// Merged or closed without merging
pub async fn is_terminal(pull: &PullRef, ctx: &EvalContext<'_>) -> Result<bool, RuleError> {
    Ok(ctx.pull_request(pull).await?.state.is_terminal())
}

pub async fn is_merged(pull: &PullRef, ctx: &EvalContext<'_>) -> Result<bool, RuleError> {
    Ok(ctx.pull_request(pull).await?.state == PrState::Merged)
}

/// Fractional days between `start` and the merge. Anything not merged
/// (rejected or still open) resolves to the market's maximum.
pub async fn merge_delta(
    pull: &PullRef,
    start: DateTime<Utc>,
    ctx: &EvalContext<'_>,
) -> Result<OutcomeValue, RuleError> {
    if ctx.market.outcome_type != OutcomeType::PseudoNumeric {
        return Err(RuleError::mismatch(
            OutcomeType::PseudoNumeric.to_string(),
            ctx.market.outcome_type.to_string(),
        ));
    }
    let max_value = ctx
        .market
        .max_value
        .ok_or_else(|| RuleError::InvalidMarket("numeric market has no max value".to_string()))?;

    let pr = ctx.pull_request(pull).await?;
    match (pr.state, pr.merged_at) {
        (PrState::Merged, Some(merged_at)) => {
            let delta = merged_at - start;
            Ok(OutcomeValue::Numeric(delta.num_seconds() as f64 / SECONDS_PER_DAY))
        }
        _ => Ok(OutcomeValue::Numeric(max_value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::PullRequest;
    use crate::testing::{binary_market, numeric_market, MockPlatform, MockSourceHost};
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_delta_of_merged_pr() {
        let pull = PullRef::new("o", "r", 830);
        let source_host = MockSourceHost::default().with_pull(
            pull.clone(),
            PullRequest {
                state: PrState::Merged,
                merged_at: Some(start() + Duration::hours(36)),
                closed_at: Some(start() + Duration::hours(36)),
            },
        );
        let platform = MockPlatform::default();
        let market = numeric_market(0.0, 365.0);
        let ctx = EvalContext::new(&market, &platform, &source_host, Utc::now());

        assert_eq!(merge_delta(&pull, start(), &ctx).await.unwrap(), OutcomeValue::Numeric(1.5));
    }

    #[tokio::test]
    async fn test_delta_is_signed() {
        let pull = PullRef::new("o", "r", 1);
        let source_host = MockSourceHost::default().with_pull(
            pull.clone(),
            PullRequest {
                state: PrState::Merged,
                merged_at: Some(start() - Duration::days(2)),
                closed_at: None,
            },
        );
        let platform = MockPlatform::default();
        let market = numeric_market(-10.0, 365.0);
        let ctx = EvalContext::new(&market, &platform, &source_host, Utc::now());

        assert_eq!(merge_delta(&pull, start(), &ctx).await.unwrap(), OutcomeValue::Numeric(-2.0));
    }

    #[tokio::test]
    async fn test_rejected_pr_resolves_to_max() {
        let pull = PullRef::new("o", "r", 831);
        let source_host = MockSourceHost::default().with_pull(
            pull.clone(),
            PullRequest {
                state: PrState::Closed,
                merged_at: None,
                closed_at: Some(start() + Duration::days(3)),
            },
        );
        let platform = MockPlatform::default();
        let market = numeric_market(0.0, 365.0);
        let ctx = EvalContext::new(&market, &platform, &source_host, Utc::now());

        assert_eq!(merge_delta(&pull, start(), &ctx).await.unwrap(), OutcomeValue::Numeric(365.0));
    }

    #[tokio::test]
    async fn test_delta_needs_numeric_market() {
        let pull = PullRef::new("o", "r", 1);
        let source_host = MockSourceHost::default();
        let platform = MockPlatform::default();
        let market = binary_market();
        let ctx = EvalContext::new(&market, &platform, &source_host, Utc::now());

        assert!(matches!(
            merge_delta(&pull, start(), &ctx).await,
            Err(RuleError::TypeMismatch { .. })
        ));
    }
}
