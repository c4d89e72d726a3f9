use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::data::accessor::{Applier, MarketAccessor, SourceHostAccessor};
use crate::data::types::OutcomeValue;
use crate::execution::confirm::Confirmer;
use crate::execution::persistence::MarketDatabase;
use crate::execution::types::{CheckState, CycleSummary, Decision, Proposal};
use crate::market::Market;
use crate::monitoring::logger::ResolutionLog;

/// Drives check cycles over every managed market
pub struct Scheduler {
    db: MarketDatabase,
    platform: Arc<dyn MarketAccessor>,
    source_host: Arc<dyn SourceHostAccessor>,
    applier: Arc<dyn Applier>,
    confirmer: Box<dyn Confirmer>,
    log: Option<ResolutionLog>,
    dry_run: bool,
}

impl Scheduler {
    pub fn new(
        db: MarketDatabase,
        platform: Arc<dyn MarketAccessor>,
        source_host: Arc<dyn SourceHostAccessor>,
        applier: Arc<dyn Applier>,
        confirmer: Box<dyn Confirmer>,
    ) -> Self {
        Self {
            db,
            platform,
            source_host,
            applier,
            confirmer,
            log: None,
            dry_run: false,
        }
    }

    pub fn with_log(mut self, log: ResolutionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Decide as usual but never write to the platform
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn database(&self) -> &MarketDatabase {
        &self.db
    }

    /// Create queued markets, highest priority first. Returns how many were created.
    ///
    /// A request leaves the queue as soon as its market exists on the
    /// platform, so a storage failure afterwards never creates it twice.
    pub async fn process_pending(&self) -> Result<usize> {
        let mut created = 0;
        for (id, priority, cost, request) in self.db.pending_requests()? {
            if let Err(e) = request.validate() {
                warn!("Dropping invalid creation request {} ({}): {}", id, request.question, e);
                if let Err(e) = self.db.remove_pending(id) {
                    warn!("Failed to drop pending request {}: {:#}", id, e);
                }
                continue;
            }
            if self.dry_run {
                info!(
                    "[DRY RUN] Would create \"{}\" (priority {}, cost {})",
                    request.question, priority, cost
                );
                continue;
            }

            let snapshot = match self.applier.create_market(&request).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Failed to create \"{}\": {:#}", request.question, e);
                    continue;
                }
            };
            if let Err(e) = self.db.remove_pending(id) {
                warn!("Created {} but could not dequeue request {}: {:#}", snapshot.url, id, e);
            }

            let url = snapshot.url.clone();
            let stored = request
                .into_market(snapshot)
                .map_err(anyhow::Error::from)
                .and_then(|market| Ok((self.db.insert_market(&market)?, market)));
            match stored {
                Ok((row, market)) => {
                    info!("Created market {} ({}) as row {}", market.id(), url, row);
                    created += 1;
                }
                Err(e) => warn!("Created {} but failed to store it; add it by hand: {:#}", url, e),
            }
        }
        Ok(created)
    }

    /// Run one market through a check cycle. The caller persists the market
    /// afterwards; an error leaves `last_checked` untouched.
    pub async fn check_market(
        &self,
        market: &mut Market,
        refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<CheckState> {
        if !refresh && !market.is_due(now) {
            return Ok(CheckState::Idle);
        }
        let mut state = CheckState::Due;
        debug!("Market {} is {}", market.id(), state);

        let snapshot = self
            .platform
            .get_market(market.id())
            .await
            .with_context(|| format!("Failed to refresh market {}", market.id()))?;
        market.refresh(snapshot);
        if market.market().is_resolved {
            info!("Market {} was already resolved on the platform", market.id());
            return Ok(CheckState::Resolved);
        }

        let proposal = {
            let ctx = market.context(self.platform.as_ref(), self.source_host.as_ref(), now);
            state = CheckState::Evaluating;
            debug!("Market {} is {}", market.id(), state);
            if !market.should_resolve(&ctx).await? {
                None
            } else {
                let value = market.resolve_to(&ctx).await?;
                let explanation = match market.explain_specific(&ctx).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to explain {}; sending the rule summary: {}", market.id(), e);
                        market.explain_abstract()
                    }
                };
                debug!("Pass for {} served {} cached reads", market.id(), ctx.cached_reads());
                Some(Proposal {
                    market_id: market.id().to_string(),
                    question: market.market().question.clone(),
                    url: market.market().url.clone(),
                    value,
                    explanation,
                })
            }
        };

        let proposal = match proposal {
            Some(proposal) => proposal,
            None => {
                market.mark_checked(now);
                return Ok(CheckState::Idle);
            }
        };
        state = CheckState::Triggered;
        info!("Market {} {}: proposing {}", market.id(), state, proposal.value);

        state = CheckState::AwaitingConfirmation;
        debug!("Market {} is {}", market.id(), state);
        let decision = self.confirmer.confirm(market.market(), &proposal).await?;

        // a confirmed CANCEL value is a cancellation
        let decision = match (decision, &proposal.value) {
            (Decision::Resolve, OutcomeValue::Cancel) => Decision::Cancel,
            (decision, _) => decision,
        };
        let applied = !self.dry_run && decision != Decision::Skip;
        match decision {
            Decision::Resolve if applied => self.applier.resolve(market.market(), &proposal.value).await?,
            Decision::Cancel if applied => self.applier.cancel(market.market()).await?,
            Decision::Resolve | Decision::Cancel => {
                info!("[DRY RUN] Would {} {} ({})", decision, market.id(), proposal.value)
            }
            Decision::Skip => info!("Skipped {}", market.id()),
        }
        market.mark_checked(now);

        if let Some(log) = &self.log {
            if let Err(e) = log.log_decision(now, &proposal, decision, applied) {
                warn!("Failed to log decision for {}: {:#}", market.id(), e);
            }
        }

        Ok(match decision {
            Decision::Resolve => CheckState::Resolved,
            Decision::Cancel => CheckState::Cancelled,
            Decision::Skip => CheckState::Skipped,
        })
    }

    /// One pass: create pending markets, then check every stored market in order
    pub async fn run_cycle(&self, refresh: bool) -> Result<CycleSummary> {
        let mut summary = CycleSummary {
            created: self.process_pending().await?,
            ..CycleSummary::default()
        };

        let now = Utc::now();
        for (row, mut market) in self.db.load_markets()? {
            if !refresh && !market.is_due(now) {
                continue;
            }
            summary.checked += 1;

            let state = match self.check_market(&mut market, refresh, now).await {
                Ok(state) => state,
                Err(e) => {
                    warn!("Check failed for market {}: {:#}", market.id(), e);
                    if let Some(log) = &self.log {
                        if let Err(e) = log.log_event(market.id(), &format!("check failed: {:#}", e)) {
                            warn!("Failed to log event: {:#}", e);
                        }
                    }
                    summary.failed += 1;
                    continue;
                }
            };

            match state {
                CheckState::Resolved => summary.resolved += 1,
                CheckState::Cancelled => summary.cancelled += 1,
                CheckState::Skipped => summary.skipped += 1,
                _ => {}
            }

            let finished = matches!(state, CheckState::Resolved | CheckState::Cancelled);
            let stored = if finished && (!self.dry_run || market.market().is_resolved) {
                self.db.remove_market(row).map(|_| {
                    info!("Market {} is {}; no longer managed", market.id(), state);
                })
            } else {
                self.db.update_market(row, &market)
            };
            if let Err(e) = stored {
                warn!("Failed to store market {} (row {}): {:#}", market.id(), row, e);
                summary.failed += 1;
            }
        }

        info!(
            "Cycle done: {} created, {} checked, {} resolved, {} cancelled, {} skipped, {} failed",
            summary.created,
            summary.checked,
            summary.resolved,
            summary.cancelled,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }
}
