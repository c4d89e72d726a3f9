use chrono::{DateTime, Utc};
use tracing::debug;
use crate::data::accessor::{MarketAccessor, SourceHostAccessor};
use crate::data::cache::PassCache;
use crate::data::types::{
    Distribution, MarketRef, OtherMarket, OutcomeValue, PullRef, PullRequest, UserStats,
};
use crate::rules::RuleError;

/// Everything a rule may consult during one evaluation pass over one market.
///
/// Created fresh per market per cycle. Repeated reads of the same key are
/// served from the pass cache so sibling rules see one consistent snapshot.
pub struct EvalContext<'a> {
    pub market: &'a MarketRef,
    pub now: DateTime<Utc>,
    platform: &'a dyn MarketAccessor,
    source_host: &'a dyn SourceHostAccessor,
    cache: PassCache,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        market: &'a MarketRef,
        platform: &'a dyn MarketAccessor,
        source_host: &'a dyn SourceHostAccessor,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            market,
            now,
            platform,
            source_host,
            cache: PassCache::new(),
        }
    }

    pub async fn current_value(&self) -> Result<OutcomeValue, RuleError> {
        if let Some(value) = self.cache.current_values.get(&self.market.id) {
            debug!("Cache hit: current value of {}", self.market.id);
            return Ok(value);
        }
        let value = self.platform.get_current_value(self.market).await?;
        self.cache
            .current_values
            .insert(self.market.id.clone(), value.clone());
        Ok(value)
    }

    pub async fn other_market(&self, url: &str) -> Result<OtherMarket, RuleError> {
        let key = url.to_string();
        if let Some(market) = self.cache.other_markets.get(&key) {
            debug!("Cache hit: other market {}", url);
            return Ok(market);
        }
        let market = self.platform.get_other_market(url).await?;
        self.cache.other_markets.insert(key, market.clone());
        Ok(market)
    }

    pub async fn pull_request(&self, pull: &PullRef) -> Result<PullRequest, RuleError> {
        if let Some(pr) = self.cache.pull_requests.get(pull) {
            debug!("Cache hit: pull request {}", pull);
            return Ok(pr);
        }
        let pr = self.source_host.get_pull_request(pull).await?;
        self.cache.pull_requests.insert(pull.clone(), pr.clone());
        Ok(pr)
    }

    pub async fn user(&self, username: &str) -> Result<UserStats, RuleError> {
        let key = username.to_string();
        if let Some(stats) = self.cache.users.get(&key) {
            debug!("Cache hit: user {}", username);
            return Ok(stats);
        }
        let stats = self.platform.get_user(username).await?;
        self.cache.users.insert(key, stats.clone());
        Ok(stats)
    }

    /// Seed for an unseeded draw made by the rule node at `node`. Drawn once
    /// per pass so evaluating and explaining the node agree.
    pub fn entropy_seed(&self, node: usize) -> u64 {
        self.cache.entropy_seeds.get_or_insert_with(node, rand::random::<u64>)
    }

    /// Current answer weights of a categorical market
    pub async fn current_distribution(&self) -> Result<Distribution, RuleError> {
        match self.current_value().await? {
            OutcomeValue::Distribution(dist) => Ok(dist),
            other => Err(RuleError::mismatch("Distribution", other.variant_name())),
        }
    }

    pub fn cached_reads(&self) -> usize {
        self.cache.len()
    }
}
