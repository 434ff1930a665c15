//! Token budget manager
//!
//! Owns every budget, reservation, the usage-history ring, and the token
//! cache. All mutable state sits behind a single mutex; the reserve step is
//! the only point of contention for capacity, and nothing external (provider
//! calls, cost recording) happens under the lock.

use crate::budget::{BudgetPeriod, TokenBudget};
use crate::config::BudgetConfig;
use crate::error::BudgetError;
use crate::events::{AlertLevel, BudgetEvent, TokenAlert};
use crate::reservation::TokenReservation;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokenwise_core::{CostTracker, TokenUsage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Assumed monetary cost per token when projecting spend from an estimate
pub const DEFAULT_COST_PER_TOKEN: f64 = 0.001;

/// Cost-per-token above which a provider is flagged as expensive
const HIGH_COST_PER_TOKEN: f64 = 0.002;

/// Cache hit rate below which caching is suggested
const LOW_CACHE_HIT_RATE: f64 = 0.1;

/// How many recent history entries feed optimization suggestions
const SUGGESTION_WINDOW: usize = 100;

/// One recorded consumption
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub provider: String,
    pub usage: TokenUsage,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

/// Historical cost efficiency of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderEfficiency {
    pub provider: String,
    /// Tokens obtained per unit of cost, higher is better
    pub tokens_per_cost: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Aggregate view over all budgets and reservations
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatusReport {
    pub total_tokens: u64,
    pub used_tokens: u64,
    pub reserved_tokens: u64,
    pub available_tokens: u64,
    /// Used fraction of the combined allocation, as a percentage
    pub usage_percentage: f64,
    pub budgets: Vec<TokenBudget>,
    /// Reservations that have not expired
    pub active_reservations: Vec<TokenReservation>,
    pub total_consumed: u64,
    pub total_cached: u64,
    pub total_saved: u64,
}

/// Per-provider slice of the usage summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderUsage {
    pub usage: TokenUsage,
    pub cost: f64,
    pub calls: u64,
}

/// Aggregate consumption statistics
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub total_consumed: u64,
    pub total_cached: u64,
    pub total_saved: u64,
    /// Cached tokens over consumed tokens
    pub cache_hit_rate: f64,
    pub history_len: usize,
    pub cache_entries: usize,
    pub providers: HashMap<String, ProviderUsage>,
}

/// What kind of saving a suggestion proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// An expensive provider should be swapped out
    ProviderEfficiency,
    /// The token cache is underused
    CacheOptimization,
}

/// Urgency of a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    Low,
    Medium,
    High,
}

/// A token-saving opportunity derived from recent usage
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationSuggestion {
    pub kind: SuggestionKind,
    pub provider: Option<String>,
    pub message: String,
    pub priority: SuggestionPriority,
    /// Projected monetary saving, when one can be computed
    pub potential_savings: f64,
}

struct CacheEntry {
    tokens: Vec<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct ManagerState {
    /// Budgets in creation order; reserve and consume scan first-fit
    budgets: Vec<TokenBudget>,
    reservations: HashMap<Uuid, TokenReservation>,
    cache: HashMap<String, CacheEntry>,
    history: VecDeque<UsageRecord>,
    total_consumed: u64,
    total_cached: u64,
    total_saved: u64,
}

/// Owner of budgets, reservations, history, and the token cache
pub struct TokenBudgetManager {
    state: Mutex<ManagerState>,
    events: tokio::sync::broadcast::Sender<BudgetEvent>,
    cost_tracker: Option<Arc<dyn CostTracker>>,
    config: BudgetConfig,
}

impl Default for TokenBudgetManager {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

impl TokenBudgetManager {
    /// Create a manager with no budgets
    pub fn new(config: BudgetConfig) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(config.event_capacity.max(1));
        Self {
            state: Mutex::new(ManagerState::default()),
            events,
            cost_tracker: None,
            config,
        }
    }

    /// Attach a monetary cost collaborator; it can veto reservations
    pub fn with_cost_tracker(mut self, cost_tracker: Arc<dyn CostTracker>) -> Self {
        self.cost_tracker = Some(cost_tracker);
        self
    }

    /// Subscribe to budget events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BudgetEvent> {
        self.events.subscribe()
    }

    /// Create (or replace) a named budget with a window derived from `period`
    pub fn create_budget(
        &self,
        name: impl Into<String>,
        total_tokens: u64,
        period: BudgetPeriod,
    ) -> TokenBudget {
        let budget = TokenBudget::new(name, total_tokens, period);
        let mut state = self.state.lock();
        info!(
            budget = %budget.name,
            total_tokens,
            period = %budget.period,
            "created token budget"
        );
        if let Some(existing) = state.budgets.iter_mut().find(|b| b.name == budget.name) {
            *existing = budget.clone();
        } else {
            state.budgets.push(budget.clone());
        }
        budget
    }

    /// Create the fallback budget when none has been configured
    pub fn ensure_default_budget(&self) {
        if self.budget_count() == 0 {
            self.create_budget(
                "default",
                self.config.default_budget_tokens,
                BudgetPeriod::Monthly,
            );
        }
    }

    /// Number of budgets
    pub fn budget_count(&self) -> usize {
        self.state.lock().budgets.len()
    }

    /// Snapshot of one budget
    pub fn budget(&self, name: &str) -> Option<TokenBudget> {
        self.state.lock().budgets.iter().find(|b| b.name == name).cloned()
    }

    /// Snapshot of one reservation
    pub fn reservation(&self, id: Uuid) -> Option<TokenReservation> {
        self.state.lock().reservations.get(&id).cloned()
    }

    /// Whether `estimated_tokens` fit the combined free capacity
    ///
    /// Also consults the cost collaborator when one is attached: a projected
    /// spend beyond its limit vetoes availability regardless of token counts.
    pub fn check_availability(&self, estimated_tokens: u64, provider: Option<&str>) -> bool {
        let available: u64 = {
            let state = self.state.lock();
            state.budgets.iter().map(|b| b.available_tokens()).sum()
        };
        if available < estimated_tokens {
            debug!(
                estimated_tokens,
                available,
                provider = provider.unwrap_or("any"),
                "token availability check failed"
            );
            return false;
        }

        if let Some(tracker) = &self.cost_tracker {
            let estimated_cost = estimated_tokens as f64 * DEFAULT_COST_PER_TOKEN;
            if !tracker.check_budget_limit(estimated_cost) {
                warn!(
                    estimated_tokens,
                    estimated_cost, "cost limit vetoed token availability"
                );
                return false;
            }
        }
        true
    }

    /// Hold `tokens` against the first budget with capacity
    ///
    /// The availability re-check and the increment happen under one lock, so
    /// concurrent reservations can never oversubscribe a budget. Reservations
    /// are never split: when no single budget can take the full amount the
    /// call fails even if the sum across budgets would suffice.
    ///
    /// `expires_in` of `None` applies the configured default expiry; a zero
    /// duration creates a hold that never expires.
    pub fn reserve(
        &self,
        tokens: u64,
        purpose: impl Into<String>,
        provider: Option<String>,
        priority: i32,
        expires_in: Option<Duration>,
    ) -> Result<TokenReservation, BudgetError> {
        if let Some(tracker) = &self.cost_tracker {
            let estimated_cost = tokens as f64 * DEFAULT_COST_PER_TOKEN;
            if !tracker.check_budget_limit(estimated_cost) {
                warn!(tokens, estimated_cost, "reservation vetoed by cost limit");
                return Err(BudgetError::CostLimitExceeded { estimated_cost });
            }
        }

        let ttl = expires_in.unwrap_or(self.config.default_reservation_ttl);
        let expires_at = if ttl.is_zero() {
            None
        } else {
            chrono::Duration::from_std(ttl).ok().map(|d| Utc::now() + d)
        };

        let reservation = {
            let mut state = self.state.lock();
            let available: u64 = state.budgets.iter().map(|b| b.available_tokens()).sum();
            if available < tokens {
                return Err(BudgetError::InsufficientTokens {
                    requested: tokens,
                    available,
                });
            }

            let Some(slot) = state.budgets.iter_mut().find(|b| b.has_capacity_for(tokens))
            else {
                let largest = state
                    .budgets
                    .iter()
                    .map(|b| b.available_tokens())
                    .max()
                    .unwrap_or(0);
                return Err(BudgetError::InsufficientTokens {
                    requested: tokens,
                    available: largest,
                });
            };

            slot.reserved_tokens += tokens;
            let reservation = TokenReservation {
                id: Uuid::new_v4(),
                tokens,
                purpose: purpose.into(),
                provider,
                priority,
                budget_name: slot.name.clone(),
                created_at: Utc::now(),
                expires_at,
            };
            state.reservations.insert(reservation.id, reservation.clone());
            reservation
        };

        debug!(
            reservation_id = %reservation.id,
            tokens,
            budget = %reservation.budget_name,
            "reserved tokens"
        );
        let _ = self.events.send(BudgetEvent::ReservationCreated {
            reservation_id: reservation.id,
            tokens: reservation.tokens,
            purpose: reservation.purpose.clone(),
        });
        Ok(reservation)
    }

    /// Drop a hold, returning its tokens to the owning budget
    ///
    /// Idempotent: releasing an unknown or already-released id returns false.
    pub fn release(&self, reservation_id: Uuid) -> bool {
        let released = {
            let mut state = self.state.lock();
            release_locked(&mut state, reservation_id)
        };
        match released {
            Some(reservation) => {
                debug!(
                    reservation_id = %reservation.id,
                    tokens = reservation.tokens,
                    budget = %reservation.budget_name,
                    "released reservation"
                );
                let _ = self.events.send(BudgetEvent::ReservationReleased {
                    reservation_id: reservation.id,
                    tokens: reservation.tokens,
                });
                true
            }
            None => false,
        }
    }

    /// Fold real usage into the first budget with headroom
    ///
    /// Consumption represents already-incurred cost: usage beyond the
    /// remaining headroom is capped, never rejected. Crossing alert
    /// thresholds fires each threshold once per budget.
    pub fn consume(&self, provider: &str, usage: TokenUsage, cost: f64) {
        let mut alerts = Vec::new();
        let mut exceeded = Vec::new();
        {
            let mut state = self.state.lock();
            state.total_consumed += usage.total_tokens;
            state.total_cached += usage.cached_tokens;

            let record = UsageRecord {
                provider: provider.to_string(),
                usage,
                cost,
                timestamp: Utc::now(),
            };
            state.history.push_back(record);
            while state.history.len() > self.config.history_capacity {
                state.history.pop_front();
            }

            if let Some(budget) = state.budgets.iter_mut().find(|b| b.used_tokens < b.total_tokens)
            {
                let headroom = budget.remaining_headroom();
                budget.used_tokens += usage.total_tokens.min(headroom);
            }

            for budget in state.budgets.iter_mut() {
                for threshold in budget.take_crossed_thresholds() {
                    alerts.push(TokenAlert {
                        level: AlertLevel::for_threshold(threshold),
                        message: format!(
                            "Budget '{}' usage reached {:.1}%",
                            budget.name,
                            budget.used_ratio() * 100.0
                        ),
                        current_usage: budget.used_tokens,
                        budget_limit: budget.total_tokens,
                        threshold,
                        timestamp: Utc::now(),
                    });
                }
                if budget.take_exceeded() {
                    exceeded.push((budget.name.clone(), budget.used_tokens));
                }
            }
        }

        if let Some(tracker) = &self.cost_tracker {
            tracker.record_usage(provider, &usage, cost);
        }

        for alert in alerts {
            warn!(message = %alert.message, threshold = alert.threshold, "token budget alert");
            let _ = self.events.send(BudgetEvent::ThresholdAlert { alert });
        }
        for (budget_name, used_tokens) in exceeded {
            error!(budget = %budget_name, used_tokens, "token budget exceeded");
            let _ = self.events.send(BudgetEvent::BudgetExceeded {
                budget_name,
                used_tokens,
            });
        }

        debug!(provider, tokens = usage.total_tokens, cost, "consumed tokens");
        let _ = self.events.send(BudgetEvent::TokensConsumed {
            provider: provider.to_string(),
            total_tokens: usage.total_tokens,
            cost,
        });
    }

    /// Credit tokens saved by request optimization
    pub fn record_saved_tokens(&self, tokens: u64) {
        self.state.lock().total_saved += tokens;
    }

    /// Aggregate view over budgets and live reservations
    pub fn budget_status(&self) -> BudgetStatusReport {
        let state = self.state.lock();
        let now = Utc::now();
        let total_tokens: u64 = state.budgets.iter().map(|b| b.total_tokens).sum();
        let used_tokens: u64 = state.budgets.iter().map(|b| b.used_tokens).sum();
        let reserved_tokens: u64 = state.budgets.iter().map(|b| b.reserved_tokens).sum();
        BudgetStatusReport {
            total_tokens,
            used_tokens,
            reserved_tokens,
            available_tokens: total_tokens
                .saturating_sub(used_tokens)
                .saturating_sub(reserved_tokens),
            usage_percentage: if total_tokens > 0 {
                used_tokens as f64 / total_tokens as f64 * 100.0
            } else {
                0.0
            },
            budgets: state.budgets.clone(),
            active_reservations: state
                .reservations
                .values()
                .filter(|r| !r.is_expired(now))
                .cloned()
                .collect(),
            total_consumed: state.total_consumed,
            total_cached: state.total_cached,
            total_saved: state.total_saved,
        }
    }

    /// Providers ranked by tokens obtained per unit of cost, best first
    ///
    /// Providers with no recorded cost are excluded; an empty history yields
    /// an empty ranking.
    pub fn provider_efficiency_ranking(&self) -> Vec<ProviderEfficiency> {
        let state = self.state.lock();
        let mut tokens_by_provider: HashMap<String, u64> = HashMap::new();
        let mut cost_by_provider: HashMap<String, f64> = HashMap::new();
        for record in &state.history {
            *tokens_by_provider.entry(record.provider.clone()).or_default() +=
                record.usage.total_tokens;
            *cost_by_provider.entry(record.provider.clone()).or_default() += record.cost;
        }
        drop(state);

        let mut ranking: Vec<ProviderEfficiency> = tokens_by_provider
            .into_iter()
            .filter_map(|(provider, total_tokens)| {
                let total_cost = cost_by_provider.get(&provider).copied().unwrap_or(0.0);
                if total_cost > 0.0 {
                    Some(ProviderEfficiency {
                        tokens_per_cost: total_tokens as f64 / total_cost,
                        provider,
                        total_tokens,
                        total_cost,
                    })
                } else {
                    None
                }
            })
            .collect();
        ranking.sort_by(|a, b| {
            b.tokens_per_cost
                .partial_cmp(&a.tokens_per_cost)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranking
    }

    /// Memoize a token sequence under `key`
    ///
    /// `ttl` of `None` applies the configured cache expiry.
    pub fn cache_tokens(&self, key: impl Into<String>, tokens: &[String], ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.cache_ttl);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .map(|d| Utc::now() + d)
            .unwrap_or_else(Utc::now);
        let token_count: u64 = tokens.iter().map(|t| t.split_whitespace().count() as u64).sum();

        let mut state = self.state.lock();
        state.cache.insert(
            key.into(),
            CacheEntry {
                tokens: tokens.to_vec(),
                expires_at,
            },
        );
        state.total_cached += token_count;
    }

    /// Fetch a cached token sequence, dropping it when expired
    pub fn cached_tokens(&self, key: &str) -> Option<Vec<String>> {
        let mut state = self.state.lock();
        let expired = match state.cache.get(key) {
            Some(entry) => entry.expires_at <= Utc::now(),
            None => return None,
        };
        if expired {
            state.cache.remove(key);
            return None;
        }
        state.cache.get(key).map(|entry| entry.tokens.clone())
    }

    /// Aggregate consumption statistics over the full history ring
    pub fn usage_summary(&self) -> UsageSummary {
        let state = self.state.lock();
        let mut providers: HashMap<String, ProviderUsage> = HashMap::new();
        for record in &state.history {
            let entry = providers.entry(record.provider.clone()).or_default();
            entry.usage += record.usage;
            entry.cost += record.cost;
            entry.calls += 1;
        }
        UsageSummary {
            total_consumed: state.total_consumed,
            total_cached: state.total_cached,
            total_saved: state.total_saved,
            cache_hit_rate: state.total_cached as f64 / state.total_consumed.max(1) as f64,
            history_len: state.history.len(),
            cache_entries: state.cache.len(),
            providers,
        }
    }

    /// Token-saving opportunities derived from recent usage
    pub fn optimization_suggestions(&self) -> Vec<OptimizationSuggestion> {
        let recent: Vec<UsageRecord> = {
            let state = self.state.lock();
            if state.history.is_empty() {
                return Vec::new();
            }
            state
                .history
                .iter()
                .rev()
                .take(SUGGESTION_WINDOW)
                .cloned()
                .collect()
        };

        let mut suggestions = Vec::new();
        let mut tokens_by_provider: HashMap<String, u64> = HashMap::new();
        let mut cost_by_provider: HashMap<String, f64> = HashMap::new();
        for record in &recent {
            *tokens_by_provider.entry(record.provider.clone()).or_default() +=
                record.usage.total_tokens;
            *cost_by_provider.entry(record.provider.clone()).or_default() += record.cost;
        }

        for (provider, tokens) in &tokens_by_provider {
            if *tokens == 0 {
                continue;
            }
            let cost = cost_by_provider.get(provider).copied().unwrap_or(0.0);
            let cost_per_token = cost / *tokens as f64;
            if cost_per_token > HIGH_COST_PER_TOKEN {
                suggestions.push(OptimizationSuggestion {
                    kind: SuggestionKind::ProviderEfficiency,
                    provider: Some(provider.clone()),
                    message: format!(
                        "Provider '{}' is expensive ({:.4}/token), consider a cheaper one",
                        provider, cost_per_token
                    ),
                    priority: SuggestionPriority::Medium,
                    potential_savings: *tokens as f64
                        * (cost_per_token - DEFAULT_COST_PER_TOKEN),
                });
            }
        }

        let recent_total: u64 = recent.iter().map(|r| r.usage.total_tokens).sum();
        let recent_cached: u64 = recent.iter().map(|r| r.usage.cached_tokens).sum();
        if recent_total > 0 {
            let hit_rate = recent_cached as f64 / recent_total as f64;
            if hit_rate < LOW_CACHE_HIT_RATE {
                suggestions.push(OptimizationSuggestion {
                    kind: SuggestionKind::CacheOptimization,
                    provider: None,
                    message: format!(
                        "Cache hit rate is low ({:.1}%), consider caching repeated prompts",
                        hit_rate * 100.0
                    ),
                    priority: SuggestionPriority::Low,
                    potential_savings: 0.0,
                });
            }
        }

        suggestions
    }

    /// Sweep reservations past their expiry, returning how many were released
    pub fn release_expired_reservations(&self) -> usize {
        let now = Utc::now();
        let released: Vec<TokenReservation> = {
            let mut state = self.state.lock();
            let expired: Vec<Uuid> = state
                .reservations
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| release_locked(&mut state, id))
                .collect()
        };

        for reservation in &released {
            debug!(
                reservation_id = %reservation.id,
                tokens = reservation.tokens,
                "swept expired reservation"
            );
            let _ = self.events.send(BudgetEvent::ReservationReleased {
                reservation_id: reservation.id,
                tokens: reservation.tokens,
            });
        }
        released.len()
    }

    /// Sweep expired cache entries, returning how many were removed
    pub fn purge_expired_cache(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock();
        let before = state.cache.len();
        state.cache.retain(|_, entry| entry.expires_at > now);
        before - state.cache.len()
    }

    /// Run the expiry sweeps on background intervals
    ///
    /// Each loop holds only a weak handle and exits once the manager is
    /// dropped. Requires a Tokio runtime.
    pub fn spawn_maintenance(self: Arc<Self>) {
        let weak = Arc::downgrade(&self);
        let interval = self.config.reservation_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                let released = manager.release_expired_reservations();
                if released > 0 {
                    info!(released, "expired reservations swept");
                }
            }
        });

        let weak = Arc::downgrade(&self);
        let interval = self.config.cache_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                let purged = manager.purge_expired_cache();
                if purged > 0 {
                    debug!(purged, "expired cache entries purged");
                }
            }
        });
    }
}

fn release_locked(state: &mut ManagerState, reservation_id: Uuid) -> Option<TokenReservation> {
    let reservation = state.reservations.remove(&reservation_id)?;
    if let Some(budget) = state
        .budgets
        .iter_mut()
        .find(|b| b.name == reservation.budget_name)
    {
        budget.reserved_tokens = budget.reserved_tokens.saturating_sub(reservation.tokens);
    }
    Some(reservation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetPeriod;
    use parking_lot::Mutex as PlMutex;

    fn manager() -> TokenBudgetManager {
        TokenBudgetManager::new(BudgetConfig::default())
    }

    struct VetoingTracker {
        limit: f64,
        recorded: PlMutex<Vec<(String, u64, f64)>>,
    }

    impl VetoingTracker {
        fn new(limit: f64) -> Self {
            Self {
                limit,
                recorded: PlMutex::new(Vec::new()),
            }
        }
    }

    impl CostTracker for VetoingTracker {
        fn calculate_cost(&self, _provider: &str, usage: &TokenUsage) -> f64 {
            usage.total_tokens as f64 * DEFAULT_COST_PER_TOKEN
        }

        fn record_usage(&self, provider: &str, usage: &TokenUsage, cost: f64) {
            self.recorded
                .lock()
                .push((provider.to_string(), usage.total_tokens, cost));
        }

        fn check_budget_limit(&self, estimated_cost: f64) -> bool {
            estimated_cost <= self.limit
        }
    }

    #[test]
    fn test_create_budget_replaces_same_name() {
        let mgr = manager();
        mgr.create_budget("main", 100, BudgetPeriod::Rolling);
        mgr.create_budget("main", 500, BudgetPeriod::Rolling);
        assert_eq!(mgr.budget_count(), 1);
        assert_eq!(mgr.budget("main").map(|b| b.total_tokens), Some(500));
    }

    #[test]
    fn test_happy_path_reserve_consume_release() {
        let mgr = manager();
        mgr.create_budget("main", 1000, BudgetPeriod::Rolling);

        let reservation = mgr
            .reserve(100, "request", None, 0, None)
            .expect("reservation should fit");
        let budget = mgr.budget("main").unwrap();
        assert_eq!(budget.reserved_tokens, 100);
        assert_eq!(budget.used_tokens, 0);

        mgr.consume("openai", TokenUsage::new(50, 30), 0.08);
        let budget = mgr.budget("main").unwrap();
        assert_eq!(budget.used_tokens, 80);

        assert!(mgr.release(reservation.id));
        let budget = mgr.budget("main").unwrap();
        assert_eq!(budget.reserved_tokens, 0);
        assert_eq!(budget.used_tokens, 80);
    }

    #[test]
    fn test_insufficient_budget_creates_no_reservation() {
        let mgr = manager();
        mgr.create_budget("main", 100, BudgetPeriod::Rolling);
        mgr.consume("openai", TokenUsage::new(60, 40), 0.1);

        let err = mgr.reserve(1, "request", None, 0, None).unwrap_err();
        assert!(matches!(
            err,
            BudgetError::InsufficientTokens {
                requested: 1,
                available: 0
            }
        ));
        assert!(mgr.budget_status().active_reservations.is_empty());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mgr = manager();
        mgr.create_budget("main", 1000, BudgetPeriod::Rolling);
        let reservation = mgr.reserve(10, "request", None, 0, None).unwrap();
        assert!(mgr.release(reservation.id));
        assert!(!mgr.release(reservation.id));
    }

    #[test]
    fn test_budget_safety_invariant_holds_through_sequence() {
        let mgr = manager();
        mgr.create_budget("main", 1000, BudgetPeriod::Rolling);

        let check = |mgr: &TokenBudgetManager| {
            let b = mgr.budget("main").unwrap();
            assert!(b.used_tokens + b.reserved_tokens <= b.total_tokens);
        };

        let first = mgr.reserve(400, "a", None, 0, None).unwrap();
        check(&mgr);
        let second = mgr.reserve(500, "b", None, 0, None).unwrap();
        check(&mgr);
        assert!(mgr.reserve(200, "c", None, 0, None).is_err());
        check(&mgr);
        mgr.consume("openai", TokenUsage::new(80, 20), 0.1);
        check(&mgr);
        assert!(mgr.release(first.id));
        check(&mgr);
        mgr.consume("openai", TokenUsage::new(300, 100), 0.4);
        check(&mgr);
        assert!(mgr.release(second.id));
        check(&mgr);
    }

    #[test]
    fn test_reservations_never_split_across_budgets() {
        let mgr = manager();
        mgr.create_budget("first", 60, BudgetPeriod::Rolling);
        mgr.create_budget("second", 60, BudgetPeriod::Rolling);

        // 120 available in total, but no single budget can hold 100
        let err = mgr.reserve(100, "request", None, 0, None).unwrap_err();
        assert!(matches!(
            err,
            BudgetError::InsufficientTokens {
                requested: 100,
                available: 60
            }
        ));
    }

    #[test]
    fn test_first_fit_takes_creation_order() {
        let mgr = manager();
        mgr.create_budget("small", 100, BudgetPeriod::Rolling);
        mgr.create_budget("large", 1000, BudgetPeriod::Rolling);

        let reservation = mgr.reserve(50, "request", None, 0, None).unwrap();
        assert_eq!(reservation.budget_name, "small");
        assert_eq!(mgr.budget("small").unwrap().reserved_tokens, 50);
        assert_eq!(mgr.budget("large").unwrap().reserved_tokens, 0);

        // too big for the first budget, lands on the second
        let reservation = mgr.reserve(200, "request", None, 0, None).unwrap();
        assert_eq!(reservation.budget_name, "large");
    }

    #[test]
    fn test_consumption_caps_at_headroom() {
        let mgr = manager();
        mgr.create_budget("main", 100, BudgetPeriod::Rolling);
        mgr.consume("openai", TokenUsage::new(500, 500), 1.0);
        let budget = mgr.budget("main").unwrap();
        assert_eq!(budget.used_tokens, 100);
        // the global counter still records the true consumption
        assert_eq!(mgr.budget_status().total_consumed, 1000);
    }

    #[test]
    fn test_alerts_fire_once_per_threshold() {
        let mgr = manager();
        mgr.create_budget("main", 100, BudgetPeriod::Rolling);
        let mut events = mgr.subscribe();

        mgr.consume("openai", TokenUsage::new(90, 5), 0.1);

        let mut fired = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let BudgetEvent::ThresholdAlert { alert } = event {
                fired.push(alert.threshold);
            }
        }
        assert_eq!(fired, vec![0.5, 0.8, 0.9]);

        // a second consumption below 100% fires nothing new
        let mut events = mgr.subscribe();
        mgr.consume("openai", TokenUsage::new(1, 0), 0.0);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, BudgetEvent::ThresholdAlert { .. }));
        }
    }

    #[test]
    fn test_exceeded_fires_with_final_threshold() {
        let mgr = manager();
        mgr.create_budget("main", 100, BudgetPeriod::Rolling);
        mgr.consume("openai", TokenUsage::new(90, 5), 0.1);

        let mut events = mgr.subscribe();
        mgr.consume("openai", TokenUsage::new(5, 0), 0.01);

        let mut thresholds = Vec::new();
        let mut exceeded = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                BudgetEvent::ThresholdAlert { alert } => thresholds.push(alert.threshold),
                BudgetEvent::BudgetExceeded { used_tokens, .. } => {
                    exceeded += 1;
                    assert_eq!(used_tokens, 100);
                }
                _ => {}
            }
        }
        assert_eq!(thresholds, vec![1.0]);
        assert_eq!(exceeded, 1);
    }

    #[test]
    fn test_cost_tracker_can_veto_reservation() {
        let tracker = Arc::new(VetoingTracker::new(0.05));
        let mgr = manager().with_cost_tracker(tracker.clone());
        mgr.create_budget("main", 1_000_000, BudgetPeriod::Rolling);

        // 100 tokens project to 0.1, above the 0.05 limit
        assert!(!mgr.check_availability(100, None));
        assert!(matches!(
            mgr.reserve(100, "request", None, 0, None),
            Err(BudgetError::CostLimitExceeded { .. })
        ));
        // 10 tokens project to 0.01, allowed
        assert!(mgr.check_availability(10, None));
        assert!(mgr.reserve(10, "request", None, 0, None).is_ok());
    }

    #[test]
    fn test_consume_forwards_to_cost_tracker() {
        let tracker = Arc::new(VetoingTracker::new(f64::MAX));
        let mgr = manager().with_cost_tracker(tracker.clone());
        mgr.create_budget("main", 1000, BudgetPeriod::Rolling);
        mgr.consume("openai", TokenUsage::new(10, 10), 0.02);

        let recorded = tracker.recorded.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], ("openai".to_string(), 20, 0.02));
    }

    #[test]
    fn test_expired_reservation_sweep_restores_capacity() {
        let mgr = manager();
        mgr.create_budget("main", 100, BudgetPeriod::Rolling);
        let reservation = mgr
            .reserve(80, "request", None, 0, Some(Duration::from_nanos(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(mgr.release_expired_reservations(), 1);
        assert_eq!(mgr.budget("main").unwrap().reserved_tokens, 0);
        assert!(mgr.reservation(reservation.id).is_none());
        // already swept, a second sweep finds nothing
        assert_eq!(mgr.release_expired_reservations(), 0);
    }

    #[test]
    fn test_token_cache_roundtrip_and_expiry() {
        let mgr = manager();
        let tokens = vec!["hello world".to_string(), "again".to_string()];
        mgr.cache_tokens("prompt-1", &tokens, None);
        assert_eq!(mgr.cached_tokens("prompt-1"), Some(tokens));
        assert_eq!(mgr.cached_tokens("missing"), None);

        mgr.cache_tokens("prompt-2", &["x".to_string()], Some(Duration::from_nanos(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mgr.cached_tokens("prompt-2"), None);
        assert_eq!(mgr.purge_expired_cache(), 0);

        mgr.cache_tokens("prompt-3", &["y".to_string()], Some(Duration::from_nanos(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mgr.purge_expired_cache(), 1);
    }

    #[test]
    fn test_efficiency_ranking_sorted_descending() {
        let mgr = manager();
        mgr.create_budget("main", 10_000, BudgetPeriod::Rolling);
        // 1000 tokens per unit cost
        mgr.consume("cheap", TokenUsage::new(500, 500), 1.0);
        // 200 tokens per unit cost
        mgr.consume("expensive", TokenUsage::new(100, 100), 1.0);
        // zero cost, excluded
        mgr.consume("free", TokenUsage::new(50, 0), 0.0);

        let ranking = mgr.provider_efficiency_ranking();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].provider, "cheap");
        assert_eq!(ranking[1].provider, "expensive");
        assert!(ranking[0].tokens_per_cost > ranking[1].tokens_per_cost);
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let mgr = TokenBudgetManager::new(BudgetConfig::default().with_history_capacity(2));
        mgr.create_budget("main", 1000, BudgetPeriod::Rolling);
        for _ in 0..5 {
            mgr.consume("openai", TokenUsage::new(1, 1), 0.01);
        }
        assert_eq!(mgr.usage_summary().history_len, 2);
    }

    #[test]
    fn test_usage_summary_aggregates_providers() {
        let mgr = manager();
        mgr.create_budget("main", 10_000, BudgetPeriod::Rolling);
        mgr.consume("openai", TokenUsage::new(100, 50).with_cached(30), 0.2);
        mgr.consume("openai", TokenUsage::new(50, 50), 0.1);
        mgr.consume("claude", TokenUsage::new(10, 10), 0.05);

        let summary = mgr.usage_summary();
        assert_eq!(summary.total_consumed, 270);
        assert_eq!(summary.total_cached, 30);
        assert_eq!(summary.providers["openai"].calls, 2);
        assert_eq!(summary.providers["openai"].usage.total_tokens, 250);
        assert!((summary.providers["claude"].cost - 0.05).abs() < 1e-9);
        assert!((summary.cache_hit_rate - 30.0 / 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_suggestions_flag_expensive_provider_and_cold_cache() {
        let mgr = manager();
        mgr.create_budget("main", 100_000, BudgetPeriod::Rolling);
        // 0.005 per token, above the 0.002 bar; nothing cached
        mgr.consume("pricey", TokenUsage::new(500, 500), 5.0);

        let suggestions = mgr.optimization_suggestions();
        let provider_switch = suggestions
            .iter()
            .find(|s| s.kind == SuggestionKind::ProviderEfficiency)
            .expect("expensive provider should be flagged");
        assert_eq!(provider_switch.provider.as_deref(), Some("pricey"));
        assert!((provider_switch.potential_savings - 1000.0 * 0.004).abs() < 1e-6);

        assert!(suggestions
            .iter()
            .any(|s| s.kind == SuggestionKind::CacheOptimization));
    }

    #[test]
    fn test_no_suggestions_without_history() {
        let mgr = manager();
        assert!(mgr.optimization_suggestions().is_empty());
        assert!(mgr.provider_efficiency_ranking().is_empty());
    }

    #[test]
    fn test_ensure_default_budget() {
        let mgr = manager();
        mgr.ensure_default_budget();
        mgr.ensure_default_budget();
        assert_eq!(mgr.budget_count(), 1);
        let budget = mgr.budget("default").unwrap();
        assert_eq!(budget.total_tokens, 1_000_000);
        assert_eq!(budget.period, BudgetPeriod::Monthly);
    }

    #[test]
    fn test_availability_with_no_budgets() {
        let mgr = manager();
        assert!(!mgr.check_availability(1, None));
        assert!(mgr.check_availability(0, None));
    }
}
