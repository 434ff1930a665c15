//! Orchestration facade
//!
//! [`AiService`] drives a request through validation, prompt optimization,
//! token reservation, monetary gating, and dispatch, then settles the
//! reservation exactly once on every path. It also runs the background
//! loops for statistics snapshots, provider health probing, and result
//! eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use budget::{
    BudgetPeriod, BudgetStatusReport, OptimizationStrategy, OptimizationSuggestion,
    OptimizerStats, TokenBudgetManager, TokenOptimizer,
};
use tokenwise_core::{
    estimate_request_tokens, AiRequest, AiResponse, CostTracker, ProviderHealth,
    ProviderResolver, RequestStatus, TaskType,
};

use crate::config::ServiceConfig;
use crate::events::{PoolEvent, ServiceEvent};
use crate::pool::{PoolStatus, TaskHandle, WorkerPool};
use crate::retry::RetryPolicy;
use crate::stats::{CompletedRecord, UsageStats};
use crate::worker::TaskOutcome;
use crate::{Result, ServiceError};

const EVENT_CAPACITY: usize = 256;

/// Cloneable handle to the orchestration facade
#[derive(Clone)]
pub struct AiService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ServiceConfig,
    resolver: Arc<dyn ProviderResolver>,
    cost_tracker: Option<Arc<dyn CostTracker>>,
    budget: Arc<TokenBudgetManager>,
    optimizer: TokenOptimizer,
    pool: WorkerPool,
    active_requests: DashMap<Uuid, AiRequest>,
    results: DashMap<Uuid, AiResponse>,
    state: Mutex<ServiceState>,
    retry: RetryPolicy,
    events: broadcast::Sender<ServiceEvent>,
    shutdown: CancellationToken,
}

struct ServiceState {
    stats: UsageStats,
    history: VecDeque<CompletedRecord>,
    health: HashMap<String, ProviderHealth>,
    budget_limit: f64,
    cost_alert_fired: bool,
    cost_exceeded_fired: bool,
}

impl AiService {
    /// Build the facade with a freshly configured budget manager
    ///
    /// Requires a running Tokio runtime; background loops are spawned
    /// immediately.
    pub fn new(
        config: ServiceConfig,
        resolver: Arc<dyn ProviderResolver>,
        cost_tracker: Option<Arc<dyn CostTracker>>,
    ) -> Self {
        let budget = {
            let mut manager = TokenBudgetManager::new(budget::BudgetConfig::default());
            if let Some(tracker) = &cost_tracker {
                manager = manager.with_cost_tracker(tracker.clone());
            }
            Arc::new(manager)
        };
        Self::with_budget_manager(config, resolver, cost_tracker, budget)
    }

    /// Build the facade around an externally configured budget manager
    pub fn with_budget_manager(
        config: ServiceConfig,
        resolver: Arc<dyn ProviderResolver>,
        cost_tracker: Option<Arc<dyn CostTracker>>,
        budget: Arc<TokenBudgetManager>,
    ) -> Self {
        if budget.budget_count() == 0 {
            budget.create_budget(
                "default",
                config.default_budget_tokens,
                BudgetPeriod::parse(&config.default_budget_period),
            );
        }
        Arc::clone(&budget).spawn_maintenance();

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let optimizer = TokenOptimizer::new(budget.clone());
        let pool = WorkerPool::new(config.max_workers);
        let retry = RetryPolicy::new(config.retry_base_delay());
        let budget_limit = config.budget_limit;

        let inner = Arc::new(ServiceInner {
            config,
            resolver,
            cost_tracker,
            budget,
            optimizer,
            pool,
            active_requests: DashMap::new(),
            results: DashMap::new(),
            state: Mutex::new(ServiceState {
                stats: UsageStats::default(),
                history: VecDeque::new(),
                health: HashMap::new(),
                budget_limit,
                cost_alert_fired: false,
                cost_exceeded_fired: false,
            }),
            retry,
            events,
            shutdown: CancellationToken::new(),
        });

        let service = Self { inner };
        service.spawn_background();
        info!(
            max_workers = service.inner.config.max_workers,
            "AI service started"
        );
        service
    }

    /// Subscribe to service events
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    /// Execute a request end to end and return its response
    ///
    /// The token reservation taken for the request is settled exactly once
    /// on every path out of this method, including cancellation.
    pub async fn process(&self, mut request: AiRequest) -> AiResponse {
        let request_id = request.id;
        if request.timeout.is_zero() {
            request.timeout = self.inner.config.default_timeout();
        }
        if let Err(err) = self.validate(&request) {
            return self.failure(request_id, err);
        }

        let optimized = self.inner.optimizer.optimize(&request);
        let estimated_tokens = estimate_request_tokens(&optimized);

        if !self
            .inner
            .budget
            .check_availability(estimated_tokens, optimized.provider.as_deref())
        {
            return self.failure(
                request_id,
                ServiceError::BudgetUnavailable(format!(
                    "estimated {estimated_tokens} tokens exceed the available budget"
                )),
            );
        }

        let reservation = match self.inner.budget.reserve(
            estimated_tokens,
            format!("AI request: {}", optimized.task_type),
            optimized.provider.clone(),
            optimized.priority as i32,
            None,
        ) {
            Ok(reservation) => reservation,
            Err(err) => return self.failure(request_id, ServiceError::from(err)),
        };

        let estimated_cost = self.cost_estimate(&optimized);
        if !self.cost_budget_allows(estimated_cost) {
            self.inner.budget.release(reservation.id);
            return self.failure(request_id, ServiceError::CostBudgetExceeded { estimated_cost });
        }

        let mut active = optimized.clone();
        active.status = RequestStatus::Processing;
        match self.inner.active_requests.entry(request_id) {
            Entry::Occupied(_) => {
                self.inner.budget.release(reservation.id);
                return self.failure(request_id, ServiceError::DuplicateRequest(request_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(active);
            }
        }

        let handle = match self.inner.pool.submit(
            optimized.clone(),
            self.inner.resolver.clone(),
            self.inner.cost_tracker.clone(),
        ) {
            Ok(handle) => handle,
            Err(err) => {
                self.inner.active_requests.remove(&request_id);
                self.inner.budget.release(reservation.id);
                return self.failure(request_id, err);
            }
        };

        let outcome = handle.outcome().await;
        self.inner.active_requests.remove(&request_id);
        match outcome {
            TaskOutcome::Cancelled => {
                self.inner.budget.release(reservation.id);
                AiResponse::failed(request_id, "Request cancelled")
            }
            TaskOutcome::Completed(mut response) => {
                if response.success {
                    if let Some(usage) = response.usage {
                        self.inner
                            .budget
                            .consume(&response.provider, usage, response.cost);
                    }
                    response.metadata.insert(
                        "token_optimization".to_string(),
                        serde_json::to_value(&optimized.metadata).unwrap_or(Value::Null),
                    );
                    if let Some(usage) = &response.usage {
                        response.metadata.insert(
                            "token_usage".to_string(),
                            serde_json::to_value(usage).unwrap_or(Value::Null),
                        );
                    }
                }
                self.inner.budget.release(reservation.id);
                self.inner.state.lock().stats.record(&response);
                let _ = self.inner.events.send(ServiceEvent::RequestCompleted {
                    request_id,
                    response: response.clone(),
                });
                response
            }
        }
    }

    /// Queue a request for asynchronous execution and return its id
    ///
    /// Rejections and terminal failures are reported through the event
    /// channel rather than a return value.
    pub fn submit(&self, mut request: AiRequest) -> Uuid {
        let request_id = request.id;
        if request.timeout.is_zero() {
            request.timeout = self.inner.config.default_timeout();
        }
        if let Err(err) = self.validate(&request) {
            warn!(%request_id, error = %err, "submission rejected");
            let _ = self.inner.events.send(ServiceEvent::RequestFailed {
                request_id,
                error: err.to_string(),
            });
            return request_id;
        }
        let estimated_cost = self.cost_estimate(&request);
        if !self.cost_budget_allows(estimated_cost) {
            let err = ServiceError::CostBudgetExceeded { estimated_cost };
            warn!(%request_id, error = %err, "submission rejected");
            let _ = self.inner.events.send(ServiceEvent::RequestFailed {
                request_id,
                error: err.to_string(),
            });
            return request_id;
        }

        match self.inner.active_requests.entry(request_id) {
            Entry::Occupied(_) => {
                let err = ServiceError::DuplicateRequest(request_id);
                warn!(%request_id, error = %err, "submission rejected");
                let _ = self.inner.events.send(ServiceEvent::RequestFailed {
                    request_id,
                    error: err.to_string(),
                });
                return request_id;
            }
            Entry::Vacant(slot) => {
                slot.insert(request.clone());
            }
        }
        match self.inner.pool.submit(
            request.clone(),
            self.inner.resolver.clone(),
            self.inner.cost_tracker.clone(),
        ) {
            Ok(handle) => {
                debug!(%request_id, "request submitted");
                self.spawn_completion_handler(request, handle);
            }
            Err(err) => {
                self.inner.active_requests.remove(&request_id);
                warn!(%request_id, error = %err, "pool refused request");
                let _ = self.inner.events.send(ServiceEvent::RequestFailed {
                    request_id,
                    error: err.to_string(),
                });
            }
        }
        request_id
    }

    /// Flag an active request for cooperative cancellation
    ///
    /// Returns false when the id is not currently active. Exactly one
    /// cancellation event is emitted for a successful cancel.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        self.inner.active_requests.remove(&request_id);
        let cancelled = self.inner.pool.cancel(request_id);
        if cancelled {
            info!(%request_id, "request cancelled");
            let _ = self
                .inner
                .events
                .send(ServiceEvent::RequestCancelled { request_id });
        }
        cancelled
    }

    /// Lifecycle status of a request, or None when unknown or evicted
    pub fn status(&self, request_id: Uuid) -> Option<RequestStatus> {
        if self.inner.active_requests.contains_key(&request_id) {
            return Some(RequestStatus::Processing);
        }
        self.inner.results.get(&request_id).map(|entry| {
            if entry.success {
                RequestStatus::Completed
            } else {
                RequestStatus::Failed
            }
        })
    }

    /// Retained response of a finished request
    pub fn result(&self, request_id: Uuid) -> Option<AiResponse> {
        self.inner.results.get(&request_id).map(|entry| entry.clone())
    }

    /// Ids of requests currently registered as active
    pub fn active_requests(&self) -> Vec<Uuid> {
        self.inner.active_requests.iter().map(|entry| *entry.key()).collect()
    }

    /// Aggregate usage statistics
    pub fn usage_stats(&self) -> UsageStats {
        self.inner.state.lock().stats.clone()
    }

    /// Completed-request history, oldest first
    pub fn recent_history(&self) -> Vec<CompletedRecord> {
        self.inner.state.lock().history.iter().cloned().collect()
    }

    /// Last observed health per provider
    pub fn health(&self) -> HashMap<String, ProviderHealth> {
        self.inner.state.lock().health.clone()
    }

    /// Providers the resolver currently lists
    pub fn available_providers(&self) -> Vec<String> {
        self.inner.resolver.available_providers()
    }

    /// Occupancy of the worker pool
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// Aggregate token budget view
    pub fn budget_status(&self) -> BudgetStatusReport {
        self.inner.budget.budget_status()
    }

    /// The budget manager backing this service
    pub fn budget_manager(&self) -> &Arc<TokenBudgetManager> {
        &self.inner.budget
    }

    /// Usage-derived optimization suggestions
    pub fn optimization_suggestions(&self) -> Vec<OptimizationSuggestion> {
        self.inner.budget.optimization_suggestions()
    }

    /// Counters from the prompt optimizer
    pub fn optimizer_stats(&self) -> OptimizerStats {
        self.inner.optimizer.stats()
    }

    /// Switch the prompt optimization strategy
    pub fn set_optimization_strategy(&self, strategy: OptimizationStrategy) {
        self.inner.optimizer.set_strategy(strategy);
    }

    /// Update the monetary budget limit and re-arm cost alerts
    pub fn set_budget_limit(&self, limit: f64) {
        let mut state = self.inner.state.lock();
        state.budget_limit = limit;
        state.cost_alert_fired = false;
        state.cost_exceeded_fired = false;
        info!(limit, "cost budget limit updated");
    }

    /// Rough monetary estimate used by the submission gate
    pub fn cost_estimate(&self, request: &AiRequest) -> f64 {
        let estimated_tokens = (request.content.chars().count() / 4) as f64;
        0.01 + estimated_tokens * 0.001
    }

    /// Submit a plain text-generation request
    pub fn generate_text(&self, prompt: impl Into<String>) -> Uuid {
        self.submit(AiRequest::text_generation(prompt))
    }

    /// Submit a content-analysis request
    pub fn analyze_content(
        &self,
        content: impl Into<String>,
        analysis_type: impl Into<String>,
    ) -> Uuid {
        self.submit(
            AiRequest::content_analysis(content)
                .with_parameter("analysis_type", serde_json::json!(analysis_type.into())),
        )
    }

    /// Submit a commentary request over video metadata
    pub fn generate_commentary(&self, video_info: Value, style: impl Into<String>) -> Uuid {
        self.submit(AiRequest::commentary(video_info, style))
    }

    /// Cancel all running work and stop the background loops
    pub fn shutdown(&self) {
        info!("shutting down AI service");
        self.inner.shutdown.cancel();
        self.inner.pool.cancel_all();
        self.inner.active_requests.clear();
        self.inner.results.clear();
        let mut state = self.inner.state.lock();
        state.history.clear();
        state.health.clear();
    }

    fn validate(&self, request: &AiRequest) -> Result<()> {
        if request.content.is_empty() && request.task_type != TaskType::TextGeneration {
            return Err(ServiceError::Validation(format!(
                "content is required for {} requests",
                request.task_type
            )));
        }
        if self.inner.resolver.available_providers().is_empty() {
            return Err(ServiceError::Validation(
                "no providers are configured".to_string(),
            ));
        }
        Ok(())
    }

    fn cost_budget_allows(&self, estimated_cost: f64) -> bool {
        match &self.inner.cost_tracker {
            Some(tracker) => tracker.check_budget_limit(estimated_cost),
            None => true,
        }
    }

    fn failure(&self, request_id: Uuid, err: ServiceError) -> AiResponse {
        warn!(%request_id, error = %err, "request refused");
        AiResponse::failed(request_id, err.to_string())
    }

    fn spawn_completion_handler(&self, request: AiRequest, handle: TaskHandle) {
        let service = self.clone();
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            service.settle_submitted(request, outcome);
        });
    }

    fn settle_submitted(&self, request: AiRequest, outcome: TaskOutcome) {
        let request_id = request.id;
        match outcome {
            // cancel() already removed the active entry and emitted the event
            TaskOutcome::Cancelled => {}
            TaskOutcome::Completed(response) if response.success => {
                self.inner.active_requests.remove(&request_id);
                self.inner.results.insert(request_id, response.clone());
                {
                    let mut state = self.inner.state.lock();
                    state.stats.record(&response);
                    state.history.push_back(CompletedRecord {
                        request_id,
                        task_type: request.task_type,
                        provider: response.provider.clone(),
                        success: true,
                        processing_time: response.processing_time,
                        completed_at: Utc::now(),
                    });
                    let capacity = self.inner.config.history_capacity;
                    while state.history.len() > capacity {
                        state.history.pop_front();
                    }
                }
                if let Some(callback) = &request.callback {
                    callback(&response);
                }
                let _ = self.inner.events.send(ServiceEvent::RequestCompleted {
                    request_id,
                    response,
                });
            }
            TaskOutcome::Completed(response) => {
                self.inner.active_requests.remove(&request_id);
                self.inner.results.insert(request_id, response.clone());
                self.inner.state.lock().stats.record(&response);

                if request.can_retry() {
                    let mut retry = request;
                    retry.retry_count += 1;
                    retry.status = RequestStatus::Pending;
                    let delay = self.inner.retry.delay_for(retry.retry_count);
                    info!(
                        %request_id,
                        retry_count = retry.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "scheduling retry"
                    );
                    let service = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        service.submit(retry);
                    });
                } else {
                    let error = if response.error_message.is_empty() {
                        "request failed".to_string()
                    } else {
                        response.error_message.clone()
                    };
                    warn!(%request_id, error = %error, "request failed terminally");
                    let _ = self
                        .inner
                        .events
                        .send(ServiceEvent::RequestFailed { request_id, error });
                }
            }
        }
    }

    fn spawn_background(&self) {
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(stats_loop(
            weak.clone(),
            shutdown.clone(),
            self.inner.config.stats_interval(),
        ));
        tokio::spawn(health_loop(
            weak.clone(),
            shutdown.clone(),
            self.inner.config.health_interval(),
        ));
        tokio::spawn(eviction_loop(
            weak.clone(),
            shutdown.clone(),
            self.inner.config.eviction_interval(),
        ));
        tokio::spawn(forward_pool_events(
            weak,
            shutdown,
            self.inner.pool.subscribe(),
        ));
    }
}

/// Emit periodic statistics snapshots and one-shot cost alerts
async fn stats_loop(inner: Weak<ServiceInner>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else { break };

        let (stats, alert, exceeded) = {
            let mut state = inner.state.lock();
            let stats = state.stats.clone();
            let limit = state.budget_limit;
            let mut alert = None;
            let mut exceeded = None;
            if stats.total_cost > limit && !state.cost_exceeded_fired {
                state.cost_exceeded_fired = true;
                exceeded = Some((stats.total_cost, limit));
            } else if stats.total_cost > limit * inner.config.cost_alert_threshold
                && !state.cost_alert_fired
            {
                state.cost_alert_fired = true;
                alert = Some((stats.total_cost, limit));
            }
            (stats, alert, exceeded)
        };

        let _ = inner.events.send(ServiceEvent::StatsSnapshot { stats });
        if let Some((current_cost, budget_limit)) = alert {
            warn!(current_cost, budget_limit, "cost crossed the alert threshold");
            let _ = inner.events.send(ServiceEvent::CostAlert {
                current_cost,
                budget_limit,
            });
        }
        if let Some((current_cost, budget_limit)) = exceeded {
            error!(current_cost, budget_limit, "cost budget exceeded");
            let _ = inner.events.send(ServiceEvent::CostBudgetExceeded {
                current_cost,
                budget_limit,
            });
        }
    }
}

/// Probe each listed provider and emit transitions
async fn health_loop(inner: Weak<ServiceInner>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else { break };

        let providers = inner.resolver.available_providers();
        let mut transitions = Vec::new();
        for provider in providers {
            let available = inner.resolver.is_available(&provider).await;
            let changed = {
                let mut state = inner.state.lock();
                let entry = state
                    .health
                    .entry(provider.clone())
                    .or_insert_with(|| ProviderHealth::unknown(provider.clone()));
                let was = entry.available;
                if available {
                    entry.mark_available();
                } else {
                    entry.mark_unavailable(Some("health probe failed".to_string()));
                }
                was != available
            };
            if changed {
                transitions.push((provider, available));
            }
        }
        for (provider, available) in transitions {
            info!(provider = %provider, available, "provider health changed");
            let _ = inner
                .events
                .send(ServiceEvent::HealthChanged { provider, available });
        }
    }
}

/// Drop retained results older than the configured ttl
async fn eviction_loop(inner: Weak<ServiceInner>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else { break };

        let ttl = chrono::Duration::from_std(inner.config.result_ttl())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = Utc::now() - ttl;
        let before = inner.results.len();
        inner.results.retain(|_, response| response.created_at > cutoff);
        let evicted = before.saturating_sub(inner.results.len());
        if evicted > 0 {
            debug!(evicted, "evicted expired results");
        }
    }
}

/// Relay worker progress onto the service event channel
async fn forward_pool_events(
    inner: Weak<ServiceInner>,
    shutdown: CancellationToken,
    mut receiver: broadcast::Receiver<PoolEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = receiver.recv() => event,
        };
        match event {
            Ok(PoolEvent::WorkerStarted { request_id }) => {
                let Some(inner) = inner.upgrade() else { break };
                if let Some(mut entry) = inner.active_requests.get_mut(&request_id) {
                    entry.status = RequestStatus::Processing;
                }
                let _ = inner.events.send(ServiceEvent::RequestStarted { request_id });
            }
            Ok(PoolEvent::WorkerProgress { request_id, progress }) => {
                let Some(inner) = inner.upgrade() else { break };
                let _ = inner
                    .events
                    .send(ServiceEvent::RequestProgress { request_id, progress });
            }
            Ok(PoolEvent::StatusChanged { active, max_workers, .. }) => {
                debug!(active, max_workers, "pool occupancy changed");
            }
            // the facade emits its own cancellation event from cancel()
            Ok(PoolEvent::WorkerCancelled { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "pool event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
