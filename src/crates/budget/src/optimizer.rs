//! Request content optimization and provider suggestion
//!
//! Rewrites request content through the rule list for the active strategy,
//! credits the saved tokens back to the budget manager, and recommends
//! providers from the manager's efficiency ranking.

use crate::manager::TokenBudgetManager;
use crate::rules::{
    self, default_rules, OptimizationRule, OptimizationStrategy,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokenwise_core::{estimate_tokens, AiRequest, TaskType};
use tracing::{debug, info};

/// Provider suggested when no usage history exists yet
pub const DEFAULT_PROVIDER: &str = "openai";

/// Structural features of a piece of request content
#[derive(Debug, Clone, Serialize)]
pub struct TextPatterns {
    /// Whitespace runs per character
    pub whitespace_ratio: f64,
    pub duplicate_words: usize,
    /// Sentences longer than thirty words
    pub long_sentences: usize,
    pub redundant_phrases: usize,
    pub politeness_markers: usize,
    pub repeated_punctuation: usize,
}

/// Pattern analysis with human-readable advice
#[derive(Debug, Clone, Serialize)]
pub struct PatternReport {
    pub patterns: TextPatterns,
    pub suggestions: Vec<String>,
    /// Weighted score of how much the rewrite rules could save
    pub optimization_potential: u32,
}

/// Counters describing optimizer activity
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerStats {
    pub total_optimized: u64,
    pub total_saved_tokens: u64,
    pub strategy: OptimizationStrategy,
    pub available_rules: usize,
    /// How many optimizations each rule changed, by rule name
    pub rule_usage: HashMap<String, u64>,
}

struct OptimizerState {
    strategy: OptimizationStrategy,
    rules: Vec<OptimizationRule>,
    total_optimized: u64,
    total_saved_tokens: u64,
    rule_usage: HashMap<String, u64>,
}

/// Rewrites request content to spend fewer tokens
pub struct TokenOptimizer {
    manager: Arc<TokenBudgetManager>,
    state: Mutex<OptimizerState>,
}

impl TokenOptimizer {
    /// Create an optimizer with the built-in rule list and balanced strategy
    pub fn new(manager: Arc<TokenBudgetManager>) -> Self {
        Self {
            manager,
            state: Mutex::new(OptimizerState {
                strategy: OptimizationStrategy::default(),
                rules: default_rules(),
                total_optimized: 0,
                total_saved_tokens: 0,
                rule_usage: HashMap::new(),
            }),
        }
    }

    /// Rewrite a request's content under the active strategy
    ///
    /// Returns a copy of the request whose metadata records the original and
    /// optimized token estimates, the tokens saved (floored at zero), and the
    /// strategy used. Saved tokens are also credited to the budget manager.
    pub fn optimize(&self, request: &AiRequest) -> AiRequest {
        let original_tokens = estimate_tokens(&request.content);
        let (content, strategy, saved) = {
            let mut state = self.state.lock();
            let strategy = state.strategy;

            let mut content = request.content.clone();
            let mut fired = Vec::new();
            for rule in &state.rules {
                if !strategy.accepts(rule.risk()) {
                    continue;
                }
                let next = rule.apply(&content);
                if next != content {
                    fired.push(rule.name().to_string());
                }
                content = next;
            }
            match strategy {
                OptimizationStrategy::Aggressive => content = rules::aggressive_pass(&content),
                OptimizationStrategy::Conservative => {
                    content = rules::conservative_pass(&content)
                }
                OptimizationStrategy::Balanced => {}
            }

            let saved = original_tokens.saturating_sub(estimate_tokens(&content));
            state.total_optimized += 1;
            state.total_saved_tokens += saved;
            for name in fired {
                *state.rule_usage.entry(name).or_default() += 1;
            }
            (content, strategy, saved)
        };
        self.manager.record_saved_tokens(saved);

        let optimized_tokens = estimate_tokens(&content);
        let mut optimized = request.clone();
        optimized.content = content;
        optimized.metadata.insert("optimized".into(), json!(true));
        optimized
            .metadata
            .insert("original_token_count".into(), json!(original_tokens));
        optimized
            .metadata
            .insert("optimized_token_count".into(), json!(optimized_tokens));
        optimized.metadata.insert("saved_tokens".into(), json!(saved));
        optimized
            .metadata
            .insert("optimization_strategy".into(), json!(strategy.as_str()));

        debug!(request_id = %request.id, saved, strategy = %strategy, "optimized request");
        optimized
    }

    /// Optimize each request, then rebalance providers across the batch
    pub fn batch_optimize(&self, requests: Vec<AiRequest>) -> Vec<AiRequest> {
        let optimized: Vec<AiRequest> = requests.iter().map(|r| self.optimize(r)).collect();
        if optimized.len() > 1 {
            self.rebalance_providers(optimized)
        } else {
            optimized
        }
    }

    /// Pick a provider for this request from the efficiency ranking
    ///
    /// Scores blend historical tokens-per-cost with task-type and
    /// request-size weights. Without any history the default provider is
    /// returned.
    pub fn suggest_best_provider(&self, request: &AiRequest) -> String {
        let ranking = self.manager.provider_efficiency_ranking();
        if ranking.is_empty() {
            return DEFAULT_PROVIDER.to_string();
        }

        let estimated_tokens = estimate_tokens(&request.content);
        let mut best_provider: Option<&str> = None;
        let mut best_score = 0.0_f64;
        for entry in &ranking {
            let mut score = entry.tokens_per_cost;
            score *= match request.task_type {
                TaskType::TextGeneration => 1.2,
                TaskType::ContentAnalysis => 0.9,
                TaskType::SceneAnalysis => 1.0,
                _ => 1.0,
            };
            if estimated_tokens > 1000 {
                score *= 1.1;
            } else if estimated_tokens < 100 {
                score *= 0.95;
            }
            if score > best_score {
                best_score = score;
                best_provider = Some(&entry.provider);
            }
        }

        let provider = best_provider.unwrap_or(&ranking[0].provider).to_string();
        debug!(
            task_type = %request.task_type,
            provider = %provider,
            score = best_score,
            "suggested provider"
        );
        provider
    }

    /// Estimated tokens saved by `optimized` relative to `original`
    ///
    /// Negative when the rewrite made the content more expensive.
    pub fn calculate_token_savings(&self, original: &AiRequest, optimized: &AiRequest) -> i64 {
        estimate_tokens(&original.content) as i64 - estimate_tokens(&optimized.content) as i64
    }

    /// Measure structural rewrite opportunities in `text`
    pub fn analyze_text_patterns(&self, text: &str) -> PatternReport {
        let char_count = text.chars().count().max(1);
        let patterns = TextPatterns {
            whitespace_ratio: rules::WHITESPACE_RUN.find_iter(text).count() as f64
                / char_count as f64,
            duplicate_words: rules::count_duplicate_word_pairs(text),
            long_sentences: text
                .split('.')
                .filter(|s| s.split_whitespace().count() > 30)
                .count(),
            redundant_phrases: rules::REDUNDANT_EXPLANATIONS.find_iter(text).count(),
            politeness_markers: rules::POLITENESS_MARKERS.find_iter(text).count(),
            repeated_punctuation: rules::REPEATED_PERIODS.find_iter(text).count(),
        };

        let mut suggestions = Vec::new();
        if patterns.whitespace_ratio > 0.2 {
            suggestions.push("High whitespace ratio, compress whitespace runs".to_string());
        }
        if patterns.duplicate_words > 5 {
            suggestions.push("Repeated words found, collapse duplicates".to_string());
        }
        if patterns.long_sentences > 3 {
            suggestions.push("Many long sentences, split or simplify them".to_string());
        }
        if patterns.redundant_phrases > 2 {
            suggestions.push("Redundant phrasing found, trim restatements".to_string());
        }
        if patterns.repeated_punctuation > 2 {
            suggestions.push("Repeated punctuation found, clean it up".to_string());
        }

        let potential = patterns.whitespace_ratio * 50.0
            + patterns.duplicate_words as f64 * 10.0
            + patterns.long_sentences as f64 * 20.0
            + patterns.redundant_phrases as f64 * 15.0
            + patterns.repeated_punctuation as f64 * 5.0;

        PatternReport {
            patterns,
            suggestions,
            optimization_potential: potential as u32,
        }
    }

    pub fn strategy(&self) -> OptimizationStrategy {
        self.state.lock().strategy
    }

    pub fn set_strategy(&self, strategy: OptimizationStrategy) {
        self.state.lock().strategy = strategy;
        info!(strategy = %strategy, "optimization strategy set");
    }

    /// Append a rule to the end of the rule list
    pub fn add_rule(&self, rule: OptimizationRule) {
        info!(rule = rule.name(), "added optimization rule");
        self.state.lock().rules.push(rule);
    }

    /// Remove a rule by name, returning whether one was removed
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.rules.len();
        state.rules.retain(|r| r.name() != name);
        before != state.rules.len()
    }

    /// Current optimizer counters
    pub fn stats(&self) -> OptimizerStats {
        let state = self.state.lock();
        OptimizerStats {
            total_optimized: state.total_optimized,
            total_saved_tokens: state.total_saved_tokens,
            strategy: state.strategy,
            available_rules: state.rules.len(),
            rule_usage: state.rule_usage.clone(),
        }
    }

    /// Move requests from over-assigned providers to the most efficient one
    fn rebalance_providers(&self, requests: Vec<AiRequest>) -> Vec<AiRequest> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for request in &requests {
            if let Some(provider) = &request.provider {
                *counts.entry(provider.clone()).or_default() += 1;
            }
        }
        if counts.len() <= 1 {
            return requests;
        }
        let recommended: Vec<String> = self
            .manager
            .provider_efficiency_ranking()
            .into_iter()
            .map(|e| e.provider)
            .collect();
        if recommended.len() < 2 {
            return requests;
        }

        let preferred = &recommended[0];
        let threshold = requests.len() / counts.len();
        let mut rebalanced = requests;
        for request in &mut rebalanced {
            let Some(provider) = &request.provider else {
                continue;
            };
            if provider != preferred && counts.get(provider).copied().unwrap_or(0) > threshold {
                debug!(
                    request_id = %request.id,
                    from = %provider,
                    to = %preferred,
                    "rebalanced request provider"
                );
                request.provider = Some(preferred.clone());
            }
        }
        rebalanced
    }
}
