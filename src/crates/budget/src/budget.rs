//! Time-windowed token budgets

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The renewal cadence of a budget window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    /// Midnight to midnight, UTC
    Daily,
    /// Monday-aligned 7-day window
    Weekly,
    /// Calendar month
    Monthly,
    /// Calendar year
    Yearly,
    /// 30 days anchored at creation time
    Rolling,
}

impl BudgetPeriod {
    /// Parse a period name; unrecognized values fall back to [`BudgetPeriod::Rolling`]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "daily" => BudgetPeriod::Daily,
            "weekly" => BudgetPeriod::Weekly,
            "monthly" => BudgetPeriod::Monthly,
            "yearly" => BudgetPeriod::Yearly,
            _ => BudgetPeriod::Rolling,
        }
    }

    /// The window containing `now` for this period
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            BudgetPeriod::Daily => {
                let start = day_start(now.date_naive(), now);
                (start, start + Duration::days(1))
            }
            BudgetPeriod::Weekly => {
                let days_from_monday = now.weekday().num_days_from_monday() as i64;
                let monday = now.date_naive() - Duration::days(days_from_monday);
                let start = day_start(monday, now);
                (start, start + Duration::days(7))
            }
            BudgetPeriod::Monthly => {
                let start = month_start(now.year(), now.month(), now);
                let end = if now.month() == 12 {
                    month_start(now.year() + 1, 1, now)
                } else {
                    month_start(now.year(), now.month() + 1, now)
                };
                (start, end)
            }
            BudgetPeriod::Yearly => (
                month_start(now.year(), 1, now),
                month_start(now.year() + 1, 1, now),
            ),
            BudgetPeriod::Rolling => (now, now + Duration::days(30)),
        }
    }
}

impl std::fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Weekly => "weekly",
            BudgetPeriod::Monthly => "monthly",
            BudgetPeriod::Yearly => "yearly",
            BudgetPeriod::Rolling => "rolling",
        };
        write!(f, "{}", name)
    }
}

fn day_start(date: NaiveDate, fallback: DateTime<Utc>) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or(fallback)
}

fn month_start(year: i32, month: u32, fallback: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|date| day_start(date, fallback))
        .unwrap_or(fallback)
}

/// A named, time-windowed token allocation
///
/// `used_tokens + reserved_tokens <= total_tokens` holds after every manager
/// operation; attempts that would break it are rejected rather than clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Budget name, unique within a manager
    pub name: String,
    /// Window allocation
    pub total_tokens: u64,
    /// Tokens consumed in this window
    pub used_tokens: u64,
    /// Tokens held by open reservations
    pub reserved_tokens: u64,
    /// Renewal cadence
    pub period: BudgetPeriod,
    /// Window start
    pub starts_at: DateTime<Utc>,
    /// Window end
    pub ends_at: DateTime<Utc>,
    /// Whether threshold alerts fire for this budget
    pub alerts_enabled: bool,
    /// Usage fractions at which alerts fire, ascending
    pub alert_thresholds: Vec<f64>,
    #[serde(skip)]
    fired_thresholds: Vec<f64>,
    #[serde(skip)]
    exceeded_fired: bool,
}

/// Default alert thresholds: half, 80%, 90%, and full usage
pub const DEFAULT_ALERT_THRESHOLDS: [f64; 4] = [0.5, 0.8, 0.9, 1.0];

impl TokenBudget {
    /// Create a budget whose window is derived from `period`
    pub fn new(name: impl Into<String>, total_tokens: u64, period: BudgetPeriod) -> Self {
        let (starts_at, ends_at) = period.window(Utc::now());
        Self {
            name: name.into(),
            total_tokens,
            used_tokens: 0,
            reserved_tokens: 0,
            period,
            starts_at,
            ends_at,
            alerts_enabled: true,
            alert_thresholds: DEFAULT_ALERT_THRESHOLDS.to_vec(),
            fired_thresholds: Vec::new(),
            exceeded_fired: false,
        }
    }

    /// Override the alert thresholds
    pub fn with_alert_thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.alert_thresholds = thresholds;
        self
    }

    /// Disable threshold alerts
    pub fn without_alerts(mut self) -> Self {
        self.alerts_enabled = false;
        self
    }

    /// Tokens neither used nor reserved
    pub fn available_tokens(&self) -> u64 {
        self.total_tokens
            .saturating_sub(self.used_tokens)
            .saturating_sub(self.reserved_tokens)
    }

    /// Tokens that can still be consumed, ignoring reservations
    pub fn remaining_headroom(&self) -> u64 {
        self.total_tokens.saturating_sub(self.used_tokens)
    }

    /// Whether a reservation of `tokens` fits without breaking the safety invariant
    pub fn has_capacity_for(&self, tokens: u64) -> bool {
        self.used_tokens + self.reserved_tokens + tokens <= self.total_tokens
    }

    /// Fraction of the allocation consumed
    pub fn used_ratio(&self) -> f64 {
        if self.total_tokens == 0 {
            return 0.0;
        }
        self.used_tokens as f64 / self.total_tokens as f64
    }

    /// Thresholds newly crossed by the current usage, each reported once
    pub(crate) fn take_crossed_thresholds(&mut self) -> Vec<f64> {
        if !self.alerts_enabled || self.total_tokens == 0 {
            return Vec::new();
        }
        let ratio = self.used_ratio();
        let crossed: Vec<f64> = self
            .alert_thresholds
            .iter()
            .copied()
            .filter(|t| ratio >= *t && !self.fired_thresholds.contains(t))
            .collect();
        self.fired_thresholds.extend(&crossed);
        crossed
    }

    /// Whether the budget just became exceeded, reported once
    pub(crate) fn take_exceeded(&mut self) -> bool {
        if self.exceeded_fired || self.total_tokens == 0 {
            return false;
        }
        if self.used_ratio() >= 1.0 {
            self.exceeded_fired = true;
            return true;
        }
        false
    }
}
