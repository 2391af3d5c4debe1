//! Retry classification
//!
//! A failure is matched against an ordered list of named rules. Each rule
//! selects errors by structured kind and/or message keywords; the first match
//! decides the category, the retry strategy and whether the failure should be
//! escalated as a system alert. The list always ends with a catch-all rule
//! that treats unknown failures as transient with a small attempt cap.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ErrorKind, ProcessingError};
use crate::types::{ErrorCategory, TaskRecord};

/// How a retryable failure is scheduled again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Do not retry
    None,
    /// Re-admit without delay
    Immediate,
    /// `base * multiplier`
    FixedDelay,
    /// `base * multiplier * 2^(attempt - 1)`, capped
    ExponentialBackoff,
}

/// Named classification rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRule {
    pub name: String,
    /// Error kinds this rule applies to; empty means any kind
    #[serde(default)]
    pub kinds: Vec<ErrorKind>,
    /// Case-insensitive message fragments; empty means any message
    #[serde(default)]
    pub keywords: Vec<String>,
    pub category: ErrorCategory,
    pub strategy: RetryStrategy,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Attempt cap applied on top of the task's own `max_attempts`
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Emit a system alert when this rule matches
    #[serde(default)]
    pub escalate: bool,
}

fn default_multiplier() -> f64 {
    1.0
}

impl RetryRule {
    pub fn new(name: impl Into<String>, category: ErrorCategory, strategy: RetryStrategy) -> Self {
        Self {
            name: name.into(),
            kinds: Vec::new(),
            keywords: Vec::new(),
            category,
            strategy,
            backoff_multiplier: default_multiplier(),
            max_attempts: None,
            escalate: false,
        }
    }

    pub fn kinds(mut self, kinds: &[ErrorKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_lowercase()).collect();
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn escalate(mut self) -> Self {
        self.escalate = true;
        self
    }

    /// A rule with neither kinds nor keywords matches everything
    pub fn is_catch_all(&self) -> bool {
        self.kinds.is_empty() && self.keywords.is_empty()
    }

    pub fn matches(&self, error: &ProcessingError) -> bool {
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&error.kind);
        let keyword_ok = self.keywords.is_empty() || {
            let message = error.message.to_lowercase();
            self.keywords
                .iter()
                .any(|k| message.contains(&k.to_lowercase()))
        };
        kind_ok && keyword_ok
    }
}

/// Built-in rule list
pub fn default_rules() -> Vec<RetryRule> {
    use ErrorCategory as C;
    use ErrorKind as K;
    use RetryStrategy as S;

    vec![
        RetryRule::new("cancelled", C::Permanent, S::None).kinds(&[K::Cancelled]),
        RetryRule::new("timeout", C::Timeout, S::ExponentialBackoff).kinds(&[K::Timeout]),
        RetryRule::new("rate_limited", C::Transient, S::ExponentialBackoff)
            .kinds(&[K::RateLimited])
            .multiplier(4.0),
        RetryRule::new("network", C::Transient, S::ExponentialBackoff).kinds(&[K::Network]),
        RetryRule::new("resource_exhaustion", C::ResourceExhaustion, S::ExponentialBackoff)
            .kinds(&[K::ResourceExhausted])
            .multiplier(2.0)
            .escalate(),
        RetryRule::new("invalid_input", C::Validation, S::None).kinds(&[K::InvalidConfig]),
        RetryRule::new("unsupported_content", C::Permanent, S::None).kinds(&[
            K::Unsupported,
            K::InvalidFormat,
            K::Corrupt,
            K::NotFound,
            K::NoStrategy,
        ]),
        // Unstructured failures fall through to message matching
        RetryRule::new("message_resource", C::ResourceExhaustion, S::ExponentialBackoff)
            .kinds(&[K::Unknown, K::Internal])
            .keywords(&["out of memory", "no space left", "disk full", "quota"])
            .multiplier(2.0)
            .escalate(),
        RetryRule::new("message_permanent", C::Permanent, S::None)
            .kinds(&[K::Unknown, K::Internal])
            .keywords(&["unsupported", "invalid file format", "corrupt", "malformed"]),
        RetryRule::new("message_rate_limited", C::Transient, S::ExponentialBackoff)
            .kinds(&[K::Unknown, K::Internal])
            .keywords(&["rate limit", "too many requests"])
            .multiplier(4.0),
        RetryRule::new("message_transient", C::Transient, S::ExponentialBackoff)
            .kinds(&[K::Unknown, K::Internal])
            .keywords(&["timeout", "timed out", "connection", "temporarily unavailable"]),
        default_rule(),
    ]
}

fn default_rule() -> RetryRule {
    RetryRule::new("default", ErrorCategory::Transient, RetryStrategy::ExponentialBackoff)
        .max_attempts(2)
}

/// Outcome of classifying one failure
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub strategy: RetryStrategy,
    /// Wait before re-admission; zero when not retryable
    pub delay: Duration,
    pub should_escalate: bool,
    /// Name of the matching rule
    pub rule: String,
}

/// Maps failures to retry decisions
#[derive(Debug, Clone)]
pub struct RetryClassifier {
    rules: Vec<RetryRule>,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryClassifier {
    /// Create a classifier; a catch-all rule is appended when the list has none
    pub fn new(mut rules: Vec<RetryRule>, base_delay: Duration, max_delay: Duration) -> Self {
        if !rules.iter().any(RetryRule::is_catch_all) {
            rules.push(default_rule());
        }
        Self {
            rules,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let rules = config.rules.clone().unwrap_or_else(default_rules);
        Self::new(rules, config.base_delay(), config.max_delay())
    }

    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }

    /// Classify a failure of `task`'s current attempt
    pub fn classify(&self, error: &ProcessingError, task: &TaskRecord) -> RetryDecision {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.matches(error))
            .unwrap_or_else(|| {
                // new() guarantees a catch-all
                &self.rules[self.rules.len() - 1]
            });

        let limit = match rule.max_attempts {
            Some(cap) => cap.min(task.max_attempts),
            None => task.max_attempts,
        };
        let exhausted = task.attempt_count >= limit;
        let retryable = rule.strategy != RetryStrategy::None && !exhausted;

        let (strategy, delay) = if retryable {
            (rule.strategy, self.delay_for(rule, task.attempt_count))
        } else {
            (RetryStrategy::None, Duration::ZERO)
        };

        RetryDecision {
            category: rule.category,
            retryable,
            strategy,
            delay,
            should_escalate: rule.escalate,
            rule: rule.name.clone(),
        }
    }

    fn delay_for(&self, rule: &RetryRule, attempt_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64 * rule.backoff_multiplier.max(0.0);
        let delay_ms = match rule.strategy {
            RetryStrategy::None | RetryStrategy::Immediate => 0.0,
            RetryStrategy::FixedDelay => base_ms,
            RetryStrategy::ExponentialBackoff => {
                let exponent = attempt_count.saturating_sub(1).min(63) as i32;
                base_ms * 2f64.powi(exponent)
            }
        };
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
