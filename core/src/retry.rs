//! Retry policy types.
//!
//! A [`RetryWhen`] holds up to two rules: one consulted when the transport
//! succeeded (`on_success`, e.g. "the token expired, refresh and retry") and one
//! consulted when it failed (`on_error`). The runtime's retry coordinator reads
//! these rules; nothing in this module holds state.
//!
//! # Example
//!
//! ```rust
//! use courier_core::retry::{RetryRule, RetryScope};
//! use courier_core::transport::Response;
//!
//! let rule: RetryRule<Response> = RetryRule::builder()
//!     .condition(|response: &Response| response.status == 401)
//!     .max_attempts(3)
//!     .scope(RetryScope::Module)
//!     .build();
//!
//! assert!(rule.should_retry(&Response::new(401, serde_json::Value::Null), 0));
//! assert!(!rule.should_retry(&Response::new(401, serde_json::Value::Null), 2));
//! ```

use crate::processor::catch_panic;
use crate::transport::{Response, TransportError};
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Default number of transport invocations a rule allows, first attempt included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Breadth of instances swept into a coordinated retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RetryScope {
    /// Only the instance whose rule fired
    #[default]
    Instance,
    /// Every in-flight instance created by the same module
    Module,
    /// Every in-flight instance of the engine
    Global,
}

impl fmt::Display for RetryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Instance => "instance",
            Self::Module => "module",
            Self::Global => "global",
        })
    }
}

/// Asynchronous gate run once before a queued retry is flushed.
///
/// `Ok(true)` reissues the queue; `Ok(false)` or `Err` discards it.
pub type BeforeRetry = Arc<dyn Fn() -> BoxFuture<'static, Result<bool, String>> + Send + Sync>;

/// Start `gate`. A panic, when called or while running, resolves to `Err`.
#[must_use]
pub fn open_gate(gate: &BeforeRetry) -> BoxFuture<'static, Result<bool, String>> {
    match catch_panic("before_retry", || gate()) {
        Some(pending) => AssertUnwindSafe(pending)
            .catch_unwind()
            .map(|result| result.unwrap_or_else(|_| Err("before_retry panicked".to_string())))
            .boxed(),
        None => future::ready(Err("before_retry panicked".to_string())).boxed(),
    }
}

/// Condition deciding whether an outcome asks for a retry.
pub type RetryCondition<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// One retry rule over outcomes of type `T`.
///
/// # Default Values
///
/// - `condition`: always retry
/// - `max_attempts`: 2 (first attempt plus one retry)
/// - `before_retry`: none (flush immediately)
/// - `scope`: [`RetryScope::Instance`]
pub struct RetryRule<T> {
    condition: Option<RetryCondition<T>>,
    max_attempts: u32,
    before_retry: Option<BeforeRetry>,
    scope: RetryScope,
}

impl<T> RetryRule<T> {
    /// Create a new rule builder.
    #[must_use]
    pub const fn builder() -> RetryRuleBuilder<T> {
        RetryRuleBuilder {
            condition: None,
            max_attempts: None,
            before_retry: None,
            scope: None,
        }
    }

    /// Total transport invocations allowed, first attempt included.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Scope of the coordinated retry this rule triggers.
    #[must_use]
    pub const fn scope(&self) -> RetryScope {
        self.scope
    }

    /// The gate, if any.
    #[must_use]
    pub const fn before_retry(&self) -> Option<&BeforeRetry> {
        self.before_retry.as_ref()
    }

    /// Whether `outcome` should be retried given the retries already spent.
    ///
    /// `retries` counts reissues so far; the rule allows another one while
    /// `retries + 1 < max_attempts` and the condition holds. A panicking
    /// condition declines.
    #[must_use]
    pub fn should_retry(&self, outcome: &T, retries: u32) -> bool {
        retries.saturating_add(1) < self.max_attempts
            && self.condition.as_ref().is_none_or(|condition| {
                catch_panic("retry condition", || condition(outcome)).unwrap_or(false)
            })
    }
}

impl<T> Default for RetryRule<T> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<T> Clone for RetryRule<T> {
    fn clone(&self) -> Self {
        Self {
            condition: self.condition.clone(),
            max_attempts: self.max_attempts,
            before_retry: self.before_retry.clone(),
            scope: self.scope,
        }
    }
}

impl<T> fmt::Debug for RetryRule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryRule")
            .field("conditional", &self.condition.is_some())
            .field("max_attempts", &self.max_attempts)
            .field("gated", &self.before_retry.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Builder for [`RetryRule`].
pub struct RetryRuleBuilder<T> {
    condition: Option<RetryCondition<T>>,
    max_attempts: Option<u32>,
    before_retry: Option<BeforeRetry>,
    scope: Option<RetryScope>,
}

impl<T> RetryRuleBuilder<T> {
    /// Retry only when `condition` holds.
    #[must_use]
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Set total transport invocations allowed, first attempt included.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Gate the flush behind an asynchronous hook.
    #[must_use]
    pub fn before_retry<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, String>> + Send + 'static,
    {
        self.before_retry = Some(Arc::new(move || Box::pin(hook())));
        self
    }

    /// Set the sweep scope.
    #[must_use]
    pub const fn scope(mut self, scope: RetryScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Build the [`RetryRule`].
    #[must_use]
    pub fn build(self) -> RetryRule<T> {
        RetryRule {
            condition: self.condition,
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            before_retry: self.before_retry,
            scope: self.scope.unwrap_or_default(),
        }
    }
}

/// Retry policy of a layer.
#[derive(Debug, Clone, Default)]
pub struct RetryWhen {
    /// Rule consulted when the transport answered
    pub on_success: Option<RetryRule<Response>>,
    /// Rule consulted when the transport failed
    pub on_error: Option<RetryRule<TransportError>>,
}
