//! `race` and `all` over orchestrated chains.
//!
//! Both return a new [`Chain`] wired into every member:
//!
//! - business and transport errors of any member are forwarded as they occur
//! - `loading(false)` and `finally(Outcome::Combined)` fire once, after every
//!   member has finished (success, error or cancellation)
//! - aborting the combined chain aborts every member still alive
//!
//! Completion is counted through each member's settle hook, so finally
//! processors attached to a member cannot hold the combined chain open, and an
//! attempt cancelled for a retry does not count as finished. Members must
//! still be live when combined; a member that already settled never counts.

use courier_core::processor::{Chain, WeakChain};
use courier_core::scheduler::Scheduler;
use courier_core::transport::Outcome;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// First success wins.
///
/// Later successes are ignored; losing members are not cancelled.
#[must_use]
pub fn race(scheduler: &dyn Scheduler, chains: impl IntoIterator<Item = Chain>) -> Chain {
    let members: Vec<Chain> = chains.into_iter().collect();
    let combined = Chain::new();
    wire_abort(&combined, &members);

    if members.is_empty() {
        settle_empty(scheduler, &combined, None);
        return combined;
    }

    let won = Arc::new(Mutex::new(false));
    let completion = Completion::new(&combined, members.len());

    for member in members {
        let (won, target) = (Arc::clone(&won), combined.clone());
        let member = member.success(move |value| {
            let first = !std::mem::replace(&mut *won.lock().unwrap_or_else(PoisonError::into_inner), true);
            if first {
                target.emit_success(value);
            }
        });
        completion.track(forward_errors(member, &combined));
    }

    combined
}

/// Succeed once every member succeeds, with results in member order.
///
/// The success value is a JSON array whose element `i` is member `i`'s
/// result, regardless of completion order. A member that fails means the
/// combined chain never reports success.
#[must_use]
pub fn all(scheduler: &dyn Scheduler, chains: impl IntoIterator<Item = Chain>) -> Chain {
    let members: Vec<Chain> = chains.into_iter().collect();
    let combined = Chain::new();
    wire_abort(&combined, &members);

    if members.is_empty() {
        settle_empty(scheduler, &combined, Some(Value::Array(Vec::new())));
        return combined;
    }

    let results = Arc::new(Mutex::new(vec![None; members.len()]));
    let completion = Completion::new(&combined, members.len());

    for (index, member) in members.into_iter().enumerate() {
        let (results, target) = (Arc::clone(&results), combined.clone());
        let member = member.success(move |value| {
            let joined = {
                let mut results = results.lock().unwrap_or_else(PoisonError::into_inner);
                let first = results[index].is_none();
                results[index] = Some(value.clone());
                (first && results.iter().all(Option::is_some))
                    .then(|| Value::Array(results.iter().flatten().cloned().collect()))
            };
            if let Some(joined) = joined {
                target.emit_success(&joined);
            }
        });
        completion.track(forward_errors(member, &combined));
    }

    combined
}

fn forward_errors(member: Chain, combined: &Chain) -> Chain {
    let (on_error, on_transport_error) = (combined.clone(), combined.clone());
    member
        .error(move |response| on_error.emit_error(response))
        .transport_error(move |error| on_transport_error.emit_transport_error(error))
}

fn wire_abort(combined: &Chain, members: &[Chain]) {
    let members: Vec<WeakChain> = members.iter().map(Chain::downgrade).collect();
    combined.on_abort(move || {
        for member in members.iter().filter_map(WeakChain::upgrade) {
            member.abort();
        }
    });
}

fn settle_empty(scheduler: &dyn Scheduler, combined: &Chain, success: Option<Value>) {
    let deferred = (combined.clone(), success.clone());
    let scheduled = scheduler.defer(Box::new(move || {
        let (combined, success) = deferred;
        finish_empty(&combined, success.as_ref());
    }));
    if let Err(error) = scheduled {
        tracing::warn!(error = %error, "Could not defer empty combinator, settling inline");
        finish_empty(combined, success.as_ref());
    }
}

fn finish_empty(combined: &Chain, success: Option<&Value>) {
    combined.emit_loading(false);
    if let Some(value) = success {
        combined.emit_success(value);
    }
    combined.emit_finally(&Outcome::Combined, None);
}

/// Counts members down to zero, then settles the combined chain.
struct Completion {
    combined: Chain,
    remaining: Arc<Mutex<usize>>,
}

impl Completion {
    fn new(combined: &Chain, members: usize) -> Self {
        Self {
            combined: combined.clone(),
            remaining: Arc::new(Mutex::new(members)),
        }
    }

    fn track(&self, member: Chain) {
        let (combined, remaining) = (self.combined.clone(), Arc::clone(&self.remaining));
        member.on_settled(move |_| {
            let done = {
                let mut remaining = remaining.lock().unwrap_or_else(PoisonError::into_inner);
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            };
            if done {
                combined.emit_loading(false);
                combined.emit_finally(&Outcome::Combined, None);
            }
        });
    }
}
