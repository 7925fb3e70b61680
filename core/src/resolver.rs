//! Three-layer configuration resolution.
//!
//! [`ConfigResolver::merge`] folds the global, module and call-site layers into
//! one [`ResolvedConfig`]:
//!
//! | Field | Rule |
//! |---|---|
//! | `base_url` | path-joined global, module, call-site |
//! | `headers`, `params` | merged per key, call-site wins |
//! | `body` | see [`merge_body`] |
//! | `url`, `method`, `timeout` | nearest layer that sets it |
//! | cache, retry, predicate, extractor, transport | nearest layer that sets it, no merge |
//! | `cancelable` | `true` unless any layer sets `false` |
//! | processors | all layers, global first |

use crate::cache::CacheDescriptor;
use crate::config::{
    Body, BehaviorConfig, Extractor, LayerConfig, LayerSnapshot, Predicate, TransportConfig,
};
use crate::processor::{Chain, catch_panic};
use crate::retry::RetryWhen;
use crate::transport::{RequestConfig, Response, Transport};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Join path fragments into one path with single separators.
///
/// Empty and missing fragments are skipped. A `scheme://` prefix on the first
/// fragment is kept as is; everything after it is normalized. The result keeps
/// the leading `/` of the first fragment and never ends with one unless the
/// whole path is `/`.
///
/// ```
/// use courier_core::resolver::path_join;
///
/// assert_eq!(path_join(&[Some("/api"), Some("/users/"), Some("/42")]), "/api/users/42");
/// assert_eq!(path_join(&[Some("https://x.io/"), None, Some("v1")]), "https://x.io/v1");
/// ```
#[must_use]
pub fn path_join(fragments: &[Option<&str>]) -> String {
    let mut present = fragments.iter().flatten().copied().filter(|f| !f.is_empty());
    let Some(first) = present.next() else {
        return String::new();
    };
    let (scheme, first) = split_scheme(first);
    let rooted = first.starts_with('/');

    let joined = std::iter::once(first)
        .chain(present)
        .flat_map(|fragment| fragment.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    format!("{scheme}{}{joined}", if rooted { "/" } else { "" })
}

/// Split `scheme://` off the front of `fragment`, if it has one.
fn split_scheme(fragment: &str) -> (&str, &str) {
    let Some(at) = fragment.find("://") else {
        return ("", fragment);
    };
    let scheme = &fragment[..at];
    let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if valid {
        fragment.split_at(at + 3)
    } else {
        ("", fragment)
    }
}

/// Merge bodies, nearest layer first.
///
/// Walking call-site, module, then global: the first non-object body found
/// becomes the whole body and stops the walk. Object bodies are shallow-merged
/// with nearer keys winning. `Json(Null)` counts as absent.
#[must_use]
pub fn merge_body<'a>(nearest_first: impl IntoIterator<Item = Option<&'a Body>>) -> Option<Body> {
    let mut merged: Option<Map<String, Value>> = None;

    for body in nearest_first.into_iter().flatten() {
        match body {
            Body::Json(Value::Null) => {},
            Body::Json(Value::Object(fields)) => {
                let acc = merged.get_or_insert_with(Map::new);
                for (key, value) in fields {
                    acc.entry(key.clone()).or_insert_with(|| value.clone());
                }
            },
            other => return Some(other.clone()),
        }
    }

    merged.map(|fields| Body::Json(Value::Object(fields)))
}

/// Merge string maps farthest layer first, so nearer layers overwrite.
fn merge_maps<'a>(
    farthest_first: impl IntoIterator<Item = &'a BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    farthest_first.into_iter().fold(BTreeMap::new(), |mut acc, map| {
        acc.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        acc
    })
}

fn nearest<T: Clone>(layers: [&Option<T>; 3]) -> Option<T> {
    layers.into_iter().rev().find_map(Clone::clone)
}

/// The effective configuration of one attempt.
#[derive(Clone)]
pub struct ResolvedConfig {
    /// Transport descriptor (with `request_id` left at 0 until the attempt is armed)
    pub request: RequestConfig,
    /// Behavior fragments in global, module, call-site order
    pub layers: [BehaviorConfig; 3],
    /// Nearest cache descriptor
    pub cache: Option<CacheDescriptor>,
    /// Nearest retry policy
    pub retry_when: Option<RetryWhen>,
    /// Nearest business-success predicate
    pub predicate: Option<Predicate>,
    /// Nearest result extractor
    pub extractor: Option<Extractor>,
    /// Nearest transport override
    pub transport: Option<Arc<dyn Transport>>,
}

impl ResolvedConfig {
    /// Whether `response` is a business success. Defaults to `true`.
    ///
    /// A panicking predicate counts as a business error.
    #[must_use]
    pub fn is_success(&self, response: &Response) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| {
            catch_panic("predicate", || predicate(response)).unwrap_or(false)
        })
    }

    /// Value handed to success processors. Defaults to the response body.
    ///
    /// Returns `None` when the extractor panics.
    #[must_use]
    pub fn extract(&self, response: &Response) -> Option<Value> {
        match &self.extractor {
            Some(extract) => catch_panic("extractor", || extract(response)),
            None => Some(response.body.clone()),
        }
    }

    /// A fresh chain loaded with every layer's processors.
    #[must_use]
    pub fn chain(&self) -> Chain {
        Chain::from_layers(&self.layers)
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("request", &self.request)
            .field("cache", &self.cache)
            .field("retry_when", &self.retry_when)
            .field("predicate", &self.predicate.is_some())
            .field("extractor", &self.extractor.is_some())
            .field("transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

/// Holds the module and call-site layers of one orchestrated call.
///
/// Resolution is repeated on every attempt so producer layers are re-read.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    module: LayerConfig,
    call: LayerConfig,
}

impl ConfigResolver {
    /// Bind the module and call-site layers.
    #[must_use]
    pub const fn new(module: LayerConfig, call: LayerConfig) -> Self {
        Self { module, call }
    }

    /// Evaluate every layer against the current global layer and merge.
    #[must_use]
    pub fn resolve(&self, global: &LayerConfig) -> ResolvedConfig {
        Self::merge(global.snapshot(), self.module.snapshot(), self.call.snapshot())
    }

    /// Merge three evaluated layers.
    #[must_use]
    pub fn merge(global: LayerSnapshot, module: LayerSnapshot, call: LayerSnapshot) -> ResolvedConfig {
        let request = merge_transport([&global.transport, &module.transport, &call.transport]);
        let behaviors = [&global.behavior, &module.behavior, &call.behavior];

        let cancelable = behaviors.iter().all(|b| b.cancelable != Some(false));
        let cache = nearest(behaviors.map(|b| &b.cache));
        let retry_when = nearest(behaviors.map(|b| &b.retry_when));
        let predicate = nearest(behaviors.map(|b| &b.predicate));
        let extractor = nearest(behaviors.map(|b| &b.extractor));
        let transport = nearest(behaviors.map(|b| &b.transport));

        ResolvedConfig {
            request: RequestConfig { cancelable, ..request },
            layers: [global.behavior, module.behavior, call.behavior],
            cache,
            retry_when,
            predicate,
            extractor,
            transport,
        }
    }
}

fn merge_transport(layers: [&TransportConfig; 3]) -> RequestConfig {
    RequestConfig {
        base_url: path_join(&layers.map(|l| l.base_url.as_deref())),
        url: nearest(layers.map(|l| &l.url)),
        method: nearest(layers.map(|l| &l.method)).unwrap_or_default(),
        headers: merge_maps(layers.map(|l| &l.headers)),
        params: merge_maps(layers.map(|l| &l.params)),
        body: merge_body(layers.into_iter().rev().map(|l| l.body.as_ref())),
        timeout: nearest(layers.map(|l| &l.timeout)),
        cancelable: true,
        request_id: 0,
    }
}
