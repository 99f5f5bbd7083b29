//! Subscription registry: topic pattern -> ordered list of callbacks
//!
//! The registry is owned by the broker I/O task. Consumers never touch it
//! directly; they send register/unregister commands through the
//! [`Coordinator`](super::coordinator::Coordinator).
//!
//! # Resolution policy
//!
//! An exact pattern entry always wins. Otherwise the registered patterns are
//! scanned in insertion order and the **first** wildcard pattern that matches
//! is used. Only one pattern's callbacks ever fire for a message, even when
//! several overlapping wildcard subscriptions would match.

use std::fmt;
use std::sync::Arc;

use color_eyre::Result;

use super::topic;

/// Capability invoked for every message routed to a subscription.
///
/// Implementations may be slow or stateful; the registry stores handles and
/// never inspects them. Returning an error is logged by the dispatcher and
/// does not affect sibling callbacks.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, topic: &str, payload: &str) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &str) -> Result<()> + Send + Sync,
{
    fn handle(&self, topic: &str, payload: &str) -> Result<()> {
        self(topic, payload)
    }
}

/// Shared handle to a registered handler. Identity is pointer identity.
pub type Callback = Arc<dyn MessageHandler>;

/// Wraps a closure into a [`Callback`]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&str, &str) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn same_callback(a: &Callback, b: &Callback) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// One pattern together with its callbacks, in registration order
pub struct Subscription {
    pattern: String,
    callbacks: Vec<Callback>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Outcome of [`SubscriptionRegistry::unregister`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistered {
    /// The callback was removed and others remain for the pattern
    CallbackRemoved,
    /// The last callback was removed and the pattern entry is gone
    PatternRemoved,
    /// Neither the pattern nor the callback was registered
    NotFound,
}

/// Callbacks selected for one inbound topic
pub struct Resolved {
    pub pattern: String,
    pub callbacks: Vec<Callback>,
}

#[derive(Default, Debug)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` to the pattern's list.
    ///
    /// Returns true when the pattern entry was created by this call.
    /// Registering the same callback twice makes it fire twice.
    pub fn register(&mut self, pattern: &str, callback: Callback) -> bool {
        match self.position(pattern) {
            Some(index) => {
                self.subscriptions[index].callbacks.push(callback);
                false
            }
            None => {
                self.subscriptions.push(Subscription {
                    pattern: pattern.to_string(),
                    callbacks: vec![callback],
                });
                true
            }
        }
    }

    /// Removes the first instance of `callback` registered under `pattern`.
    ///
    /// The pattern entry is dropped eagerly once it has no callbacks left.
    pub fn unregister(&mut self, pattern: &str, callback: &Callback) -> Unregistered {
        let Some(index) = self.position(pattern) else {
            return Unregistered::NotFound;
        };

        let callbacks = &mut self.subscriptions[index].callbacks;
        let Some(slot) = callbacks.iter().position(|c| same_callback(c, callback)) else {
            return Unregistered::NotFound;
        };
        callbacks.remove(slot);

        if callbacks.is_empty() {
            self.subscriptions.remove(index);
            Unregistered::PatternRemoved
        } else {
            Unregistered::CallbackRemoved
        }
    }

    /// Selects the callbacks for an inbound topic.
    ///
    /// An exact pattern entry short-circuits wildcard scanning. Otherwise the
    /// first registered pattern that matches wins.
    pub fn resolve(&self, topic: &str) -> Option<Resolved> {
        let subscription = self
            .subscriptions
            .iter()
            .find(|s| s.pattern == topic)
            .or_else(|| {
                self.subscriptions
                    .iter()
                    .find(|s| topic::matches(topic, &s.pattern))
            })?;

        Some(Resolved {
            pattern: subscription.pattern.clone(),
            callbacks: subscription.callbacks.clone(),
        })
    }

    /// Registered patterns in registration order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(|s| s.pattern.as_str())
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }

    pub fn get(&self, pattern: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.pattern == pattern)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn position(&self, pattern: &str) -> Option<usize> {
        self.subscriptions.iter().position(|s| s.pattern == pattern)
    }
}
