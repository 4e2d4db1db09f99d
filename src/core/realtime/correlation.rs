//! Correlation of inbound envelopes with the operations waiting on them.
//!
//! The [`Correlator`] holds two kinds of registrations:
//!
//! - **one-shot waiters** ([`Waiter`]): resolved by the first matching
//!   envelope and then removed. When several waiters match the same envelope
//!   the earliest-registered one consumes it; the others keep waiting.
//! - **subscriptions** ([`Subscription`]): receive every matching envelope,
//!   in receipt order, until dropped.
//!
//! Waiters keyed by discriminator or by (discriminator, correlation id) are
//! looked up directly; only [`Matcher::Predicate`] registrations are scanned.
//! Dispatch never blocks: one-shot delivery goes through a `oneshot` channel
//! and subscriptions are backed by unbounded queues.
//!
//! The correlator never expires a waiter. Callers bound their waits with
//! `tokio::time::timeout`; dropping a waiter deregisters it. Closing the
//! correlator (connection teardown) fails all waiters with
//! [`RealtimeError::ConnectionLost`] and ends all subscriptions.

use futures::Stream;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

use super::base::{RealtimeError, RealtimeResult};
use super::codec::Envelope;

/// Predicate over inbound envelopes.
pub type EnvelopePredicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// What a registration matches.
#[derive(Clone)]
pub enum Matcher {
    /// Any envelope with this discriminator
    Type(String),
    /// An envelope with this discriminator whose correlation id equals `id`
    Correlated {
        /// Discriminator
        event_type: String,
        /// Correlation id, see [`Envelope::correlation_id`]
        id: String,
    },
    /// Arbitrary predicate, evaluated in registration order
    Predicate(EnvelopePredicate),
}

impl Matcher {
    /// Match on the discriminator only.
    pub fn of_type(event_type: impl Into<String>) -> Self {
        Matcher::Type(event_type.into())
    }

    /// Match on discriminator and correlation id.
    pub fn correlated(event_type: impl Into<String>, id: impl Into<String>) -> Self {
        Matcher::Correlated {
            event_type: event_type.into(),
            id: id.into(),
        }
    }

    /// Match with an arbitrary predicate.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(f))
    }

    /// Match any of the given discriminators.
    pub fn any_of(types: &[&str]) -> Self {
        let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
        Matcher::predicate(move |env| types.iter().any(|t| t == env.event_type()))
    }

    /// Evaluate against an envelope.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            Matcher::Type(t) => envelope.event_type() == t,
            Matcher::Correlated { event_type, id } => {
                envelope.event_type() == event_type
                    && envelope.correlation_id() == Some(id.as_str())
            }
            Matcher::Predicate(f) => f(envelope),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Type(t) => write!(f, "Type({t})"),
            Matcher::Correlated { event_type, id } => write!(f, "Correlated({event_type}, {id})"),
            Matcher::Predicate(_) => write!(f, "Predicate"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Where a one-shot waiter is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Type(String),
    Key(String, String),
    Scan,
}

struct Pending {
    seq: u64,
    tx: oneshot::Sender<Envelope>,
}

struct ScanPending {
    seq: u64,
    predicate: EnvelopePredicate,
    tx: oneshot::Sender<Envelope>,
}

struct Subscriber {
    seq: u64,
    matcher: Matcher,
    tx: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct Registry {
    next_seq: u64,
    closed: bool,
    by_type: HashMap<String, VecDeque<Pending>>,
    by_key: HashMap<(String, String), VecDeque<Pending>>,
    scanned: Vec<ScanPending>,
    subscribers: Vec<Subscriber>,
}

/// Which indexed queue holds the winning waiter.
enum Winner {
    Type,
    Key,
    Scan(usize),
}

impl Registry {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Pop the earliest-registered waiter matching `envelope`.
    fn take_waiter(&mut self, envelope: &Envelope) -> Option<oneshot::Sender<Envelope>> {
        let event_type = envelope.event_type();
        let key = envelope
            .correlation_id()
            .map(|id| (event_type.to_string(), id.to_string()));

        let mut best: Option<(u64, Winner)> = None;
        let mut consider = |seq: u64, winner: Winner| {
            if best.as_ref().is_none_or(|(s, _)| seq < *s) {
                best = Some((seq, winner));
            }
        };

        if let Some(front) = self.by_type.get(event_type).and_then(|q| q.front()) {
            consider(front.seq, Winner::Type);
        }
        if let Some(front) = key
            .as_ref()
            .and_then(|k| self.by_key.get(k))
            .and_then(|q| q.front())
        {
            consider(front.seq, Winner::Key);
        }
        if let Some((idx, pending)) = self
            .scanned
            .iter()
            .enumerate()
            .find(|(_, p)| (p.predicate)(envelope))
        {
            consider(pending.seq, Winner::Scan(idx));
        }

        match best?.1 {
            Winner::Type => {
                let queue = self.by_type.get_mut(event_type)?;
                let pending = queue.pop_front();
                if queue.is_empty() {
                    self.by_type.remove(event_type);
                }
                pending.map(|p| p.tx)
            }
            Winner::Key => {
                let key = key?;
                let queue = self.by_key.get_mut(&key)?;
                let pending = queue.pop_front();
                if queue.is_empty() {
                    self.by_key.remove(&key);
                }
                pending.map(|p| p.tx)
            }
            Winner::Scan(idx) => Some(self.scanned.remove(idx).tx),
        }
    }

    fn remove_waiter(&mut self, slot: &Slot, seq: u64) {
        match slot {
            Slot::Type(t) => {
                if let Some(queue) = self.by_type.get_mut(t) {
                    queue.retain(|p| p.seq != seq);
                    if queue.is_empty() {
                        self.by_type.remove(t);
                    }
                }
            }
            Slot::Key(t, id) => {
                let key = (t.clone(), id.clone());
                if let Some(queue) = self.by_key.get_mut(&key) {
                    queue.retain(|p| p.seq != seq);
                    if queue.is_empty() {
                        self.by_key.remove(&key);
                    }
                }
            }
            Slot::Scan => self.scanned.retain(|p| p.seq != seq),
        }
    }

    fn waiter_count(&self) -> usize {
        self.by_type.values().map(VecDeque::len).sum::<usize>()
            + self.by_key.values().map(VecDeque::len).sum::<usize>()
            + self.scanned.len()
    }
}

// =============================================================================
// Correlator
// =============================================================================

/// Registry of waiters and subscriptions for one connection.
pub struct Correlator {
    registry: Mutex<Registry>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Register a one-shot waiter.
    ///
    /// Register before sending the request it waits for, otherwise a fast
    /// acknowledgment can be dispatched before the waiter exists.
    pub fn await_match(self: &Arc<Self>, matcher: Matcher) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.registry.lock();
        let seq = registry.next_seq();
        let slot = match matcher {
            Matcher::Type(t) => {
                if !registry.closed {
                    registry
                        .by_type
                        .entry(t.clone())
                        .or_default()
                        .push_back(Pending { seq, tx });
                }
                Slot::Type(t)
            }
            Matcher::Correlated { event_type, id } => {
                if !registry.closed {
                    registry
                        .by_key
                        .entry((event_type.clone(), id.clone()))
                        .or_default()
                        .push_back(Pending { seq, tx });
                }
                Slot::Key(event_type, id)
            }
            Matcher::Predicate(predicate) => {
                if !registry.closed {
                    registry.scanned.push(ScanPending { seq, predicate, tx });
                }
                Slot::Scan
            }
        };
        Waiter {
            seq,
            slot,
            rx,
            correlator: Arc::downgrade(self),
            done: false,
        }
    }

    /// Register a persistent subscription.
    pub fn subscribe(self: &Arc<Self>, matcher: Matcher) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock();
        let seq = registry.next_seq();
        if !registry.closed {
            registry.subscribers.push(Subscriber { seq, matcher, tx });
        }
        Subscription {
            seq,
            rx,
            correlator: Arc::downgrade(self),
        }
    }

    /// Deliver an inbound envelope.
    ///
    /// At most one one-shot waiter consumes it; every matching subscription
    /// receives a copy.
    pub fn dispatch(&self, envelope: &Envelope) {
        let mut registry = self.registry.lock();
        if registry.closed {
            return;
        }

        registry.subscribers.retain(|sub| {
            if sub.matcher.matches(envelope) {
                sub.tx.send(envelope.clone()).is_ok()
            } else {
                !sub.tx.is_closed()
            }
        });

        while let Some(tx) = registry.take_waiter(envelope) {
            // A failed send means the waiter is being dropped; offer the
            // envelope to the next candidate.
            if tx.send(envelope.clone()).is_ok() {
                break;
            }
        }
    }

    /// Tear down: fail every waiter and end every subscription.
    pub fn close(&self) {
        let mut registry = self.registry.lock();
        registry.closed = true;
        registry.by_type.clear();
        registry.by_key.clear();
        registry.scanned.clear();
        registry.subscribers.clear();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.registry.lock().closed
    }

    /// Number of registered one-shot waiters.
    pub fn pending_waiters(&self) -> usize {
        self.registry.lock().waiter_count()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }

    fn deregister_waiter(&self, slot: &Slot, seq: u64) {
        self.registry.lock().remove_waiter(slot, seq);
    }

    fn deregister_subscription(&self, seq: u64) {
        self.registry.lock().subscribers.retain(|s| s.seq != seq);
    }
}

// =============================================================================
// Waiter
// =============================================================================

/// A pending one-shot registration.
///
/// Resolves to the matching envelope, or to [`RealtimeError::ConnectionLost`]
/// if the connection is torn down first. Dropping it deregisters it.
pub struct Waiter {
    seq: u64,
    slot: Slot,
    rx: oneshot::Receiver<Envelope>,
    correlator: Weak<Correlator>,
    done: bool,
}

impl Future for Waiter {
    type Output = RealtimeResult<Envelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.done = true;
                Poll::Ready(result.map_err(|_| RealtimeError::ConnectionLost))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.done
            && let Some(correlator) = self.correlator.upgrade()
        {
            correlator.deregister_waiter(&self.slot, self.seq);
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A persistent registration delivering every matching envelope in order.
pub struct Subscription {
    seq: u64,
    rx: mpsc::UnboundedReceiver<Envelope>,
    correlator: Weak<Correlator>,
}

impl Subscription {
    /// Next matching envelope; `None` once the connection is torn down.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(correlator) = self.correlator.upgrade() {
            correlator.deregister_subscription(self.seq);
        }
    }
}
