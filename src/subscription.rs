//! Stream subscription bookkeeping.
//!
//! Each stream kind (discovery, heart rate, pulse interval) has at most one
//! live subscription. Starting a new one disposes the previous one first, and
//! every subscription carries a generation token so that items produced by a
//! disposed stream can be recognised and dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// The kinds of stream the bridge manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Device discovery.
    Scan,
    /// Heart-rate samples.
    HeartRate,
    /// Pulse-to-pulse intervals.
    PulseInterval,
}

impl StreamKind {
    /// All stream kinds.
    pub const ALL: [StreamKind; 3] = [
        StreamKind::Scan,
        StreamKind::HeartRate,
        StreamKind::PulseInterval,
    ];
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Scan => write!(f, "scan"),
            StreamKind::HeartRate => write!(f, "heart rate"),
            StreamKind::PulseInterval => write!(f, "pulse interval"),
        }
    }
}

/// Generation token identifying one subscription.
pub type StreamToken = u64;

/// A single live subscription.
#[derive(Debug)]
pub struct Subscription {
    kind: StreamKind,
    token: StreamToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn new(kind: StreamKind, token: StreamToken) -> Self {
        Self {
            kind,
            token,
            task: None,
        }
    }

    /// The stream kind.
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// The generation token.
    pub fn token(&self) -> StreamToken {
        self.token
    }

    /// Stop the forwarding task. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Disposed {} subscription #{}", self.kind, self.token);
        }
    }

    /// Whether the forwarding task has been stopped or never attached.
    pub fn is_disposed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Registry holding at most one subscription per [`StreamKind`].
#[derive(Debug, Default)]
pub struct StreamRegistry {
    slots: Mutex<HashMap<StreamKind, Subscription>>,
    next_token: AtomicU64,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispose any previous subscription of `kind` and reserve a fresh token.
    ///
    /// Items tagged with an older token are stale from this point on.
    pub fn begin(&self, kind: StreamKind) -> StreamToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self
            .slots
            .lock()
            .insert(kind, Subscription::new(kind, token));
        // Dropping the previous subscription aborts its task.
        drop(previous);
        token
    }

    /// Attach the forwarding task for `token`.
    ///
    /// If the token has already been superseded or released the task is
    /// aborted instead. Returns whether the task was attached.
    pub fn attach(&self, kind: StreamKind, token: StreamToken, task: JoinHandle<()>) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(&kind) {
            Some(sub) if sub.token == token => {
                if let Some(old) = sub.task.replace(task) {
                    old.abort();
                }
                true
            }
            _ => {
                task.abort();
                false
            }
        }
    }

    /// Remove the subscription for `token` if it is still current.
    ///
    /// Used when a stream finishes on its own.
    pub fn release(&self, kind: StreamKind, token: StreamToken) -> bool {
        let mut slots = self.slots.lock();
        if slots.get(&kind).map(|s| s.token) == Some(token) {
            slots.remove(&kind);
            true
        } else {
            false
        }
    }

    /// Whether `token` is the current subscription of `kind`.
    pub fn is_current(&self, kind: StreamKind, token: StreamToken) -> bool {
        self.slots.lock().get(&kind).map(|s| s.token) == Some(token)
    }

    /// Dispose the subscription of `kind`, if any.
    pub fn dispose(&self, kind: StreamKind) -> bool {
        let removed = self.slots.lock().remove(&kind);
        removed.is_some()
    }

    /// Dispose every subscription.
    pub fn dispose_all(&self) {
        let drained: Vec<Subscription> = self.slots.lock().drain().map(|(_, s)| s).collect();
        if !drained.is_empty() {
            debug!("Disposing {} subscriptions", drained.len());
        }
    }

    /// Kinds with a live subscription, in [`StreamKind::ALL`] order.
    pub fn active_kinds(&self) -> Vec<StreamKind> {
        let slots = self.slots.lock();
        StreamKind::ALL
            .into_iter()
            .filter(|kind| slots.contains_key(kind))
            .collect()
    }
}

/// Handle for a registered event callback.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister the callback now.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// The callback id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    fn pending_task() -> JoinHandle<()> {
        tokio::spawn(futures::future::pending::<()>())
    }

    #[tokio::test]
    async fn test_begin_supersedes_previous() {
        let registry = StreamRegistry::new();
        let first = registry.begin(StreamKind::HeartRate);
        let task = pending_task();
        let abort = task.abort_handle();
        assert!(registry.attach(StreamKind::HeartRate, first, task));

        let second = registry.begin(StreamKind::HeartRate);
        assert_ne!(first, second);
        assert!(!registry.is_current(StreamKind::HeartRate, first));
        assert!(registry.is_current(StreamKind::HeartRate, second));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn test_attach_stale_token_aborts() {
        let registry = StreamRegistry::new();
        let stale = registry.begin(StreamKind::PulseInterval);
        let _current = registry.begin(StreamKind::PulseInterval);

        let task = pending_task();
        let abort = task.abort_handle();
        assert!(!registry.attach(StreamKind::PulseInterval, stale, task));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn test_release_only_current() {
        let registry = StreamRegistry::new();
        let old = registry.begin(StreamKind::Scan);
        let new = registry.begin(StreamKind::Scan);
        assert!(!registry.release(StreamKind::Scan, old));
        assert_eq!(registry.active_kinds(), vec![StreamKind::Scan]);
        assert!(registry.release(StreamKind::Scan, new));
        assert!(registry.active_kinds().is_empty());
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let registry = StreamRegistry::new();
        for kind in StreamKind::ALL {
            let token = registry.begin(kind);
            registry.attach(kind, token, pending_task());
        }
        assert_eq!(registry.active_kinds(), StreamKind::ALL.to_vec());
        assert!(registry.dispose(StreamKind::Scan));
        assert!(!registry.dispose(StreamKind::Scan));
        registry.dispose_all();
        assert!(registry.active_kinds().is_empty());
        registry.dispose_all();
    }

    #[tokio::test]
    async fn test_subscription_dispose_idempotent() {
        let mut sub = Subscription::new(StreamKind::HeartRate, 7);
        assert!(sub.is_disposed());
        sub.task = Some(pending_task());
        assert!(!sub.is_disposed());
        sub.dispose();
        sub.dispose();
        assert!(sub.is_disposed());
        assert_eq!(sub.token(), 7);
        assert_eq!(sub.kind(), StreamKind::HeartRate);
    }

    #[test]
    fn test_callback_handle_runs_once() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = CallbackHandle::new(3, move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });
        assert_eq!(handle.id(), 3);
        handle.unregister();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stream_kind_display() {
        assert_eq!(StreamKind::HeartRate.to_string(), "heart rate");
        assert_eq!(StreamKind::PulseInterval.to_string(), "pulse interval");
    }
}
