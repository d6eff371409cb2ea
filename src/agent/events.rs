//! Event system: a typed emitter with both queue subscriptions and
//! fire-and-forget callbacks, plus the steering and follow-up queues a
//! session drains between rounds. Grounded on the teacher's
//! `ChatLoopConfig` callback registration (`llm/helpers.rs`,
//! `on_content`/`on_tool_calls`), generalized to the queue + callback
//! dual-dispatch original_source's `EventEmitter` supports.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Event kinds emitted by the session loop (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStart,
    SessionEnd,
    UserInput { text: String },
    AssistantTextStart,
    AssistantTextDelta { delta: String },
    AssistantTextEnd,
    ToolCallStart { id: String, name: String },
    ToolCallOutputDelta { id: String, delta: String },
    ToolCallEnd { id: String, name: String, content: String, is_error: bool },
    SteeringInjected { text: String },
    TurnLimit { reason: String },
    LoopDetection { pattern_length: usize },
    Error { message: String },
}

type Callback<E> = Arc<dyn Fn(E) -> BoxFuture<'static, ()> + Send + Sync>;

/// Dual-dispatch emitter: queue subscribers see events in FIFO order with
/// backpressure; callbacks are fired in registration order, an async
/// callback awaited before the next one runs for the same event. A
/// panicking callback is caught and never disrupts the emitter or its
/// siblings.
pub struct EventEmitter<E: Clone + Send + 'static> {
    subscribers: Mutex<Vec<(u64, mpsc::Sender<E>)>>,
    callbacks: Mutex<Vec<Callback<E>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl<E: Clone + Send + 'static> Default for EventEmitter<E> {
    fn default() -> Self {
        EventEmitter {
            subscribers: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl<E: Clone + Send + 'static> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a new queue consumer with the given channel capacity,
    /// returning an id that `unsubscribe` can remove by identity. The
    /// source's own unsubscribe was a self-filter that never actually
    /// removed anything; this one does.
    pub async fn subscribe(&self, capacity: usize) -> (u64, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.subscribers.lock().await.push((id, tx));
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().await.retain(|(sub_id, _)| *sub_id != id);
    }

    pub async fn on_event<F, Fut>(&self, callback: F)
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.callbacks.lock().await.push(Arc::new(move |e| callback(e).boxed()));
    }

    /// Enqueues to every subscriber first, then invokes every callback in
    /// registration order, awaiting async callbacks before moving to the
    /// next one.
    pub async fn emit(&self, event: E) {
        {
            let mut subs = self.subscribers.lock().await;
            subs.retain(|(_, tx)| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
        }
        let callbacks: Vec<Callback<E>> = self.callbacks.lock().await.clone();
        for cb in callbacks {
            let fut = std::panic::AssertUnwindSafe(cb(event.clone()));
            if fut.catch_unwind().await.is_err() {
                // A callback panicked; the emitter and remaining callbacks
                // still run normally.
            }
        }
    }
}

/// A user-injected mid-session instruction, observed only at the next
/// round's drain (§4.1).
#[derive(Debug, Clone)]
pub struct SteeringMessage {
    pub text: String,
}

/// Safe for concurrent producers; `drain` is atomic (every message
/// enqueued before the call is removed, none lost, none duplicated).
#[derive(Default)]
pub struct SteeringQueue {
    inner: Mutex<VecDeque<SteeringMessage>>,
}

impl SteeringQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, text: impl Into<String>) {
        self.inner.lock().await.push_back(SteeringMessage { text: text.into() });
    }

    /// Synchronous enqueue for non-async callers (e.g. a CLI signal
    /// handler); uses `blocking_lock` semantics via a spin-free try_lock
    /// fallback since steering is rarely contended.
    pub fn enqueue_sync(&self, text: impl Into<String>) {
        let msg = SteeringMessage { text: text.into() };
        match self.inner.try_lock() {
            Ok(mut guard) => guard.push_back(msg),
            Err(_) => {
                // Another task holds the lock; fall back to blocking so the
                // message is never silently dropped.
                tokio::task::block_in_place(|| {
                    let mut guard = self.inner.blocking_lock();
                    guard.push_back(msg);
                });
            }
        }
    }

    pub async fn drain(&self) -> Vec<SteeringMessage> {
        let mut guard = self.inner.lock().await;
        guard.drain(..).collect()
    }
}

/// Simple FIFO of messages to `submit` once the current input reaches
/// natural completion.
#[derive(Default)]
pub struct FollowUpQueue {
    inner: Mutex<VecDeque<String>>,
}

impl FollowUpQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, text: impl Into<String>) {
        self.inner.lock().await.push_back(text.into());
    }

    pub async fn dequeue(&self) -> Option<String> {
        self.inner.lock().await.pop_front()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// A stable signature for a tool call: name + canonically-serialized
/// arguments, used by the loop detector (§4.13).
pub fn tool_call_signature(name: &str, arguments: &Value) -> String {
    use sha2::{Digest, Sha256};
    let canonical = canonicalize_json(arguments);
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic JSON rendering: object keys sorted, no whitespace.
fn canonicalize_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize_json(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn emit_delivers_to_queue_subscribers_in_order() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let (_id, mut rx) = emitter.subscribe(10).await;
        emitter.emit(1).await;
        emitter.emit(2).await;
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn callbacks_fire_in_registration_order() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        emitter.on_event(move |e| {
            let o1 = o1.clone();
            async move { o1.lock().await.push(("a", e)) }
        }).await;
        let o2 = order.clone();
        emitter.on_event(move |e| {
            let o2 = o2.clone();
            async move { o2.lock().await.push(("b", e)) }
        }).await;
        emitter.emit(7).await;
        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec![("a", 7), ("b", 7)]);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_disrupt_emitter() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let hit = Arc::new(AtomicUsize::new(0));
        emitter.on_event(|_e| async { panic!("boom") }).await;
        let hit2 = hit.clone();
        emitter.on_event(move |_e| {
            let hit2 = hit2.clone();
            async move {
                hit2.fetch_add(1, Ordering::SeqCst);
            }
        }).await;
        emitter.emit(1).await;
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_actually_stops_delivery() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let (id, mut rx) = emitter.subscribe(10).await;
        emitter.emit(1).await;
        emitter.unsubscribe(id).await;
        emitter.emit(2).await;
        assert_eq!(rx.recv().await, Some(1));
        drop(emitter);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn steering_queue_drain_is_atomic_and_fifo() {
        let queue = SteeringQueue::new();
        queue.enqueue("first").await;
        queue.enqueue("second").await;
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text, "first");
        assert!(queue.drain().await.is_empty());
    }

    #[tokio::test]
    async fn follow_up_queue_is_fifo() {
        let queue = FollowUpQueue::new();
        queue.enqueue("a").await;
        queue.enqueue("b").await;
        assert_eq!(queue.dequeue().await, Some("a".to_string()));
        assert_eq!(queue.dequeue().await, Some("b".to_string()));
        assert_eq!(queue.dequeue().await, None);
    }

    #[test]
    fn signature_is_stable_regardless_of_key_order() {
        let a = serde_json::json!({"x": 1, "y": 2});
        let b = serde_json::json!({"y": 2, "x": 1});
        assert_eq!(tool_call_signature("tool", &a), tool_call_signature("tool", &b));
    }

    #[test]
    fn signature_differs_by_name() {
        let args = serde_json::json!({"x": 1});
        assert_ne!(tool_call_signature("a", &args), tool_call_signature("b", &args));
    }
}
