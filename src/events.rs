//! Typed publish/subscribe bus and the cooperative wait-group barrier that
//! together decide when the pipeline is drained.
//!
//! Quiescence is completion-counted: a pending counter is incremented before a
//! handler task is spawned and decremented when the handler future finishes,
//! so `settled()` returning means no handler is queued *or* running. New work
//! can only be published from running handlers or from wait-group-tracked
//! tasks, which is what makes `Session::drain` sound.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::Notify;

/// Subscription key for the closed set of pipeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SessionStart,
    SessionEnd,
    Host,
    TcpPort,
    Url,
    UrlResponsive,
}

/// A pipeline event with its payload. The payload arity is the variant.
#[derive(Debug, Clone)]
pub enum Event {
    SessionStart,
    SessionEnd,
    Host(String),
    TcpPort { port: u16, host: String },
    Url(String),
    UrlResponsive(String),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::SessionStart => Topic::SessionStart,
            Event::SessionEnd => Topic::SessionEnd,
            Event::Host(_) => Topic::Host,
            Event::TcpPort { .. } => Topic::TcpPort,
            Event::Url(_) => Topic::Url,
            Event::UrlResponsive(_) => Topic::UrlResponsive,
        }
    }
}

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Process-wide asynchronous pub/sub primitive. Every publish runs every
/// subscribed handler on its own task; there is no ordering between handlers.
pub struct EventBus {
    handlers: RwLock<HashMap<Topic, Vec<Handler>>>,
    pending: Arc<AtomicUsize>,
    settled: Arc<Notify>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            pending: Arc::new(AtomicUsize::new(0)),
            settled: Arc::new(Notify::new()),
        }
    }

    /// Register an async handler for a topic.
    pub fn subscribe<F, Fut>(&self, topic: Topic, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |event| -> BoxFuture<'static, ()> { Box::pin(handler(event)) });
        self.handlers.write().entry(topic).or_default().push(handler);
    }

    /// Fire-and-forget publish. The pending count covers each handler until
    /// its future completes.
    pub fn publish(&self, event: Event) {
        let subscribed = self
            .handlers
            .read()
            .get(&event.topic())
            .cloned()
            .unwrap_or_default();

        for handler in subscribed {
            let event = event.clone();
            let pending = Arc::clone(&self.pending);
            let settled = Arc::clone(&self.settled);
            pending.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                handler(event).await;
                if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    settled.notify_waiters();
                }
            });
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    /// Wait until every queued and running handler has completed.
    pub async fn settled(&self) {
        loop {
            if self.is_idle() {
                return;
            }
            let notified = self.settled.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

struct WaitGroupInner {
    count: AtomicUsize,
    idle: Notify,
}

/// Counted barrier for work units spawned by agents, independent of the bus
/// worker accounting. Dropping the token signals completion.
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

pub struct WorkToken {
    inner: Arc<WaitGroupInner>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WaitGroupInner {
                count: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn enter(&self) -> WorkToken {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        WorkToken {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.count.load(Ordering::SeqCst) == 0
    }

    pub async fn wait(&self) {
        loop {
            if self.is_idle() {
                return;
            }
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkToken {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
