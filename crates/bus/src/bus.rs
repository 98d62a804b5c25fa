use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use hermes_core::{Event, HermesError, Request, Result, Subdomain};
use hermes_ports::DocStore;
use hermes_store::Repo;
use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::retry::PolicyFactory;
use crate::uow::UnitOfWork;

/// Handles one event type inside its own transactional scope.
///
/// The scope is committed by the bus after `handle` returns `Ok`; on any
/// error the scope is discarded and the dispatch's retry policy decides
/// whether a fresh scope gets another attempt.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Event: Event;

    async fn handle(&self, ctx: &UnitOfWork, event: &Self::Event) -> Result<()>;
}

/// Handles one request type, producing its response.
///
/// Exactly one handler may be registered per request type; errors surface
/// directly to the caller, with no retry.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    type Request: Request;

    async fn handle(
        &self,
        ctx: &UnitOfWork,
        request: &Self::Request,
    ) -> Result<<Self::Request as Request>::Response>;
}

/// Long-running background source of events.
///
/// Runs as a tracked task until the bus is shut down; the sink is its only
/// way to emit events.
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn run(&self, sink: EventSink);
}

/// Publish-only capability handed to event publishers
#[derive(Clone)]
pub struct EventSink {
    bus: Arc<Bus>,
}

impl EventSink {
    pub fn publish<E: Event>(&self, event: E) {
        self.bus.publish(event);
    }
}

/// Dyn-safe view of an event used on the dispatch path
trait AnyEvent: Any + Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

impl<E: Event> AnyEvent for E {
    fn name(&self) -> &'static str {
        E::name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
trait ErasedEventHandler: Send + Sync {
    async fn handle(&self, ctx: &UnitOfWork, event: &dyn AnyEvent) -> Result<()>;
}

struct TypedEventHandler<H>(H);

#[async_trait]
impl<H: EventHandler> ErasedEventHandler for TypedEventHandler<H> {
    async fn handle(&self, ctx: &UnitOfWork, event: &dyn AnyEvent) -> Result<()> {
        let event = event.as_any().downcast_ref::<H::Event>().ok_or_else(|| {
            HermesError::Consistency(format!(
                "handler bound to {} received a different event",
                <H::Event as Event>::name()
            ))
        })?;

        self.0.handle(ctx, event).await
    }
}

#[async_trait]
trait ErasedRequestHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &UnitOfWork,
        request: &(dyn Any + Send + Sync),
    ) -> Result<Box<dyn Any + Send>>;
}

struct TypedRequestHandler<H>(H);

#[async_trait]
impl<H: RequestHandler> ErasedRequestHandler for TypedRequestHandler<H> {
    async fn handle(
        &self,
        ctx: &UnitOfWork,
        request: &(dyn Any + Send + Sync),
    ) -> Result<Box<dyn Any + Send>> {
        let request = request.downcast_ref::<H::Request>().ok_or_else(|| {
            HermesError::Consistency(format!(
                "handler bound to {} received a different request",
                H::Request::name()
            ))
        })?;

        let response = self.0.handle(ctx, request).await?;

        Ok(Box::new(response))
    }
}

#[derive(Clone)]
struct EventEntry {
    subdomain: Subdomain,
    handler: Arc<dyn ErasedEventHandler>,
    policy_factory: PolicyFactory,
}

#[derive(Clone)]
struct RequestEntry {
    subdomain: Subdomain,
    handler: Arc<dyn ErasedRequestHandler>,
}

/// The message bus: handler registries plus a supervisor for every task it
/// spawns.
///
/// Constructed once at startup; handlers are registered before the bus is
/// shared (`Arc<Bus>`), publishers and events after. Each event dispatch
/// runs in its own task with its own unit of work and retry policy, so
/// handlers of one event never block or observe each other.
pub struct Bus {
    store: Arc<dyn DocStore>,
    event_handlers: HashMap<&'static str, Vec<EventEntry>>,
    request_handlers: HashMap<&'static str, RequestEntry>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    publishers: Mutex<Vec<JoinHandle<()>>>,
}

impl Bus {
    pub fn new(store: Arc<dyn DocStore>) -> Self {
        Self {
            store,
            event_handlers: HashMap::new(),
            request_handlers: HashMap::new(),
            tasks: Mutex::new(Vec::new()),
            publishers: Mutex::new(Vec::new()),
        }
    }

    /// Register an event handler owned by `subdomain`.
    ///
    /// The handler is bound to its declared event type here, once; the
    /// policy factory produces a fresh retry policy for every dispatch.
    pub fn add_event_handler<H: EventHandler>(
        &mut self,
        subdomain: Subdomain,
        handler: H,
        policy_factory: PolicyFactory,
    ) {
        self.event_handlers
            .entry(<H::Event as Event>::name())
            .or_default()
            .push(EventEntry {
                subdomain,
                handler: Arc::new(TypedEventHandler(handler)),
                policy_factory,
            });
    }

    /// Register the single handler for its declared request type
    pub fn add_request_handler<H: RequestHandler>(
        &mut self,
        subdomain: Subdomain,
        handler: H,
    ) -> Result<()> {
        let name = H::Request::name();
        if self.request_handlers.contains_key(name) {
            return Err(HermesError::Config(format!(
                "can't register second handler for {name}"
            )));
        }

        self.request_handlers.insert(
            name,
            RequestEntry {
                subdomain,
                handler: Arc::new(TypedRequestHandler(handler)),
            },
        );

        Ok(())
    }

    /// Start a long-running publisher task, tracked for cancellation at
    /// shutdown. Must be called from within a tokio runtime.
    pub fn add_event_publisher<P: EventPublisher>(self: &Arc<Self>, publisher: P) {
        let sink = EventSink { bus: self.clone() };
        let handle = tokio::spawn(async move { publisher.run(sink).await });

        lock(&self.publishers).push(handle);
    }

    /// Fire-and-forget fan-out: schedules asynchronous dispatch and returns
    /// without waiting for any handler.
    pub fn publish<E: Event>(self: &Arc<Self>, event: E) {
        info!("{event:?}");

        let bus = self.clone();
        let event: Arc<dyn AnyEvent> = Arc::new(event);
        let handle = tokio::spawn(async move { bus.route_event(event).await });

        self.track(handle);
    }

    async fn route_event(self: Arc<Self>, event: Arc<dyn AnyEvent>) {
        let entries = self
            .event_handlers
            .get(event.name())
            .cloned()
            .unwrap_or_default();

        for entry in entries {
            let bus = self.clone();
            let event = event.clone();
            let handle = tokio::spawn(async move { bus.dispatch_event(entry, event).await });

            self.track(handle);
        }
    }

    /// Track a dispatch task until [`Bus::drain`], reaping completed handles
    /// so a long-lived bus holds only in-flight work.
    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn dispatch_event(&self, entry: EventEntry, event: Arc<dyn AnyEvent>) {
        let mut policy = (entry.policy_factory)();

        loop {
            match self.attempt_event(&entry, event.as_ref()).await {
                Ok(()) => return,
                Err(err) if err.is_recoverable() => {
                    warn!("{}: {err}", event.name());

                    if !policy.try_again().await {
                        return;
                    }
                }
                Err(err) => {
                    error!("{}: {err}", event.name());

                    return;
                }
            }
        }
    }

    /// One attempt: fresh unit of work, handler, commit. A failed attempt's
    /// scope is discarded whole.
    async fn attempt_event(&self, entry: &EventEntry, event: &dyn AnyEvent) -> Result<()> {
        let uow = UnitOfWork::new(Repo::new(self.store.clone(), entry.subdomain));
        entry.handler.handle(&uow, event).await?;

        uow.commit().await
    }

    /// Route a request to its single handler: one unit of work, one attempt,
    /// the result or the error - never a retry.
    pub async fn request<R: Request>(&self, request: R) -> Result<R::Response> {
        let entry = self
            .request_handlers
            .get(R::name())
            .cloned()
            .ok_or(HermesError::NoHandler(R::name()))?;

        let uow = UnitOfWork::new(Repo::new(self.store.clone(), entry.subdomain));
        let response = entry.handler.handle(&uow, &request).await?;
        uow.commit().await?;

        response
            .downcast::<R::Response>()
            .map(|response| *response)
            .map_err(|_| {
                HermesError::Consistency(format!("wrong response type for {}", R::name()))
            })
    }

    /// Wait for every outstanding dispatch task, including tasks spawned
    /// while draining.
    pub async fn drain(&self) {
        loop {
            let Some(handle) = lock(&self.tasks).pop() else {
                return;
            };

            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!("dispatch task panicked: {err}");
                }
            }
        }
    }

    /// Cancel the long-running publisher tasks (they are typically infinite
    /// loops), then wait for the remaining handler tasks, so in-flight work
    /// finishes cleanly rather than being torn down mid-commit.
    pub async fn shutdown(&self) {
        let publishers: Vec<_> = lock(&self.publishers).drain(..).collect();
        for handle in &publishers {
            handle.abort();
        }
        for handle in publishers {
            let _ = handle.await;
        }

        self.drain().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use hermes_store::MemStore;

    use super::*;
    use crate::retry::NeverRetry;

    #[derive(Debug)]
    struct Ping;

    impl Event for Ping {
        fn name() -> &'static str {
            "Ping"
        }
    }

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        type Event = Ping;

        async fn handle(&self, _ctx: &UnitOfWork, _event: &Ping) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            Ok(())
        }
    }

    #[tokio::test]
    async fn test_completed_dispatch_handles_are_reaped() {
        let _ = env_logger::try_init();

        let mut bus = Bus::new(Arc::new(MemStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        bus.add_event_handler(
            Subdomain::new("data"),
            CountingHandler {
                calls: calls.clone(),
            },
            NeverRetry::factory(),
        );

        let bus = Arc::new(bus);
        let published = 256;
        for _ in 0..published {
            bus.publish(Ping);
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) < published {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all dispatches must complete");
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The next publish reaps everything that already completed: a bus
        // that never drains must not accumulate one handle per dispatch
        bus.publish(Ping);
        assert!(lock(&bus.tasks).len() < 16);

        bus.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), published + 1);
        assert!(lock(&bus.tasks).is_empty());
    }
}
