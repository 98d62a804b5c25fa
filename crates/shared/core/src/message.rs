use std::fmt;

/// Fire-and-forget fact broadcast to zero-or-more handlers.
///
/// Events are immutable values routed by their declared name; the bus binds
/// a handler to that name once, at registration.
pub trait Event: fmt::Debug + Send + Sync + 'static {
    /// Routing name, unique across event types
    fn name() -> &'static str;
}

/// Call routed to exactly one handler, producing a response.
pub trait Request: fmt::Debug + Send + Sync + 'static {
    type Response: Send + 'static;

    /// Routing name, unique across request types
    fn name() -> &'static str;
}
