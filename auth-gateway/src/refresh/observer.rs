//! Notification hook for a session that can no longer be refreshed.

/// Invoked once each time a shared refresh terminally fails.
///
/// The gateway never redirects or touches persisted storage itself; wiring a
/// login redirect or a storage purge is the application's job.
pub trait SessionObserver: Send + Sync {
    fn session_expired(&self);
}

impl<F> SessionObserver for F
where
    F: Fn() + Send + Sync,
{
    fn session_expired(&self) {
        self()
    }
}
