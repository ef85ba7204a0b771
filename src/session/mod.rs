pub mod proxy;
pub mod session;
pub mod watchdog;

pub use proxy::SessionProxy;
pub use session::Session;
pub use watchdog::{SessionWatchdog, SessionWatchdogContext, WatchdogConfig};

use crate::transport::ResponseAttributes;
use std::sync::Arc;

/// Seam between session lifecycle code and the sending pipeline.
///
/// Proxies create and finish split sessions without knowing anything about
/// the transport behind the sending context; the context implements this
/// trait and owns the open/finished queues.
pub trait SessionRegistry: Send + Sync {
    /// Registers a newly started session with the open-session queue.
    fn start_session(&self, session: Arc<Session>);

    /// Moves a session from the open queue to the finished queue.
    fn finish_session(&self, session: Arc<Session>);

    /// Current server-directed settings, for split thresholds.
    fn current_attributes(&self) -> ResponseAttributes;
}
