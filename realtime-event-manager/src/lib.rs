//! # Realtime Event Manager
//!
//! A blocking facade over `realtime-stream` for code that does not run an
//! async runtime: background jobs, CLI tools, synchronous services.
//!
//! ## Overview
//!
//! All async work runs on a dedicated worker thread with its own tokio
//! runtime. Subscriptions are consumed as blocking iterators:
//!
//! ```rust,ignore
//! use realtime_event_manager::RealtimeEventManager;
//! use realtime_stream::SubscriptionFilter;
//!
//! let manager = RealtimeEventManager::new(provider)?;
//! let leads = manager.subscribe("lead-board", SubscriptionFilter::table("leads"))?;
//!
//! for event in leads.try_iter() {
//!     println!("{} on {}", event.event_type, event.table);
//! }
//!
//! manager.cleanup()?;
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Subscribe**: each subscription gets its own [`EventStream`]
//! 2. **Consume**: iterate, `recv_timeout` or `try_iter`
//! 3. **Release**: dropping the stream unsubscribes; the channel closes
//!    once the last subscription is gone

pub mod error;
pub mod iter;
pub mod manager;
mod worker;

pub use error::{EventManagerError, Result};
pub use iter::{EventStream, StateStream};
pub use manager::RealtimeEventManager;

pub use realtime_stream::{
    ChangeEvent, ChangeType, ConnectionState, ConnectionStatus, EventFilter, HealthStatus,
    ManagerConfig, SubscriptionFilter,
};

/// Prelude module for convenient imports
///
/// ```rust
/// use realtime_event_manager::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ChangeEvent, ChangeType, ConnectionStatus, EventFilter, EventManagerError, EventStream,
        RealtimeEventManager, Result, StateStream, SubscriptionFilter,
    };
}
