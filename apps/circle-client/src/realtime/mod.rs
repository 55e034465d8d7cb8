//! Realtime connection manager.
//!
//! [`RealtimeManager`] keeps one STOMP connection alive for the signed-in
//! session. It multiplexes the private notification feed and per-conversation
//! chat topics over it, keeps the inbox and unread counters, and surfaces
//! toasts through a [`Notifier`].

mod connection;
pub mod events;
pub mod inbox;
pub mod manager;
pub mod registry;
mod shared;
pub mod state;
pub mod toast;

pub use events::{EventHub, RealtimeEvent};
pub use inbox::{Delivery, Inbox};
pub use manager::{RealtimeManager, Subscription};
pub use registry::{MessageCallback, SubscriptionEntry, SubscriptionRegistry};
pub use state::ConnectionState;
pub use toast::{LogNotifier, Notifier, Route, Toast, ToastAction, ToastLevel};
