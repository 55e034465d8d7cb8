//! Client-side realtime layer of Skill Circle.
//!
//! See [`realtime::RealtimeManager`] for the entry point.

pub mod config;
pub mod credentials;
pub mod error;
pub mod realtime;
pub mod stomp;
pub mod thread;
pub mod transport;

pub use config::{Config, CredentialConfig, RealtimeConfig};
pub use credentials::{HttpTokenSource, StaticToken, TokenSource};
pub use error::RealtimeError;
pub use realtime::{ConnectionState, RealtimeEvent, RealtimeManager, Subscription};
pub use thread::MergedThread;
