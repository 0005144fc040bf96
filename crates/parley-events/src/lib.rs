#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! In-process publish/subscribe core for Parley.
//!
//! Publishers call [`EventBus::publish`] with a [`Topic`]; every listener
//! registered for that topic is notified synchronously. Long-lived consumers
//! open a [`Subscription`], which registers one listener for its whole lifetime
//! and exposes the topic as an ordered, pull-driven sequence ending at close.
//! A [`SessionHub`] tracks open subscriptions so shutdown can close them all.
//!
//! Layout: `topics.rs` (topic keys), `payloads.rs` (event payloads), `bus.rs`
//! (listener registry), `session.rs` (subscription sessions), `hub.rs` (session
//! tracking), `error.rs` (error types).

pub mod bus;
pub mod error;
pub mod hub;
pub mod payloads;
pub mod session;
pub mod topics;

pub use bus::{Delivery, EventBus, Listener, ListenerId, SubscriptionHandle};
pub use error::{ListenerError, SessionError, SessionResult};
pub use hub::SessionHub;
pub use payloads::Message;
pub use session::{SessionConfig, SessionId, Subscription};
pub use topics::{CHANNEL_TOPIC_PREFIX, Topic};
