//! Push-based stream driver over a callback-style realtime backend.
//!
//! Turns the listener registration API of an auth service and a
//! hierarchical live store (see `rtdb-api`) into async streams, and routes
//! a stream of outbound actions into name-tagged response streams:
//!
//! - **[`Driver`]**: Initializes one backend app per session id through a
//!   [`SessionRegistry`], then [`run()`](Driver::run) wires an action stream
//!   into a [`Source`]. [`shutdown()`](Driver::shutdown) stops the pumps and
//!   releases the session.
//!
//! - **[`Database`] / [`Reference`]**: Lazily built references into the
//!   live store. [`Reference::events`] and [`Reference::value`] hand out
//!   [`LiveStream`]s that register a backend listener on first subscription
//!   and remove it again when the last [`Subscription`] is dropped.
//!
//! - **[`AuthSource`]**: Auth state, ID token and deduplicated current
//!   user streams backed by one process-lifetime observer each, plus
//!   one-shot lookups (`providers_for_email`, `redirect_result`).
//!
//! - **Responses** ([`Action`], [`ActionHandler`], [`ResponseStream`]):
//!   Every action is handed to the handler as it arrives; results of named
//!   actions are merged into [`Source::responses`] queries.

pub mod auth;
pub mod config;
pub mod database;
pub mod driver;
pub mod error;
pub mod responses;
pub mod session;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{AuthSource, MaybeUser};
pub use config::{ConnectionConfig, DriverOptions, ListenerErrorPolicy};
pub use database::{Database, Reference};
pub use driver::{Driver, Source, make_driver};
pub use error::CoreError;
pub use responses::{Action, ActionHandler, ResponseStream, ResultStream};
pub use session::{App, SessionRegistry};
pub use stream::{LiveStream, Subscription};

// Backend types that appear in stream items.
pub use rtdb_api::{EventType, User, UserCredential};
