//! # tether-client
//!
//! Client side of the realtime session: one authenticated persistent
//! connection, kept alive and recovered after failure, fanning typed
//! envelopes out to feature consumers.
//!
//! ```no_run
//! # async fn demo() -> Result<(), tether_client::SessionError> {
//! use tether_client::{RealtimeSession, SendOptions};
//! use tether_core::MessageType;
//!
//! let session = RealtimeSession::new(tether_settings::TetherSettings::default());
//! session.set_credentials("bearer-token", "user-1")?;
//! session.connect().await?;
//! let _sub = session.subscribe(MessageType::NewMatch, |env| println!("{env:?}"));
//! let _receipt = session.send(
//!     MessageType::Message,
//!     serde_json::json!({"text": "hi"}),
//!     SendOptions::default(),
//! )?;
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod heartbeat;
pub mod manager;
pub mod pending;
pub mod queue;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod transport;

pub use errors::{ResponseError, SessionError, TransportError};
pub use health::{ConnectionQuality, HealthReport, HealthSample, compute_score};
pub use manager::Credentials;
pub use pending::{PendingResponse, SendOptions};
pub use router::{Handler, Router, Subscription};
pub use scheduler::{Scheduler, TaskGroup, TaskHandle, TaskId};
pub use session::{RealtimeSession, SendReceipt, SessionHandle};
pub use state::{ConnectionState, SessionStatus};
