//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate provides an async client for Asterisk's Manager Interface: it
//! logs in, keeps the connection alive, reconnects after network failures,
//! correlates every action with its response and event list, and fans out
//! unsolicited events to subscribers.
//!
//! # Architecture
//!
//! - [`AmiClient`] (Clone + Send + Sync): send actions from any task
//! - [`AmiEventStream`]: unsolicited events from the background reader
//! - [`StatusStream`]: [`ConnectionStatus`] transitions
//!
//! Each TCP connection is a *generation* with its own reader, writer and
//! keepalive tasks. When it dies, actions waiting on it fail with
//! [`AmiError::ConnectionClosed`] and a new generation is started after the
//! reconnect interval, unless the login was rejected or the session logged
//! off.
//!
//! # Examples
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{Action, AmiClient, AmiError, AmiSettings, ConnectionStatus, PeerEntry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let client = AmiClient::new(AmiSettings::new("127.0.0.1", 5038, "admin", "amp111"));
//!     let mut status = client.subscribe_status();
//!     let mut events = client.subscribe_events();
//!     client.connect().await?;
//!
//!     match status.recv().await {
//!         Some(Ok(ConnectionStatus::Connected)) => {}
//!         other => panic!("login failed: {:?}", other),
//!     }
//!
//!     let response = client.send(Action::new("SIPpeers")).await?.into_result()?;
//!     for peer in response.decode_events::<PeerEntry>("PeerEntry")? {
//!         println!("{} {}", peer.object_name, peer.status);
//!     }
//!
//!     while let Some(Ok(event)) = events.recv().await {
//!         println!("{}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! The crate never installs a global subscriber. Pass a [`tracing::Dispatch`]
//! with [`AmiClient::with_dispatch`], set [`AmiSettings::log_level`] for a
//! session-local formatter, or let the session inherit the dispatcher that is
//! current when it is created.

pub mod action;
pub mod config;
pub mod constants;
pub mod decode;
pub mod error;
pub mod event;
pub mod fields;
pub mod headers;
pub mod protocol;
pub mod session;

pub(crate) mod buffer;
pub(crate) mod bus;
pub(crate) mod correlator;
pub(crate) mod keepalive;
pub(crate) mod logging;
pub(crate) mod login;
pub(crate) mod transport;

pub use action::{Action, ActionResponse};
pub use bus::{AmiEventStream, StatusStream};
pub use config::AmiSettings;
pub use constants::DEFAULT_AMI_PORT;
pub use decode::{ContactEntry, FromFields, PeerEntry};
pub use error::{AmiError, AmiResult};
pub use event::AmiEvent;
pub use fields::Fields;
pub use headers::{FieldName, ParseFieldNameError};
pub use protocol::{AmiMessage, AmiParser, MessageKind};
pub use session::{AmiClient, ConnectionStatus};
pub use transport::LinkState;
