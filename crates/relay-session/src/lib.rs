//! Resilience layer over a long-lived messaging connection.
//!
//! - [`supervisor::Supervisor`] owns the single current [`session::SessionHandle`],
//!   keeps it alive with presence pings and re-establishes it when it closes.
//! - [`sender::ResilientSender`] delivers one message within a deadline and
//!   retries exactly once after a timeout, nudging the supervisor in between.
//!
//! The protocol client itself sits behind the [`client::Connector`] and
//! [`client::MessagingClient`] traits.

pub mod backoff;
pub mod client;
pub mod errors;
pub mod operator;
pub mod sender;
pub mod session;
pub mod supervisor;

pub mod mock;

pub use client::{
    AuthenticatedUser, ClientEvent, Connection, Connector, LifecycleEvent, MessageContent,
    MessageReceipt, MessagingClient, Presence,
};
pub use errors::SessionError;
pub use operator::{ConsolePrompt, OperatorPrompt};
pub use sender::{ResilientSender, SendPolicy, SessionSource};
pub use session::{ConnectionState, SessionHandle};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorState, SupervisorTask};
