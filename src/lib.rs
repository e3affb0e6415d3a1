//! A FIX 4.2 session engine: wire framing, a tag=value codec, durable
//! sequence and message stores, and a single session state machine that
//! drives Logon/Heartbeat/TestRequest/ResendRequest/SequenceReset/Logout
//! and application message flow over an already-connected transport.
//!
//! This crate owns no socket accept/dial loop, no reconnect policy, and no
//! data dictionary beyond the standard header and a small repeating-group
//! table — see [`SessionConfig`] for the extension point. Connect the
//! transport, then hand it to [`Session::new`].
#![warn(rustdoc::broken_intra_doc_links)]
#![deny(warnings)]

pub mod admin;
pub mod codec;
pub mod config;
pub mod error;
pub mod framer;
pub mod identity;
pub mod replay;
pub mod session;
pub mod store;

pub use codec::{GroupDictionary, Message};
pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::{FixError, Result};
pub use identity::SessionIdentity;
pub use session::{Role, Session, SessionEvent, SessionEvents, SessionState, TerminalReason};
pub use store::{FileMessageStore, MessageStore, SequenceState, SequenceStore, StorageConfig};
