//! Anonymous one-to-one pairing and signaling relay server
//!
//! Clients connect over WebSocket, ask to be paired with a stranger, and once
//! paired exchange opaque WebRTC signaling data and chat messages through the
//! server. Either side can leave or skip to the next partner at any time.
//!
//! # Protocol
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": ...}`.
//!
//! ## Client → server
//!
//! - `{"event": "start-search"}` - Find a partner (optional `data: {"interests": [...]}`)
//! - `{"event": "next-partner"}` - Leave the current partner and search again
//! - `{"event": "leave"}` - Leave the current partner, or stop waiting
//! - `{"event": "signal", "data": {"sessionId": "<uuid>", "signal": ...}}`
//! - `{"event": "message", "data": {"sessionId": "<uuid>", "text": ...}}`
//!
//! ## Server → client
//!
//! - `{"event": "id-assigned", "data": "<uuid>"}` - Your connection id
//! - `{"event": "waiting"}` - No partner yet, you are in the queue
//! - `{"event": "session-started", "data": {"sessionId": "<uuid>", "isInitiator": bool}}`
//! - `{"event": "signal", "data": {"from": "<uuid>", "signal": ...}}`
//! - `{"event": "message", "data": {"from": "<uuid>", "text": ...}}`
//! - `{"event": "partner-left"}` - Your partner left the session
//! - `{"event": "searching-new-partner"}` - The session ended through `next-partner`
//! - `{"event": "presence-count", "data": 42}` - Sent to everyone when the online count changes
//! - `{"event": "error", "data": "..."}` - The last frame could not be understood
//!
//! The member that was already waiting when a pair forms gets
//! `isInitiator: false`; the member whose search found it gets `true` and is
//! expected to send the first offer.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! RUST_LOG=roulette_server=debug roulette-server --addr 127.0.0.1:5002
//!
//! # In two terminals
//! websocat ws://127.0.0.1:5002
//! {"event":"start-search"}
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod connections;
pub mod error;
pub mod handler;
pub mod janitor;
pub mod pool;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod sessions;
pub mod state;

pub use config::{PairingPolicy, ServerConfig};
pub use connections::{ConnectionTable, Connections};
pub use error::{ClientRequestError, ServerError};
pub use pool::SelectionPolicy;
pub use protocol::{ClientEvent, ConnectionId, Payload, Preferences, ServerEvent, SessionId};
pub use server::{ServerHandle, run, start};
pub use state::{ServerState, SweepReport};
