//! HTTP surface for the pty registry
//!
//! REST control routes, a server-sent event stream and a websocket per pty,
//! all backed by one [`ptymux_terminal::PtyRegistry`].

mod error;
pub mod protocol;
pub mod routes;
pub mod server;

pub use error::AppError;
pub use protocol::{EventEncoder, Utf8Decoder, WireEvent};
pub use routes::{create_router, AppState};
pub use server::{WebServer, WebServerConfig};
