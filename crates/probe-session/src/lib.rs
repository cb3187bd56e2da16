//! probe-session: the sliding analyzer (C4), the per-connection session
//! controller and capture task (C7), and the TLS WebSocket transport.

pub mod analyzer;
pub mod capture;
pub mod error;
pub mod server;
pub mod session;

pub use analyzer::SlidingAnalyzer;
pub use error::{SessionError, SessionResult};
pub use session::SessionController;
