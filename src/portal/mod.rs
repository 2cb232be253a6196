//! Session-based booking portal plumbing: handshake, identifier probing, and
//! the HTML extraction collaborators both lean on.

pub mod parser;
pub mod scanner;
pub mod session;

pub use scanner::{CandidateTerm, TermScanner};
pub use session::{PortalConfig, PortalSession};
