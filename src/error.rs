use thiserror::Error;

/// Failure kinds the watch scheduler distinguishes. Everything here is scoped
/// to one source for one cycle; nothing aborts the process.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Network or HTTP failure talking to a source.
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// Portal handshake step returned an unexpected status or was missing an
    /// expected form/field. Not retried within the cycle.
    #[error("portal session: {0}")]
    Session(String),
}
