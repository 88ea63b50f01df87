//! Error types shared across Kandalf crates

/// Failure to discover a local address to bind to
#[derive(thiserror::Error, Debug)]
pub enum ResolutionError {
    #[error("unable to enumerate network interfaces: {0}")]
    Enumerate(#[source] std::io::Error),

    #[error("unable to find local address to bind")]
    NoAddress,
}
