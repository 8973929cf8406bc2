use thiserror::Error;

/// Startup failures. Each one ends the relay; I/O errors after startup are
/// retried inside the loops and never surface as a `RelayError`.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid vehicle id {id:?}: {reason}")]
    InvalidVehicleId { id: String, reason: &'static str },

    #[error("local transport {dev} unavailable: {source}")]
    LocalTransport {
        dev: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote endpoint {endpoint} unusable: {source}")]
    Remote {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}
