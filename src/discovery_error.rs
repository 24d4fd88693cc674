use crate::communication::{router::RouterError, transports::TransportError};

#[derive(Debug, Clone)]
pub enum DiscoveryError {
    Router(RouterError),
    Transport(TransportError),
    /// Rejected configuration value.
    Config(String),
    /// A peer or the data source went away before the run finished.
    Shutdown(String),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::Router(e) => write!(f, "Router error: {}", e),
            DiscoveryError::Transport(e) => write!(f, "Transport error: {}", e),
            DiscoveryError::Config(e) => write!(f, "Config error: {}", e),
            DiscoveryError::Shutdown(e) => write!(f, "Shutdown: {}", e),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<RouterError> for DiscoveryError {
    fn from(e: RouterError) -> Self {
        DiscoveryError::Router(e)
    }
}

impl From<TransportError> for DiscoveryError {
    fn from(e: TransportError) -> Self {
        DiscoveryError::Transport(e)
    }
}
