pub mod bit_set;
pub mod clock;
pub mod communication;
pub mod data_source;
pub mod dictionary;
pub mod difference_sets;
pub mod discovery_error;
pub mod membership;
pub mod oracle;
pub mod peer;
pub mod tables;
pub mod uuid_bytes;

pub use data_source::{DataSourceConfig, DiscoveryReport};
pub use discovery_error::DiscoveryError;
pub use membership::{ClusterConfig, LocalCluster, discover};

#[cfg(test)]
pub mod tests;
