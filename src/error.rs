use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::CoherencyError;
use crate::server::ServerError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Crate-level convenience error: a thin wrapper over the capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Coherency(#[from] CoherencyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Server(#[from] ServerError),
}
