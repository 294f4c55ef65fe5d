use thiserror::Error;

use crate::accrual::WorkerError;
use crate::db::RepoError;

/// Startup and serving failures of the server process
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Store unavailable: {0}")]
    Store(#[from] RepoError),

    #[error("Reconciliation worker: {0}")]
    Worker(#[from] WorkerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
