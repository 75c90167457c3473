use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Device identity already registered: {0}")]
    IdentityConflict(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
