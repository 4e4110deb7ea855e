use std::error::Error as StdError;

#[derive(thiserror::Error, Debug)]
pub enum BastionError {
    #[error("not found")]
    NotFound,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("ssh: {0}")]
    Ssh(String),

    #[error("{0}")]
    Other(Box<dyn StdError + Send + Sync>),
}

impl BastionError {
    pub fn other<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

pub type BastionResult<T> = Result<T, BastionError>;
