use thiserror::Error;

pub type KeeperResult<T> = Result<T, KeeperError>;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("config error: {0}")]
    Config(String),
}
