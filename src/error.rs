use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// Telegram или API метаданных: транспорт либо не-2xx.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("invalid callback token: {0:?}")]
    InvalidToken(String),

    #[error("item {id} is not a movie")]
    TypeMismatch { id: u64 },

    #[error("item {id} is stored in chat {expected}, got {got}")]
    ChatMismatch { id: u64, expected: i64, got: i64 },

    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// Ошибки, после которых хватает тихого ответа, без warn в логе.
    pub fn is_absorbed(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidToken(_)
                | Error::TypeMismatch { .. }
                | Error::ChatMismatch { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Upstream(e.to_string())
    }
}

impl From<teloxide::RequestError> for Error {
    fn from(e: teloxide::RequestError) -> Self {
        Error::Upstream(e.to_string())
    }
}
