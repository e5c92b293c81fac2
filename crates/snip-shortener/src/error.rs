use snip_core::{ShortCode, StorageError, ValidationError};
use snip_generator::GenerateError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] ValidationError),
    /// The owner already shortened this URL; `code` is the stored code.
    #[error("url already exists: {short_url}")]
    UrlExists { code: ShortCode, short_url: String },
    #[error("batch contains no urls")]
    EmptyBatch,
    #[error("unknown short code: {0}")]
    UnknownCode(ShortCode),
    #[error("short url is deleted: {0}")]
    Gone(ShortCode),
    #[error("no unused short code found after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<GenerateError> for ShortenerError {
    fn from(value: GenerateError) -> Self {
        match value {
            GenerateError::Exhausted { attempts } => Self::GenerationExhausted { attempts },
            GenerateError::Storage(err) => Self::Storage(err),
        }
    }
}
