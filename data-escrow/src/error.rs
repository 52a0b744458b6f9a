use thiserror::Error;

use crate::{
    conditions::ConditionError, crypto::CryptoError, did::DidFormatError,
    document::DocumentError, encoding::EncodingError,
};

#[derive(Debug, Error)]
pub enum DataEscrowError {
    #[error(transparent)]
    Condition(#[from] ConditionError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    DidFormat(#[from] DidFormatError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}
