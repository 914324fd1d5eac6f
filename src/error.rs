use serde::Serialize;
use std::io;
use thiserror::Error;

/// Everything that can go wrong while embedding regions into one file.
///
/// Every variant is scoped to a single photo: the batch runner records it in
/// that photo's report and moves on.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("malformed JPEG stream: {0}")]
    MalformedStream(String),

    #[error("no image data marker found before end of stream")]
    MissingImageBoundary,

    #[error("more than one XMP segment (second one at offset {offset})")]
    DuplicateMetadata { offset: u64 },

    #[error("extended XMP segment at offset {offset} is not supported")]
    UnsupportedExtendedMetadata { offset: u64 },

    #[error("existing XMP does not match the region schema: {0}")]
    SchemaMismatch(String),

    #[error("failed to encode region metadata: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse error category reported per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    MalformedStream,
    MissingImageBoundary,
    DuplicateMetadata,
    UnsupportedExtendedMetadata,
    SchemaMismatch,
    EncodingError,
    IoError,
}

impl EmbedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedStream(_) => ErrorKind::MalformedStream,
            Self::MissingImageBoundary => ErrorKind::MissingImageBoundary,
            Self::DuplicateMetadata { .. } => ErrorKind::DuplicateMetadata,
            Self::UnsupportedExtendedMetadata { .. } => ErrorKind::UnsupportedExtendedMetadata,
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::Encoding(_) => ErrorKind::EncodingError,
            Self::Io(_) => ErrorKind::IoError,
        }
    }
}

pub type Result<T> = std::result::Result<T, EmbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_every_variant() {
        assert_eq!(EmbedError::MissingImageBoundary.kind(), ErrorKind::MissingImageBoundary);
        assert_eq!(
            EmbedError::DuplicateMetadata { offset: 20 }.kind(),
            ErrorKind::DuplicateMetadata
        );
        assert_eq!(
            EmbedError::Io(io::Error::other("disk full")).kind(),
            ErrorKind::IoError
        );
        assert_eq!(EmbedError::Encoding("nan".into()).kind(), ErrorKind::EncodingError);
    }

    #[test]
    fn messages_carry_offsets() {
        let err = EmbedError::UnsupportedExtendedMetadata { offset: 1234 };
        assert!(err.to_string().contains("1234"));
    }
}
