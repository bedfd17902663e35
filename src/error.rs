//! Error taxonomy for media acquisition and the user-facing outcomes it maps to.

use thiserror::Error;

use crate::state_store::StoreError;

/// Whether an upstream failure is still being retried or has been given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailureKind {
    Transient,
    Permanent,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid filter value: {0}")]
    Validation(String),
    #[error("upstream request failed ({kind:?}): {message}")]
    Upstream {
        kind: UpstreamFailureKind,
        message: String,
    },
    #[error("nothing found: {0}")]
    NotFound(String),
    #[error("unknown species: {0}")]
    UnknownSpecies(String),
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no valid {0} found")]
    NoValidMedia(String),
    #[error("no {0} found")]
    NoMedia(String),
    #[error("filter integer {0} is out of range")]
    OutOfRange(i64),
    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("invalid asset code")]
    InvalidAssetCode,
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Human-readable results a chat or web caller can show for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    InvalidFilters,
    BirdNotFound,
    NoMediaForFilters,
    NoValidMedia,
    NetworkError,
    FileTooLarge,
    InternalError,
}

impl UserOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidFilters => "Invalid filters. Check the filter list and try again.",
            Self::BirdNotFound => "That bird could not be found.",
            Self::NoMediaForFilters => {
                "This combination of filters has no valid media for the current bird."
            }
            Self::NoValidMedia => "Media was found, but none of it can be sent right now.",
            Self::NetworkError => "A network error has occurred. Please try again later.",
            Self::FileTooLarge => "Oops! File too large. Please try again.",
            Self::InternalError => "An error has occurred while fetching media.",
        }
    }
}

impl MediaError {
    pub fn upstream_permanent(message: impl Into<String>) -> Self {
        Self::Upstream {
            kind: UpstreamFailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn upstream_transient(message: impl Into<String>) -> Self {
        Self::Upstream {
            kind: UpstreamFailureKind::Transient,
            message: message.into(),
        }
    }

    /// True for failures worth retrying the same request for.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Upstream {
                kind: UpstreamFailureKind::Transient,
                ..
            }
        )
    }

    pub fn outcome(&self) -> UserOutcome {
        match self {
            Self::Validation(_) | Self::OutOfRange(_) => UserOutcome::InvalidFilters,
            Self::UnknownSpecies(_) => UserOutcome::BirdNotFound,
            Self::NotFound(_) | Self::NoMedia(_) => UserOutcome::NoMediaForFilters,
            Self::NoValidMedia(_) => UserOutcome::NoValidMedia,
            Self::Upstream { .. } | Self::Transport(_) => UserOutcome::NetworkError,
            Self::FileTooLarge { .. } => UserOutcome::FileTooLarge,
            Self::UnsupportedContentType(_)
            | Self::InvalidAssetCode
            | Self::Storage(_)
            | Self::Io(_) => UserOutcome::InternalError,
        }
    }
}
