use crate::kv::KvError;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Configuration,
    Group,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Configuration => f.write_str("configuration"),
            EntityKind::Group => f.write_str("configuration group"),
        }
    }
}

/// How an error should be surfaced to a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    NotFound,
    Conflict,
    Transport,
    Decode,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{kind} {name}/{version} not found")]
    NotFound {
        kind: EntityKind,
        name: String,
        version: String,
    },
    #[error("{kind} {name}/{version} already exists")]
    Conflict {
        kind: EntityKind,
        name: String,
        version: String,
    },
    #[error("{kind} {name}/{version} was modified concurrently, giving up after {attempts} attempts")]
    Contention {
        kind: EntityKind,
        name: String,
        version: String,
        attempts: usize,
    },
    #[error(transparent)]
    Transport(#[from] KvError),
    #[error("could not decode value at `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    BadInput(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict { .. } | StoreError::Contention { .. } => ErrorKind::Conflict,
            // The key was built from client input
            StoreError::Transport(KvError::InvalidKey(_)) => ErrorKind::BadInput,
            StoreError::Transport(_) => ErrorKind::Transport,
            StoreError::Decode { .. } => ErrorKind::Decode,
            // Encoding an in-memory entity cannot be caused by the client
            StoreError::Encode { .. } => ErrorKind::Decode,
            StoreError::BadInput(_) => ErrorKind::BadInput,
        }
    }

    pub(crate) fn not_found(kind: EntityKind, name: &str, version: &str) -> Self {
        StoreError::NotFound {
            kind,
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub(crate) fn conflict(kind: EntityKind, name: &str, version: &str) -> Self {
        StoreError::Conflict {
            kind,
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}
