use std::path::PathBuf;

use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

/// The external dependencies the router talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    SemanticSearch,
    LexicalSearch,
    EntityExtraction,
    Filesystem,
    CollectionManager,
    Indexer,
    Generator,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SemanticSearch => "semantic search",
            Self::LexicalSearch => "lexical search",
            Self::EntityExtraction => "entity extraction",
            Self::Filesystem => "filesystem",
            Self::CollectionManager => "collection manager",
            Self::Indexer => "indexer",
            Self::Generator => "generator",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not classify utterance: {utterance}")]
    ClassificationAmbiguous { utterance: String },

    #[error("refusing path that escapes its root: {path}")]
    PathTraversalRejected { path: String },

    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        reason: String,
    },

    #[error("collection '{name}' is protected and cannot be deleted")]
    ProtectedCollectionViolation { name: String },

    #[error("proposal {id} does not match its stored content")]
    ProposalMismatch { id: String },

    #[error("proposal {id} is {state}, cannot {action}")]
    InvalidProposalState {
        id: String,
        state: &'static str,
        action: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub fn unavailable(
        collaborator: Collaborator,
        reason: impl Into<String>,
    ) -> Self {
        Self::CollaboratorUnavailable {
            collaborator,
            reason: reason.into(),
        }
    }

    /// Refusals the router raises on its own. These are never retried.
    pub fn is_security_refusal(&self) -> bool {
        matches!(
            self,
            Self::PathTraversalRejected { .. }
                | Self::ProtectedCollectionViolation { .. }
        )
    }

    /// Whether repeating the same request later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CollaboratorUnavailable { .. })
    }

    /// Attribute a failure reported by a collaborator to that collaborator.
    ///
    /// Errors that already carry a domain meaning pass through unchanged;
    /// storage and I/O failures become `CollaboratorUnavailable`.
    pub fn from_collaborator(self, collaborator: Collaborator) -> Self {
        match self {
            Self::Io(_)
            | Self::Redb(_)
            | Self::RedbStorage(_)
            | Self::RedbTransaction(_)
            | Self::RedbTable(_)
            | Self::RedbCommit(_)
            | Self::Tantivy(_) => {
                Self::unavailable(collaborator, self.to_string())
            }
            other => other,
        }
    }
}
