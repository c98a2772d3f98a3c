//! Narrow interfaces to everything the router does not do itself.
//!
//! Collaborators are plain blocking traits. The async core calls them
//! through [`call_with_deadline`], which moves the call onto the blocking
//! pool and gives up once the deadline passes.

use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    collection::CollectionId,
    doc_id::DocumentId,
    error::{Collaborator, Error, Result},
    fusion::FusedResult,
};

// -- Search --

/// A ranked retrieval source: semantic (vector) or lexical (keyword).
pub trait Ranker: Send + Sync {
    /// Up to `k` document ids for `query`, best first.
    fn rank(
        &self,
        collection: &CollectionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<DocumentId>>;
}

// -- Entities --

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Customer,
    Project,
    Topic,
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

pub trait EntityExtractor: Send + Sync {
    fn extract(&self, document: &DocumentId) -> Result<BTreeSet<Entity>>;
}

// -- Filesystem --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsAction {
    List,
    Navigate,
    Tree,
    CreateDir,
    CreateFile,
    Move,
    Copy,
    Delete,
}

/// A filesystem operation on already validated, resolved paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsRequest {
    pub action: FsAction,
    pub path: PathBuf,
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOutcome {
    pub path: PathBuf,
    pub success: bool,
    pub detail: String,
}

pub trait FilesystemOps: Send + Sync {
    fn apply(&self, request: &FsRequest) -> Result<Vec<PathOutcome>>;
}

// -- Collections --

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub created_at: u64,
    pub document_count: Option<u64>,
}

pub trait CollectionManager: Send + Sync {
    fn create(&self, name: &str) -> Result<CollectionInfo>;
    fn list(&self) -> Result<Vec<CollectionInfo>>;
    fn switch(&self, name: &str) -> Result<CollectionId>;
    fn delete(&self, name: &str) -> Result<()>;
    fn info(&self, name: &str) -> Result<CollectionInfo>;
}

// -- Indexing --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRequest {
    pub collection: CollectionId,
    /// `None` when the user asked to index without naming anything.
    pub path: Option<PathBuf>,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexReport {
    Indexed {
        collection: String,
        path: PathBuf,
        documents: usize,
    },
    NeedsClarification {
        question: String,
    },
}

pub trait Indexer: Send + Sync {
    fn index(&self, request: &IndexRequest) -> Result<IndexReport>;
}

// -- Generation --

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GenerationMode {
    /// Greetings and thanks; no retrieval.
    SmallTalk,
    /// Questions about the assistant itself.
    SelfDescription { collection: String },
    /// Answer from the supplied context only.
    Grounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One message of an ongoing conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub query: String,
    pub mode: GenerationMode,
    pub context: Vec<FusedResult>,
    /// Earlier turns of the conversation, oldest first.
    pub history: Vec<Turn>,
}

pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Stand-in for a collaborator that is not configured in this process.
///
/// Every call fails with `CollaboratorUnavailable`, which lets the fuser
/// degrade to the sources that do exist.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured(pub Collaborator);

impl Unconfigured {
    fn refuse<T>(&self) -> Result<T> {
        Err(Error::unavailable(self.0, "not configured"))
    }
}

impl Ranker for Unconfigured {
    fn rank(
        &self,
        _collection: &CollectionId,
        _query: &str,
        _k: usize,
    ) -> Result<Vec<DocumentId>> {
        self.refuse()
    }
}

impl Generator for Unconfigured {
    fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        self.refuse()
    }
}

impl EntityExtractor for Unconfigured {
    fn extract(&self, _document: &DocumentId) -> Result<BTreeSet<Entity>> {
        self.refuse()
    }
}

/// Run a blocking collaborator call under a deadline.
///
/// On expiry the call is abandoned (the blocking thread finishes on its
/// own) and `CollaboratorUnavailable` is returned. Errors from the call
/// are attributed to `collaborator` via [`Error::from_collaborator`].
pub async fn call_with_deadline<T, F>(
    collaborator: Collaborator,
    deadline: Duration,
    call: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(call);

    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => {
            result.map_err(|e| e.from_collaborator(collaborator))
        }
        Ok(Err(join_error)) => Err(Error::unavailable(
            collaborator,
            format!("call aborted: {join_error}"),
        )),
        Err(_) => {
            warn!(%collaborator, ?deadline, "collaborator missed deadline");
            Err(Error::unavailable(
                collaborator,
                format!("no response within {}ms", deadline.as_millis()),
            ))
        }
    }
}
