//! The single entry point: utterance in, intent-tagged result out.
//!
//! The router extracts a path, classifies the utterance and hands the
//! intent to exactly one collaborator. It adds two refusals of its own:
//! paths that climb out of their root, and deletion of the default or
//! the currently active collection. Everything else a collaborator
//! returns is passed through unchanged.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    collaborators::{
        CollectionInfo,
        CollectionManager,
        EntityExtractor,
        FilesystemOps,
        FsAction,
        FsRequest,
        GenerationMode,
        GenerationRequest,
        Generator,
        IndexReport,
        IndexRequest,
        Indexer,
        PathOutcome,
        Ranker,
        Turn,
        call_with_deadline,
    },
    collection::{ActiveCollection, CollectionId, same_collection},
    config::Settings,
    config_db::ConfigDb,
    error::{Collaborator, Error, Result},
    fusion::{FusedResult, HybridFuser, RetrievalStrategy},
    health::{self, HealthReport},
    intent::{
        self,
        CollectionRequest,
        FilesystemCommand,
        FilesystemOperation,
        IndexCommand,
        Intent,
    },
    organizer::{
        ExecutionReport,
        OrganizationPlan,
        Organizer,
        ProposalState,
    },
    path_extract::{self, ExtractedPath},
    utterance::Utterance,
};

/// Everything the router delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub semantic: Arc<dyn Ranker>,
    pub lexical: Arc<dyn Ranker>,
    pub entities: Arc<dyn EntityExtractor>,
    pub filesystem: Arc<dyn FilesystemOps>,
    pub collections: Arc<dyn CollectionManager>,
    pub indexer: Arc<dyn Indexer>,
    pub generator: Arc<dyn Generator>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Anchors for home-relative and relative paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContext {
    pub home: PathBuf,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Routed {
    pub intent: Intent,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Small talk or self-description.
    Reply { text: String },
    /// A grounded answer and the fused results it was given.
    Answer {
        text: String,
        sources: Vec<FusedResult>,
    },
    Filesystem { outcomes: Vec<PathOutcome> },
    /// A stored plan awaiting confirmation. Nothing has moved yet.
    OrganizationPreview { plan: OrganizationPlan },
    Similar { results: Vec<FusedResult> },
    CollectionCreated { collection: CollectionInfo },
    Collections {
        collections: Vec<CollectionInfo>,
        active: CollectionId,
    },
    CollectionSwitched {
        previous: CollectionId,
        active: CollectionId,
    },
    CollectionDeleted { name: String },
    CollectionDetails { collection: CollectionInfo },
    Indexed { report: IndexReport },
}

pub struct Router {
    collaborators: Collaborators,
    fuser: HybridFuser,
    organizer: Organizer,
    settings: Settings,
    active: Arc<ActiveCollection>,
    paths: PathContext,
}

impl Router {
    pub fn new(
        collaborators: Collaborators,
        settings: Settings,
        active: Arc<ActiveCollection>,
        store: Arc<ConfigDb>,
        paths: PathContext,
    ) -> Self {
        let fuser = HybridFuser::new(
            Arc::clone(&collaborators.semantic),
            Arc::clone(&collaborators.lexical),
            settings.fusion_config(),
        );
        let organizer = Organizer::new(
            fuser.clone(),
            Arc::clone(&collaborators.entities),
            Arc::clone(&collaborators.filesystem),
            store,
            settings.min_score,
        );

        Self {
            collaborators,
            fuser,
            organizer,
            settings,
            active,
            paths,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn organizer(&self) -> &Organizer {
        &self.organizer
    }

    /// The collection requests are answered from right now.
    pub fn active_collection(&self) -> CollectionId {
        self.active.get()
    }

    /// Classify `text` and carry out the resulting intent.
    pub async fn route(&self, text: &str) -> Result<Routed> {
        self.converse(text, &[]).await
    }

    /// [`Router::route`] inside a conversation. Generated replies see the
    /// earlier turns.
    pub async fn converse(
        &self,
        text: &str,
        history: &[Turn],
    ) -> Result<Routed> {
        let utterance = Utterance::new(text);
        let path = path_extract::extract(utterance.raw());
        let intent = intent::classify(&utterance, path.as_ref())?;

        let outcome = match &intent {
            Intent::Greeting => Outcome::Reply {
                text: self
                    .generate(
                        utterance.text(),
                        GenerationMode::SmallTalk,
                        Vec::new(),
                        history,
                    )
                    .await?,
            },
            Intent::MetaQuestion => {
                let mode = GenerationMode::SelfDescription {
                    collection: self.active.get().to_string(),
                };
                Outcome::Reply {
                    text: self
                        .generate(utterance.text(), mode, Vec::new(), history)
                        .await?,
                }
            }
            Intent::FilesystemCommand(command) => {
                self.filesystem(command).await?
            }
            Intent::CollectionCommand(request) => {
                self.collection(request).await?
            }
            Intent::IndexCommand(command) => self.index(command).await?,
            Intent::ContentQuestion { query } => {
                self.answer(query, history).await?
            }
        };

        Ok(Routed { intent, outcome })
    }

    /// Fused retrieval over the active collection.
    pub async fn search(&self, query: &str) -> Result<Vec<FusedResult>> {
        self.search_top(query, self.settings.top_k).await
    }

    pub async fn search_top(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<FusedResult>> {
        self.search_with(query, top_k, self.settings.strategy).await
    }

    /// Retrieval with an explicit strategy, overriding the setting for
    /// this one query.
    pub async fn search_with(
        &self,
        query: &str,
        top_k: usize,
        strategy: RetrievalStrategy,
    ) -> Result<Vec<FusedResult>> {
        let collection = self.active.get();
        self.fuser
            .fuse_with(
                query,
                top_k,
                self.settings.min_score,
                &collection,
                strategy,
            )
            .await
    }

    /// Check the rankers and the collection manager.
    pub async fn health(&self) -> HealthReport {
        health::check(&self.collaborators, self.active.get(), &self.settings)
            .await
    }

    /// The explicit follow-up to an organization preview: confirm the
    /// stored plan and carry it out. A plan left `Confirmed` by an
    /// interrupted run is carried out without confirming again.
    pub async fn confirm_organization(
        &self,
        id: &str,
    ) -> Result<ExecutionReport> {
        if self.organizer.show(id)?.state == ProposalState::Proposed {
            self.organizer.confirm(id)?;
        }
        self.organizer.execute(id).await
    }

    async fn answer(
        &self,
        query: &str,
        history: &[Turn],
    ) -> Result<Outcome> {
        let sources = self.search(query).await?;
        let text = self
            .generate(
                query,
                GenerationMode::Grounded,
                sources.clone(),
                history,
            )
            .await?;
        Ok(Outcome::Answer { text, sources })
    }

    async fn filesystem(
        &self,
        command: &FilesystemCommand,
    ) -> Result<Outcome> {
        let path = self.guard(&command.path)?;
        let destination = command
            .destination
            .as_ref()
            .map(|d| self.guard(d))
            .transpose()?;

        let collection = self.active.get();
        let action = match command.operation {
            FilesystemOperation::Organize { mode } => {
                let plan = self
                    .organizer
                    .propose(&path, mode, destination.as_deref(), &collection)
                    .await?;
                return Ok(Outcome::OrganizationPreview { plan });
            }
            FilesystemOperation::FindSimilar => {
                let results = self
                    .organizer
                    .find_similar(&path, self.settings.top_k, &collection)
                    .await?;
                return Ok(Outcome::Similar { results });
            }
            FilesystemOperation::List => FsAction::List,
            FilesystemOperation::Navigate => FsAction::Navigate,
            FilesystemOperation::Tree => FsAction::Tree,
            FilesystemOperation::CreateDir => FsAction::CreateDir,
            FilesystemOperation::CreateFile => FsAction::CreateFile,
            FilesystemOperation::Move => FsAction::Move,
            FilesystemOperation::Copy => FsAction::Copy,
            FilesystemOperation::Delete => FsAction::Delete,
        };

        let request = FsRequest {
            action,
            path,
            destination,
        };
        let filesystem = Arc::clone(&self.collaborators.filesystem);
        let outcomes = call_with_deadline(
            Collaborator::Filesystem,
            self.settings.deadline,
            move || filesystem.apply(&request),
        )
        .await?;

        Ok(Outcome::Filesystem { outcomes })
    }

    /// Carry out a collection request, refusing to delete the default or
    /// the active collection.
    pub async fn collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<Outcome> {
        match request {
            CollectionRequest::Create { name } => {
                let name = name.clone();
                let collection =
                    self.with_collections(move |c| c.create(&name)).await?;
                Ok(Outcome::CollectionCreated { collection })
            }
            CollectionRequest::List => {
                let collections = self.with_collections(|c| c.list()).await?;
                Ok(Outcome::Collections {
                    collections,
                    active: self.active.get(),
                })
            }
            CollectionRequest::Switch { name } => {
                let name = name.clone();
                let active =
                    self.with_collections(move |c| c.switch(&name)).await?;
                let previous = self.active.switch(active.clone());
                info!(%previous, %active, "switched collection");
                Ok(Outcome::CollectionSwitched { previous, active })
            }
            CollectionRequest::Delete { name } => {
                self.refuse_protected(name)?;
                let target = name.clone();
                self.with_collections(move |c| c.delete(&target)).await?;
                Ok(Outcome::CollectionDeleted { name: name.clone() })
            }
            CollectionRequest::Info { name } => {
                let name = name.clone();
                let collection =
                    self.with_collections(move |c| c.info(&name)).await?;
                Ok(Outcome::CollectionDetails { collection })
            }
        }
    }

    async fn with_collections<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CollectionManager) -> Result<T> + Send + 'static,
    {
        let collections = Arc::clone(&self.collaborators.collections);
        call_with_deadline(
            Collaborator::CollectionManager,
            self.settings.deadline,
            move || call(collections.as_ref()),
        )
        .await
    }

    async fn index(&self, command: &IndexCommand) -> Result<Outcome> {
        let path = command.path.as_ref().map(|p| self.guard(p)).transpose()?;
        let report = self.index_path(path, command.recursive).await?;
        Ok(Outcome::Indexed { report })
    }

    /// Index an already resolved path into the active collection.
    pub async fn index_path(
        &self,
        path: Option<PathBuf>,
        recursive: bool,
    ) -> Result<IndexReport> {
        let request = IndexRequest {
            collection: self.active.get(),
            path,
            recursive,
        };

        let indexer = Arc::clone(&self.collaborators.indexer);
        call_with_deadline(
            Collaborator::Indexer,
            self.settings.deadline,
            move || indexer.index(&request),
        )
        .await
    }

    async fn generate(
        &self,
        query: &str,
        mode: GenerationMode,
        context: Vec<FusedResult>,
        history: &[Turn],
    ) -> Result<String> {
        let request = GenerationRequest {
            query: query.to_string(),
            mode,
            context,
            history: history.to_vec(),
        };
        let generator = Arc::clone(&self.collaborators.generator);
        call_with_deadline(
            Collaborator::Generator,
            self.settings.deadline,
            move || generator.generate(&request),
        )
        .await
    }

    /// Refuse traversal, then resolve against home and working directory.
    fn guard(&self, path: &ExtractedPath) -> Result<PathBuf> {
        if path.looks_like_traversal {
            warn!(path = %path.raw_text_span, "refused path traversal");
            return Err(Error::PathTraversalRejected {
                path: path.raw_text_span.clone(),
            });
        }
        Ok(path.resolve(&self.paths.home, &self.paths.working_dir))
    }

    fn refuse_protected(&self, name: &str) -> Result<()> {
        let active = self.active.get();
        let protected =
            [self.settings.default_collection.as_str(), active.as_str()];
        if protected.iter().any(|p| same_collection(p, name)) {
            warn!(collection = name, "refused to delete protected collection");
            return Err(Error::ProtectedCollectionViolation {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("settings", &self.settings)
            .field("active", &self.active)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

/// Home and working directory of the current process.
pub fn process_paths() -> Result<PathContext> {
    let working_dir = std::env::current_dir()?;
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("/").to_path_buf());
    Ok(PathContext { home, working_dir })
}
