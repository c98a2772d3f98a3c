//! Collaborator health, as reported by `docroute health`.

use std::{path::PathBuf, sync::Arc};

use serde::Serialize;

use crate::{
    collaborators::{CollectionInfo, Ranker, call_with_deadline},
    collection::CollectionId,
    config::Settings,
    data_dir::DataDirSource,
    error::{Collaborator, Error},
    fusion::RetrievalStrategy,
    router::Collaborators,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ready,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollaboratorHealth {
    pub collaborator: Collaborator,
    pub status: Status,
    pub detail: String,
}

/// Where the installation keeps its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageHealth {
    pub data_dir: PathBuf,
    pub source: DataDirSource,
    pub disk_usage_bytes: u64,
    pub stored_plans: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub active_collection: CollectionId,
    pub strategy: RetrievalStrategy,
    pub degrade_gracefully: bool,
    pub collaborators: Vec<CollaboratorHealth>,
    pub collections: Vec<CollectionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageHealth>,
}

impl HealthReport {
    pub fn status_of(&self, collaborator: Collaborator) -> Option<Status> {
        self.collaborators
            .iter()
            .find(|c| c.collaborator == collaborator)
            .map(|c| c.status)
    }

    /// Whether content questions can be answered with the current
    /// strategy and degrade setting.
    pub fn can_answer(&self) -> bool {
        let ready =
            |c| self.status_of(c).is_some_and(|s| s == Status::Ready);
        let semantic = ready(Collaborator::SemanticSearch);
        let lexical = ready(Collaborator::LexicalSearch);

        match self.strategy {
            RetrievalStrategy::HybridRrf => {
                (semantic && lexical)
                    || (self.degrade_gracefully && (semantic || lexical))
            }
            RetrievalStrategy::PureSemantic => semantic,
            RetrievalStrategy::PureFulltext => lexical,
        }
    }
}

/// Ask the rankers for one hit and list the collections, each under the
/// collaborator deadline.
pub async fn check(
    collaborators: &Collaborators,
    active: CollectionId,
    settings: &Settings,
) -> HealthReport {
    let mut health = vec![
        rank_once(
            Collaborator::SemanticSearch,
            &collaborators.semantic,
            &active,
            settings,
        )
        .await,
        rank_once(
            Collaborator::LexicalSearch,
            &collaborators.lexical,
            &active,
            settings,
        )
        .await,
    ];

    let manager = Arc::clone(&collaborators.collections);
    let collections = match call_with_deadline(
        Collaborator::CollectionManager,
        settings.deadline,
        move || manager.list(),
    )
    .await
    {
        Ok(collections) => {
            health.push(ready(
                Collaborator::CollectionManager,
                format!("{} collection(s)", collections.len()),
            ));
            collections
        }
        Err(e) => {
            health.push(unavailable(Collaborator::CollectionManager, &e));
            Vec::new()
        }
    };

    HealthReport {
        active_collection: active,
        strategy: settings.strategy,
        degrade_gracefully: settings.degrade_gracefully,
        collaborators: health,
        collections,
        storage: None,
    }
}

async fn rank_once(
    collaborator: Collaborator,
    ranker: &Arc<dyn Ranker>,
    collection: &CollectionId,
    settings: &Settings,
) -> CollaboratorHealth {
    let ranker = Arc::clone(ranker);
    let collection = collection.clone();
    let call = call_with_deadline(collaborator, settings.deadline, move || {
        ranker.rank(&collection, "health", 1)
    });

    match call.await {
        Ok(_) => ready(collaborator, "answered a query".to_string()),
        Err(e) => unavailable(collaborator, &e),
    }
}

fn ready(collaborator: Collaborator, detail: String) -> CollaboratorHealth {
    CollaboratorHealth {
        collaborator,
        status: Status::Ready,
        detail,
    }
}

fn unavailable(
    collaborator: Collaborator,
    error: &Error,
) -> CollaboratorHealth {
    CollaboratorHealth {
        collaborator,
        status: Status::Unavailable,
        detail: error.to_string(),
    }
}
