//! The collaborators that ship with docroute, opened from a data
//! directory and wired into a [`Router`].

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    collaborators::Unconfigured,
    collection::{ActiveCollection, CollectionCatalog},
    config::Settings,
    config_db::ConfigDb,
    data_dir::DataDir,
    entities::PatternEntityExtractor,
    error::{Collaborator, Result},
    health::{HealthReport, StorageHealth},
    ingestion::LocalIndexer,
    local_fs::LocalFilesystem,
    responder::LocalResponder,
    router::{Collaborators, PathContext, Router},
    tantivy_index::SearchIndex,
};

pub struct LocalServices {
    pub data_dir: DataDir,
    pub config_db: Arc<ConfigDb>,
    pub search_index: Arc<SearchIndex>,
    pub catalog: Arc<CollectionCatalog>,
    pub settings: Settings,
}

impl LocalServices {
    /// Open the config database and search index under `data_dir` and
    /// resolve settings from both.
    pub fn open(data_dir: DataDir) -> Result<Self> {
        let config_db = Arc::new(ConfigDb::open(&data_dir.store_path())?);
        let settings = Settings::resolve(&config_db)?;
        let search_index =
            Arc::new(SearchIndex::open(&data_dir.lexical_index_dir()?)?);
        let catalog = Arc::new(CollectionCatalog::open(
            Arc::clone(&config_db),
            Arc::clone(&search_index),
            &settings.default_collection,
        )?);

        debug!(data_dir = %data_dir.root().display(), "opened data directory");
        Ok(Self {
            data_dir,
            config_db,
            search_index,
            catalog,
            settings,
        })
    }

    /// The local collaborators. There is no local semantic ranker.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            semantic: Arc::new(Unconfigured(Collaborator::SemanticSearch)),
            lexical: self.search_index.clone(),
            entities: Arc::new(PatternEntityExtractor),
            filesystem: Arc::new(LocalFilesystem),
            collections: self.catalog.clone(),
            indexer: Arc::new(LocalIndexer::new(Arc::clone(
                &self.search_index,
            ))),
            generator: Arc::new(LocalResponder),
        }
    }

    /// A router answering from the persisted active collection.
    pub fn router(&self, paths: PathContext) -> Result<Router> {
        if !self.settings.degrade_gracefully {
            warn!(
                "no semantic ranker is configured; content questions fail \
                 unless degrade_gracefully is set"
            );
        }

        let active = Arc::new(ActiveCollection::new(self.catalog.active()?));
        Ok(Router::new(
            self.collaborators(),
            self.settings.clone(),
            active,
            Arc::clone(&self.config_db),
            paths,
        ))
    }
}

impl LocalServices {
    /// The router's collaborator health plus where state is kept.
    pub async fn health(&self, router: &Router) -> Result<HealthReport> {
        let mut report = router.health().await;
        report.storage = Some(StorageHealth {
            data_dir: self.data_dir.root().to_path_buf(),
            source: self.data_dir.source(),
            disk_usage_bytes: self.data_dir.disk_usage(),
            stored_plans: self.config_db.list_proposal_ids()?.len(),
        });
        Ok(report)
    }
}

impl std::fmt::Debug for LocalServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalServices")
            .field("data_dir", &self.data_dir)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
