//! Knowledge collections: the shared "which collection am I talking to"
//! handle and the local catalog of collections.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use tracing::info;

use crate::{
    collaborators::{CollectionInfo, CollectionManager},
    config_db::{CollectionRemoval, ConfigDb},
    error::{Error, Result},
    tantivy_index::SearchIndex,
};

/// Settings key holding the persisted active collection.
pub const ACTIVE_COLLECTION_KEY: &str = "active_collection";

/// Name of a knowledge collection. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CollectionId(Arc<str>);

impl CollectionId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether two collection names refer to the same collection. Names are
/// compared without regard to case everywhere a collection is looked up
/// for protection or uniqueness.
pub fn same_collection(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// The collection requests are currently answered from.
///
/// Readers take a snapshot with [`get`](Self::get); a switch replaces the
/// whole value, so a request that already holds a snapshot keeps seeing
/// the collection it started with.
#[derive(Debug)]
pub struct ActiveCollection {
    current: RwLock<CollectionId>,
}

impl ActiveCollection {
    pub fn new(initial: CollectionId) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn get(&self) -> CollectionId {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the active collection, returning the previous one.
    pub fn switch(&self, next: CollectionId) -> CollectionId {
        let mut guard =
            self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }
}

/// Collections stored in the config database, with their lexical
/// documents in the local search index.
pub struct CollectionCatalog {
    config_db: Arc<ConfigDb>,
    search_index: Arc<SearchIndex>,
    default_collection: String,
}

impl CollectionCatalog {
    /// Open the catalog, registering the default collection if missing.
    pub fn open(
        config_db: Arc<ConfigDb>,
        search_index: Arc<SearchIndex>,
        default_collection: &str,
    ) -> Result<Self> {
        if config_db.get_collection(default_collection)?.is_none() {
            config_db.set_collection(default_collection, now_secs())?;
        }

        Ok(Self {
            config_db,
            search_index,
            default_collection: default_collection.to_string(),
        })
    }

    /// The persisted active collection, falling back to the default.
    pub fn active(&self) -> Result<CollectionId> {
        let name = self
            .config_db
            .get_setting_or(ACTIVE_COLLECTION_KEY, &self.default_collection)?;
        Ok(CollectionId::new(name))
    }

    fn info_for(&self, name: &str, created_at: u64) -> Result<CollectionInfo> {
        Ok(CollectionInfo {
            name: name.to_string(),
            created_at,
            document_count: Some(self.search_index.count_in_collection(name)?),
        })
    }

    fn require(&self, name: &str) -> Result<u64> {
        self.config_db
            .get_collection(name)?
            .ok_or_else(|| Error::NotFound {
                kind: "collection",
                name: name.to_string(),
            })
    }
}

impl CollectionManager for CollectionCatalog {
    fn create(&self, name: &str) -> Result<CollectionInfo> {
        validate_name(name)?;

        let created_at = now_secs();
        if !self.config_db.insert_collection(name, created_at)? {
            return Err(Error::Config(format!(
                "collection '{name}' already exists"
            )));
        }
        info!(collection = name, "created collection");
        self.info_for(name, created_at)
    }

    fn list(&self) -> Result<Vec<CollectionInfo>> {
        self.config_db
            .list_collections()?
            .into_iter()
            .map(|(name, created_at)| self.info_for(&name, created_at))
            .collect()
    }

    fn switch(&self, name: &str) -> Result<CollectionId> {
        if !self
            .config_db
            .activate_collection(ACTIVE_COLLECTION_KEY, name)?
        {
            return Err(Error::NotFound {
                kind: "collection",
                name: name.to_string(),
            });
        }
        Ok(CollectionId::new(name))
    }

    /// Delete a collection and its lexical documents. The default
    /// collection and the persisted active one are refused.
    fn delete(&self, name: &str) -> Result<()> {
        if same_collection(name, &self.default_collection) {
            return Err(Error::ProtectedCollectionViolation {
                name: name.to_string(),
            });
        }

        match self
            .config_db
            .remove_inactive_collection(ACTIVE_COLLECTION_KEY, name)?
        {
            CollectionRemoval::Removed => {}
            CollectionRemoval::Active => {
                return Err(Error::ProtectedCollectionViolation {
                    name: name.to_string(),
                });
            }
            CollectionRemoval::Missing => {
                return Err(Error::NotFound {
                    kind: "collection",
                    name: name.to_string(),
                });
            }
        }

        let mut writer = self.search_index.writer(15_000_000)?;
        self.search_index.delete_collection(&writer, name);
        writer.commit()?;

        info!(collection = name, "deleted collection");
        Ok(())
    }

    fn info(&self, name: &str) -> Result<CollectionInfo> {
        let created_at = self.require(name)?;
        self.info_for(name, created_at)
    }
}

impl std::fmt::Debug for CollectionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCatalog")
            .field("default_collection", &self.default_collection)
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid collection name '{name}': use letters, digits, '-', '_' or '.'"
        )))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
