use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{collection::same_collection, error::Result};

/// Collection name to creation time (seconds since the Unix epoch).
const COLLECTIONS: TableDefinition<&str, u64> =
    TableDefinition::new("collections");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
/// Organization plan id to its JSON-encoded stored form.
const PROPOSALS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("proposals");

/// What [`ConfigDb::remove_inactive_collection`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionRemoval {
    Removed,
    Missing,
    /// Still active; left in place.
    Active,
}

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(COLLECTIONS)?;
        txn.open_table(SETTINGS)?;
        txn.open_table(PROPOSALS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Collections --

    pub fn set_collection(&self, name: &str, created_at: u64) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(COLLECTIONS)?;
            table.insert(name, created_at)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        Ok(table.get(name)?.map(|v| v.value()))
    }

    /// Register a collection unless one with the same name, ignoring
    /// case, already exists. Returns whether it was added.
    pub fn insert_collection(
        &self,
        name: &str,
        created_at: u64,
    ) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let inserted = {
            let mut table = txn.open_table(COLLECTIONS)?;
            let mut taken = false;
            for entry in table.iter()? {
                let (k, _v) = entry?;
                if same_collection(k.value(), name) {
                    taken = true;
                    break;
                }
            }
            if !taken {
                table.insert(name, created_at)?;
            }
            !taken
        };
        txn.commit()?;
        Ok(inserted)
    }

    /// Store `name` under the setting `key` if it is a registered
    /// collection. Returns whether it was.
    pub fn activate_collection(&self, key: &str, name: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let found = {
            let collections = txn.open_table(COLLECTIONS)?;
            let found = collections.get(name)?.is_some();
            if found {
                let mut settings = txn.open_table(SETTINGS)?;
                settings.insert(key, name)?;
            }
            found
        };
        txn.commit()?;
        Ok(found)
    }

    /// Remove a collection unless the setting `key` names it, checked and
    /// applied in one write transaction.
    pub fn remove_inactive_collection(
        &self,
        key: &str,
        name: &str,
    ) -> Result<CollectionRemoval> {
        let txn = self.db.begin_write()?;
        let removal = {
            let settings = txn.open_table(SETTINGS)?;
            let active = settings.get(key)?.map(|v| v.value().to_string());
            if active.is_some_and(|active| same_collection(&active, name)) {
                CollectionRemoval::Active
            } else {
                let mut collections = txn.open_table(COLLECTIONS)?;
                if collections.remove(name)?.is_some() {
                    CollectionRemoval::Removed
                } else {
                    CollectionRemoval::Missing
                }
            }
        };
        txn.commit()?;
        Ok(removal)
    }

    pub fn list_collections(&self) -> Result<Vec<(String, u64)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value()));
        }
        Ok(result)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    // -- Proposals --

    pub fn put_proposal(&self, id: &str, data: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PROPOSALS)?;
            table.insert(id, data)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Rewrite a stored proposal in one write transaction.
    ///
    /// `update` sees the current bytes and returns the replacement; when
    /// it fails, nothing is written. Returns `None` if `id` is unknown.
    pub fn update_proposal<F>(
        &self,
        id: &str,
        update: F,
    ) -> Result<Option<Vec<u8>>>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>>,
    {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(PROPOSALS)?;
            let current = table.get(id)?.map(|v| v.value().to_vec());
            match current {
                Some(current) => {
                    let next = update(&current)?;
                    table.insert(id, next.as_slice())?;
                    Some(next)
                }
                None => None,
            }
        };
        txn.commit()?;
        Ok(updated)
    }

    pub fn get_proposal(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PROPOSALS)?;
        Ok(table.get(id)?.map(|v| v.value().to_vec()))
    }

    pub fn list_proposal_ids(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PROPOSALS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _v) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
