//! On-disk layout of a docroute installation.
//!
//! ```text
//! <root>/
//!   docroute.redb   collections, settings and organization plans
//!   lexical/        the tantivy index; every document carries its collection
//! ```

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::error::{Error, Result};

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "DOCROUTE_DATA_DIR";

const STORE_FILE: &str = "docroute.redb";
const LEXICAL_DIR: &str = "lexical";

/// Where the data directory location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDirSource {
    /// `--data-dir`
    Flag,
    Environment,
    Xdg,
}

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: DataDirSource,
}

impl DataDir {
    /// Locate and create the data directory: `--data-dir`, then
    /// `DOCROUTE_DATA_DIR`, then `$XDG_DATA_HOME/docroute`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve_from(explicit, std::env::var_os(DATA_DIR_ENV), || {
            xdg::BaseDirectories::with_prefix("docroute").get_data_home()
        })
    }

    fn resolve_from(
        explicit: Option<&Path>,
        env: Option<OsString>,
        xdg_home: impl FnOnce() -> Option<PathBuf>,
    ) -> Result<Self> {
        let (root, source) = match (explicit, env) {
            (Some(path), _) => (path.to_path_buf(), DataDirSource::Flag),
            (None, Some(value)) if !value.is_empty() => {
                (PathBuf::from(value), DataDirSource::Environment)
            }
            _ => {
                let home = xdg_home().ok_or_else(|| {
                    Error::Config(format!(
                        "no data directory: pass --data-dir or set \
                         {DATA_DIR_ENV}"
                    ))
                })?;
                (home, DataDirSource::Xdg)
            }
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> DataDirSource {
        self.source
    }

    /// The redb store for collections, settings and organization plans.
    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    pub fn lexical_index_dir(&self) -> Result<PathBuf> {
        let path = self.root.join(LEXICAL_DIR);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }

    /// Bytes used by the store and the lexical index.
    pub fn disk_usage(&self) -> u64 {
        let store = std::fs::metadata(self.store_path())
            .map(|m| m.len())
            .unwrap_or(0);
        store + dir_size(&self.root.join(LEXICAL_DIR))
    }
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let metadata = e.metadata().ok()?;
            Some(if metadata.is_dir() {
                dir_size(&e.path())
            } else {
                metadata.len()
            })
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_xdg() -> Option<PathBuf> {
        None
    }

    #[test]
    fn flag_wins_over_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let flag = tmp.path().join("flag");
        let dir = DataDir::resolve_from(
            Some(&flag),
            Some(tmp.path().join("env").into_os_string()),
            no_xdg,
        )
        .unwrap();

        assert_eq!(dir.root(), flag);
        assert_eq!(dir.source(), DataDirSource::Flag);
        assert_eq!(dir.store_path(), flag.join("docroute.redb"));
    }

    #[test]
    fn environment_then_xdg() {
        let tmp = tempfile::tempdir().unwrap();
        let env = tmp.path().join("env");
        let dir = DataDir::resolve_from(
            None,
            Some(env.clone().into_os_string()),
            no_xdg,
        )
        .unwrap();
        assert_eq!(dir.root(), env);
        assert_eq!(dir.source(), DataDirSource::Environment);

        let xdg = tmp.path().join("xdg/docroute");
        let dir = DataDir::resolve_from(None, Some(OsString::new()), || {
            Some(xdg.clone())
        })
        .unwrap();
        assert_eq!(dir.root(), xdg);
        assert_eq!(dir.source(), DataDirSource::Xdg);
        assert!(xdg.is_dir());
    }

    #[test]
    fn nowhere_to_go_is_a_config_error() {
        assert!(matches!(
            DataDir::resolve_from(None, None, no_xdg),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn disk_usage_counts_store_and_index() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();
        assert_eq!(dir.disk_usage(), 0);

        std::fs::write(dir.store_path(), [0u8; 10]).unwrap();
        let lexical = dir.lexical_index_dir().unwrap();
        std::fs::create_dir(lexical.join("segment")).unwrap();
        std::fs::write(lexical.join("segment/a"), [0u8; 5]).unwrap();
        std::fs::write(tmp.path().join("unrelated"), [0u8; 100]).unwrap();

        assert_eq!(dir.disk_usage(), 15);
    }
}
