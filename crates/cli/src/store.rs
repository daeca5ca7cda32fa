use std::fs;
use std::path::{Path, PathBuf};

use library::{LibraryError, Persist};
use redb::{Database, ReadableTable, TableDefinition};

const ITEMS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("items");

/// The binary's default persist backend: one redb table of strings. The
/// database file's parent directory anchors derived fragment state.
pub struct RedbPersist {
    db: Database,
    location: PathBuf,
}

impl RedbPersist {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)
        } else {
            Database::create(path)
        }
        .map_err(persist_error)?;

        let location = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Ok(Self { db, location })
    }
}

impl Persist for RedbPersist {
    fn get_item(&self, name: &str) -> Result<Option<String>, LibraryError> {
        let read_txn = self.db.begin_read().map_err(persist_error)?;
        let table = match read_txn.open_table(ITEMS_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(persist_error(err)),
        };
        let value = table
            .get(name)
            .map_err(persist_error)?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn set_item(&self, name: &str, value: &str) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write().map_err(persist_error)?;
        {
            let mut table = write_txn.open_table(ITEMS_TABLE).map_err(persist_error)?;
            table.insert(name, value).map_err(persist_error)?;
        }
        write_txn.commit().map_err(persist_error)?;
        Ok(())
    }

    fn remove_item(&self, name: &str) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write().map_err(persist_error)?;
        {
            let mut table = write_txn.open_table(ITEMS_TABLE).map_err(persist_error)?;
            table.remove(name).map_err(persist_error)?;
        }
        write_txn.commit().map_err(persist_error)?;
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.location
    }
}

fn persist_error(err: impl std::fmt::Display) -> LibraryError {
    LibraryError::Persist(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_items() {
        let dir = TempDir::new().unwrap();
        let persist = RedbPersist::open(&dir.path().join("catalog.redb")).unwrap();
        assert_eq!(persist.get_item("audio-database").unwrap(), None);

        persist.set_item("audio-database", "{}").unwrap();
        assert_eq!(
            persist.get_item("audio-database").unwrap().as_deref(),
            Some("{}")
        );

        persist.remove_item("audio-database").unwrap();
        assert_eq!(persist.get_item("audio-database").unwrap(), None);
        assert_eq!(persist.location(), dir.path());
    }

    #[test]
    fn reopens_an_existing_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.redb");
        {
            let persist = RedbPersist::open(&path).unwrap();
            persist.set_item("k", "v").unwrap();
        }
        let persist = RedbPersist::open(&path).unwrap();
        assert_eq!(persist.get_item("k").unwrap().as_deref(), Some("v"));
    }
}
