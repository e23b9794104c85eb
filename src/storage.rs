use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::ItemRecord;

/// Persistent item catalog.
///
/// `name` is a unique key. Implementations are used by a single writer (the
/// persistence stage), so lookup-then-write is safe here; several writers
/// would need an atomic insert-or-update instead.
pub trait ItemStore: Send {
    fn find_by_name(&mut self, name: &str) -> Result<Option<ItemRecord>>;

    /// Insert a new item and return its assigned id.
    fn insert(&mut self, name: &str, first_seen: u64, last_seen: u64) -> Result<i64>;

    /// Move `last_seen` forward to `timestamp`. Never moves it backwards.
    fn update_last_seen(&mut self, item_id: i64, timestamp: u64) -> Result<()>;

    fn count(&mut self) -> Result<u64>;

    /// All items ordered by id.
    fn list(&mut self) -> Result<Vec<ItemRecord>>;
}

pub struct SqliteItemStore {
    conn: Connection,
}

impl SqliteItemStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open item store {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS fridge_items (
              item_id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              first_seen INTEGER NOT NULL,
              last_seen INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

fn to_sql_ts(ts: u64) -> Result<i64> {
    i64::try_from(ts).map_err(|_| anyhow!("timestamp exceeds i64 range"))
}

fn from_sql_ts(ts: i64) -> Result<u64> {
    u64::try_from(ts).map_err(|_| anyhow!("corrupt item store: negative timestamp"))
}

fn record_from_row(row: (i64, String, i64, i64)) -> Result<ItemRecord> {
    let (item_id, name, first_seen, last_seen) = row;
    Ok(ItemRecord {
        item_id,
        name,
        first_seen: from_sql_ts(first_seen)?,
        last_seen: from_sql_ts(last_seen)?,
    })
}

impl ItemStore for SqliteItemStore {
    fn find_by_name(&mut self, name: &str) -> Result<Option<ItemRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT item_id, name, first_seen, last_seen FROM fridge_items WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(record_from_row).transpose()
    }

    fn insert(&mut self, name: &str, first_seen: u64, last_seen: u64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO fridge_items(name, first_seen, last_seen) VALUES (?1, ?2, ?3)",
            params![name, to_sql_ts(first_seen)?, to_sql_ts(last_seen)?],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_last_seen(&mut self, item_id: i64, timestamp: u64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE fridge_items SET last_seen = MAX(last_seen, ?1) WHERE item_id = ?2",
            params![to_sql_ts(timestamp)?, item_id],
        )?;
        if updated == 0 {
            return Err(anyhow!("item {} not found", item_id));
        }
        Ok(())
    }

    fn count(&mut self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fridge_items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn list(&mut self) -> Result<Vec<ItemRecord>> {
        let rows = {
            let mut stmt = self.conn.prepare(
                "SELECT item_id, name, first_seen, last_seen FROM fridge_items ORDER BY item_id ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?));
            }
            out
        };
        rows.into_iter().map(record_from_row).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryItemStore {
    items: Vec<ItemRecord>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemStore for InMemoryItemStore {
    fn find_by_name(&mut self, name: &str) -> Result<Option<ItemRecord>> {
        Ok(self.items.iter().find(|item| item.name == name).cloned())
    }

    fn insert(&mut self, name: &str, first_seen: u64, last_seen: u64) -> Result<i64> {
        if self.items.iter().any(|item| item.name == name) {
            return Err(anyhow!("item '{}' already exists", name));
        }
        let item_id = self.items.last().map(|item| item.item_id + 1).unwrap_or(1);
        self.items.push(ItemRecord {
            item_id,
            name: name.to_string(),
            first_seen,
            last_seen,
        });
        Ok(item_id)
    }

    fn update_last_seen(&mut self, item_id: i64, timestamp: u64) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.item_id == item_id)
            .ok_or_else(|| anyhow!("item {} not found", item_id))?;
        item.last_seen = item.last_seen.max(timestamp);
        Ok(())
    }

    fn count(&mut self) -> Result<u64> {
        Ok(self.items.len() as u64)
    }

    fn list(&mut self) -> Result<Vec<ItemRecord>> {
        Ok(self.items.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store(store: &mut dyn ItemStore) -> Result<()> {
        assert_eq!(store.count()?, 0);
        assert!(store.find_by_name("apple")?.is_none());

        let apple = store.insert("apple", 100, 100)?;
        let banana = store.insert("banana", 150, 150)?;
        assert_ne!(apple, banana);
        assert_eq!(store.count()?, 2);

        store.update_last_seen(apple, 500)?;
        store.update_last_seen(apple, 300)?;
        let record = store.find_by_name("apple")?.expect("apple");
        assert_eq!(record.first_seen, 100);
        assert_eq!(record.last_seen, 500);

        assert!(store.insert("apple", 900, 900).is_err());
        assert!(store.update_last_seen(9_999, 1).is_err());

        let names: Vec<String> = store.list()?.into_iter().map(|item| item.name).collect();
        assert_eq!(names, vec!["apple", "banana"]);
        Ok(())
    }

    #[test]
    fn in_memory_store_semantics() -> Result<()> {
        exercise_store(&mut InMemoryItemStore::new())
    }

    #[test]
    fn sqlite_store_semantics() -> Result<()> {
        exercise_store(&mut SqliteItemStore::open_in_memory()?)
    }

    #[test]
    fn sqlite_store_persists_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fridge.db");
        let path = path.to_str().expect("utf-8 path");

        {
            let mut store = SqliteItemStore::open(path)?;
            store.insert("milk", 1_000, 2_000)?;
        }

        let mut store = SqliteItemStore::open(path)?;
        assert_eq!(store.count()?, 1);
        let milk = store.find_by_name("milk")?.expect("milk");
        assert_eq!((milk.first_seen, milk.last_seen), (1_000, 2_000));
        Ok(())
    }
}
