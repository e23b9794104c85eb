use anyhow::{Context, Result};

use crate::storage::ItemStore;
use crate::{Event, ItemRecord, RawDetection};

/// Turns raw detections into stable catalog entries.
///
/// Lookup-then-branch upsert: an existing name gets its `last_seen` bumped
/// (`ItemUpdated`), an unknown name is inserted with
/// `first_seen = last_seen = timestamp` (`ItemAdded`). Not atomic against
/// other writers; the persist stage is the only writer.
pub struct ItemCatalog {
    store: Box<dyn ItemStore>,
    item_count: u64,
}

impl ItemCatalog {
    pub fn new(store: Box<dyn ItemStore>) -> Self {
        Self {
            store,
            item_count: 0,
        }
    }

    /// Load the item counter from storage.
    pub fn prime(&mut self) -> Result<u64> {
        self.item_count = self.store.count().context("count stored items")?;
        Ok(self.item_count)
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn resolve(&mut self, detection: &RawDetection) -> Result<Event> {
        let name = detection.label.as_str();
        let existing = self
            .store
            .find_by_name(name)
            .with_context(|| format!("look up {}", name))?;

        match existing {
            Some(mut item) => {
                self.store
                    .update_last_seen(item.item_id, detection.timestamp)
                    .with_context(|| format!("update {}", name))?;
                item.last_seen = item.last_seen.max(detection.timestamp);
                Ok(Event::ItemUpdated {
                    item,
                    confidence: detection.confidence,
                    bbox: detection.bbox,
                })
            }
            None => {
                let item_id = self
                    .store
                    .insert(name, detection.timestamp, detection.timestamp)
                    .with_context(|| format!("insert {}", name))?;
                self.item_count += 1;
                Ok(Event::ItemAdded {
                    item: ItemRecord {
                        item_id,
                        name: name.to_string(),
                        first_seen: detection.timestamp,
                        last_seen: detection.timestamp,
                    },
                    confidence: detection.confidence,
                    bbox: detection.bbox,
                })
            }
        }
    }

    pub fn items(&mut self) -> Result<Vec<ItemRecord>> {
        self.store.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryItemStore;
    use crate::BoundingBox;
    use anyhow::bail;

    fn detection(label: &str, timestamp: u64) -> RawDetection {
        RawDetection::new(label, 0.9, BoundingBox::new(10.0, 10.0, 30.0, 30.0), timestamp)
    }

    fn record<'a>(items: &'a [ItemRecord], name: &str) -> &'a ItemRecord {
        items
            .iter()
            .find(|item| item.name == name)
            .unwrap_or_else(|| panic!("missing {}", name))
    }

    /// Fails lookups for one poisoned name.
    struct PoisonedStore {
        inner: InMemoryItemStore,
        poisoned: &'static str,
    }

    impl ItemStore for PoisonedStore {
        fn find_by_name(&mut self, name: &str) -> Result<Option<ItemRecord>> {
            if name == self.poisoned {
                bail!("storage unavailable");
            }
            self.inner.find_by_name(name)
        }

        fn insert(&mut self, name: &str, first_seen: u64, last_seen: u64) -> Result<i64> {
            self.inner.insert(name, first_seen, last_seen)
        }

        fn update_last_seen(&mut self, item_id: i64, timestamp: u64) -> Result<()> {
            self.inner.update_last_seen(item_id, timestamp)
        }

        fn count(&mut self) -> Result<u64> {
            self.inner.count()
        }

        fn list(&mut self) -> Result<Vec<ItemRecord>> {
            self.inner.list()
        }
    }

    #[test]
    fn repeated_names_collapse_into_one_record() -> Result<()> {
        let mut catalog = ItemCatalog::new(Box::new(InMemoryItemStore::new()));
        catalog.prime()?;

        let events: Vec<Event> = [
            detection("apple", 0),
            detection("apple", 5),
            detection("banana", 3),
        ]
        .iter()
        .map(|d| catalog.resolve(d))
        .collect::<Result<_>>()?;

        let kinds: Vec<(&str, String)> = events
            .iter()
            .map(|event| match event {
                Event::ItemAdded { item, .. } | Event::ItemUpdated { item, .. } => {
                    (event.kind(), item.name.clone())
                }
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("item_added", "apple".to_string()),
                ("item_updated", "apple".to_string()),
                ("item_added", "banana".to_string()),
            ]
        );

        let items = catalog.items()?;
        assert_eq!(items.len(), 2);
        let apple = record(&items, "apple");
        assert_eq!((apple.first_seen, apple.last_seen), (0, 5));
        let banana = record(&items, "banana");
        assert_eq!((banana.first_seen, banana.last_seen), (3, 3));
        assert_eq!(catalog.item_count(), 2);
        Ok(())
    }

    #[test]
    fn dedup_keeps_earliest_first_seen_and_latest_last_seen() -> Result<()> {
        let mut catalog = ItemCatalog::new(Box::new(InMemoryItemStore::new()));
        let names = ["milk", "egg", "milk", "tofu", "egg", "milk", "egg"];
        for (ts, name) in names.iter().enumerate() {
            catalog.resolve(&detection(name, ts as u64 * 10))?;
        }

        let items = catalog.items()?;
        assert_eq!(items.len(), 3);
        for name in ["milk", "egg", "tofu"] {
            let seen: Vec<u64> = names
                .iter()
                .enumerate()
                .filter(|(_, n)| *n == &name)
                .map(|(ts, _)| ts as u64 * 10)
                .collect();
            let item = record(&items, name);
            assert_eq!(item.first_seen, seen[0]);
            assert_eq!(item.last_seen, *seen.last().unwrap());
        }
        Ok(())
    }

    #[test]
    fn last_seen_never_moves_backwards() -> Result<()> {
        let mut catalog = ItemCatalog::new(Box::new(InMemoryItemStore::new()));
        catalog.resolve(&detection("apple", 100))?;
        catalog.resolve(&detection("apple", 200))?;
        let event = catalog.resolve(&detection("apple", 150))?;

        let Event::ItemUpdated { item, .. } = event else {
            panic!("expected an update");
        };
        assert_eq!(item.last_seen, 200);
        assert_eq!(record(&catalog.items()?, "apple").last_seen, 200);
        Ok(())
    }

    #[test]
    fn storage_failure_is_scoped_to_one_detection() -> Result<()> {
        let mut catalog = ItemCatalog::new(Box::new(PoisonedStore {
            inner: InMemoryItemStore::new(),
            poisoned: "durian",
        }));

        let err = catalog
            .resolve(&detection("durian", 1))
            .expect_err("poisoned lookup");
        assert!(format!("{:#}", err).contains("storage unavailable"));

        let event = catalog.resolve(&detection("kiwi", 2))?;
        assert_eq!(event.kind(), "item_added");

        let items = catalog.items()?;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "kiwi");
        assert_eq!(catalog.item_count(), 1);
        Ok(())
    }

    #[test]
    fn prime_counts_existing_items() -> Result<()> {
        let mut store = InMemoryItemStore::new();
        store.insert("natto", 1, 1)?;
        store.insert("miso", 2, 2)?;

        let mut catalog = ItemCatalog::new(Box::new(store));
        assert_eq!(catalog.prime()?, 2);
        catalog.resolve(&detection("natto", 3))?;
        assert_eq!(catalog.item_count(), 2);
        catalog.resolve(&detection("rice", 4))?;
        assert_eq!(catalog.item_count(), 3);
        Ok(())
    }
}
