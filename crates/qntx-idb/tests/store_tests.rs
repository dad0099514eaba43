//! Object store and index operation tests over the memory engine

#![cfg(not(target_arch = "wasm32"))]

mod common;

use common::*;
use pretty_assertions::assert_eq;
use qntx_idb::{
    DatabaseDefinition, Error, Factory, HostErrorKind, KeyRange, ObjectStoreDefinition, Query,
    TransactionMode,
};
use serde::{Deserialize, Serialize};

#[test]
fn test_put_and_get() {
    run(async {
        let factory = Factory::memory();
        let db = open_people(&factory, "put-get").await;
        seed(&db, &[person(1, "ada", "paris")]).await;

        let definition = people();
        let store = &definition;
        let found = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                tx.object_store(store)?.get(1u32).await
            })
            .await
            .unwrap();
        assert_eq!(found, Some(person(1, "ada", "paris")));
    });
}

#[test]
fn test_add_rejects_existing_key_put_overwrites() {
    run(async {
        let factory = Factory::memory();
        let db = open_people(&factory, "add-put").await;
        seed(&db, &[person(1, "ada", "paris")]).await;

        let definition = people();
        let store = &definition;
        let result = db
            .transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
                tx.object_store(store)?.add(&person(1, "ann", "rome")).await
            })
            .await;
        let error = result.err().unwrap();
        assert_eq!(error.host_kind(), Some(HostErrorKind::Constraint));

        let key = db
            .transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
                tx.object_store(store)?.put(&person(1, "ann", "rome")).await
            })
            .await
            .unwrap();
        assert_eq!(key, 1);

        let found = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                tx.object_store(store)?.require_get(1u32).await
            })
            .await
            .unwrap();
        assert_eq!(found.name, "ann");
    });
}

#[test]
fn test_get_missing() {
    run(async {
        let factory = Factory::memory();
        let db = open_people(&factory, "missing").await;

        let definition = people();
        let store = &definition;
        let (absent, required) = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                let people = tx.object_store(store)?;
                let absent = people.get(42u32).await?;
                let required = people.require_get(42u32).await;
                Ok::<_, Error>((absent, required))
            })
            .await
            .unwrap();
        assert_eq!(absent, None);
        assert!(matches!(required, Err(Error::NoResult(_))));
    });
}

#[test]
fn test_get_all_count_and_ranges() {
    run(async {
        let factory = Factory::memory();
        let db = open_people(&factory, "ranges").await;
        seed(&db, &five()).await;

        let definition = people();
        let store = &definition;
        let (all, middle, first_two, keys, total, above_three) = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                let people = tx.object_store(store)?;
                let all = people.get_all(None, None).await?;
                let middle = people
                    .get_all(Some(store.bound(2, 4, false, false)?.into()), None)
                    .await?;
                let first_two = people.get_all(None, Some(2)).await?;
                let keys = people.get_all_primary_keys(None, None).await?;
                let total = people.count(None).await?;
                let above_three = people
                    .count(Some(Query::from(KeyRange::lower_bound(3u32, true)?)))
                    .await?;
                Ok::<_, Error>((all, middle, first_two, keys, total, above_three))
            })
            .await
            .unwrap();

        assert_eq!(all, five());
        assert_eq!(middle.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(first_two.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
        assert_eq!(total, 5);
        assert_eq!(above_three, 2);
    });
}

#[test]
fn test_delete_and_clear() {
    run(async {
        let factory = Factory::memory();
        let db = open_people(&factory, "delete").await;
        seed(&db, &five()).await;

        let definition = people();
        let store = &definition;
        let (after_delete, after_range, after_clear) = db
            .transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
                let people = tx.object_store(store)?;
                people.delete(1u32).await?;
                let after_delete = people.count(None).await?;
                people.delete(store.bound(2, 3, false, false)?).await?;
                let after_range = people.get_all_primary_keys(None, None).await?;
                people.clear().await?;
                let after_clear = people.count(None).await?;
                Ok::<_, Error>((after_delete, after_range, after_clear))
            })
            .await
            .unwrap();
        assert_eq!(after_delete, 4);
        assert_eq!(after_range, vec![4, 5]);
        assert_eq!(after_clear, 0);
    });
}

#[test]
fn test_index_reads() {
    run(async {
        let factory = Factory::memory();
        let db = open_people(&factory, "index-reads").await;
        seed(&db, &five()).await;

        let definition = people();
        let store = &definition;
        let (in_paris, oslo_keys, eve, cyd_key, oslo_count) = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                let people = tx.object_store(store)?;
                let city = people.index(&by_city())?;
                let name = people.index(&by_name())?;
                let in_paris = city.get_all(Some("paris".to_string().into()), None).await?;
                let oslo_keys = city
                    .get_all_primary_keys(Some("oslo".to_string().into()), None)
                    .await?;
                let eve = name.require_get("eve".to_string()).await?;
                let cyd_key = name.get_primary_key("cyd".to_string()).await?;
                let oslo_count = city.count(Some("oslo".to_string().into())).await?;
                Ok::<_, Error>((in_paris, oslo_keys, eve, cyd_key, oslo_count))
            })
            .await
            .unwrap();

        assert_eq!(in_paris.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(oslo_keys, vec![2, 4]);
        assert_eq!(eve.id, 5);
        assert_eq!(cyd_key, Some(3));
        assert_eq!(oslo_count, 2);
    });
}

#[test]
fn test_unique_index_rejects_duplicates() {
    run(async {
        let factory = Factory::memory();
        let db = open_people(&factory, "unique").await;
        seed(&db, &[person(1, "ada", "paris")]).await;

        let definition = people();
        let store = &definition;
        let result = db
            .transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
                tx.object_store(store)?.put(&person(2, "ada", "oslo")).await
            })
            .await;
        assert_eq!(result.err().unwrap().host_kind(), Some(HostErrorKind::Constraint));
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u32>,
    text: String,
}

#[test]
fn test_auto_increment_with_key_path() {
    run(async {
        let notes: ObjectStoreDefinition<Note, u32> = ObjectStoreDefinition::new("notes")
            .with_key_path("id")
            .with_auto_increment(true);
        let schema = notes.clone();
        let definition = DatabaseDefinition::new("notes", 1, move |db, _, _| {
            db.create_object_store(&schema)?;
            Ok(())
        });
        let factory = Factory::memory();
        let db = factory.open(&definition).await.unwrap();

        let store = &notes;
        let (first, second, stored) = db
            .transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
                let notes = tx.object_store(store)?;
                let note = |text: &str| Note {
                    id: None,
                    text: text.to_string(),
                };
                let first = notes.add(&note("one")).await?;
                let second = notes.add(&note("two")).await?;
                let stored = notes.require_get(second).await?;
                Ok::<_, Error>((first, second, stored))
            })
            .await
            .unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(
            stored,
            Note {
                id: Some(2),
                text: "two".to_string()
            }
        );
    });
}

#[test]
fn test_out_of_line_keys() {
    run(async {
        let settings: ObjectStoreDefinition<String, String> = ObjectStoreDefinition::new("settings");
        let schema = settings.clone();
        let definition = DatabaseDefinition::new("settings", 1, move |db, _, _| {
            db.create_object_store(&schema)?;
            Ok(())
        });
        let factory = Factory::memory();
        let db = factory.open(&definition).await.unwrap();

        let store = &settings;
        let theme = db
            .transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
                let settings = tx.object_store(store)?;
                settings.put_with_key(&"dark".to_string(), "theme".to_string()).await?;
                settings.add_with_key(&"en".to_string(), "lang".to_string()).await?;
                settings.get("theme".to_string()).await
            })
            .await
            .unwrap();
        assert_eq!(theme, Some("dark".to_string()));
    });
}

#[test]
fn test_key_type_mismatch() {
    run(async {
        let factory = Factory::memory();
        let db = open_people(&factory, "mismatch").await;
        seed(&db, &[person(1, "ada", "paris")]).await;

        // Same store, keys read back as strings.
        let wrong: ObjectStoreDefinition<Person, String> = ObjectStoreDefinition::new("people");
        let store = &wrong;
        let result = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                tx.object_store(store)?.get_all_primary_keys(None, None).await
            })
            .await;
        assert!(matches!(result, Err(Error::KeyType { .. })));
    });
}

#[test]
fn test_try_delete_index() {
    run(async {
        let definition = DatabaseDefinition::new("drop-index", 1, |db, _, _| {
            let store = db.create_object_store(&people())?;
            store.create_index(&by_city())?;
            assert!(store.try_delete_index("by_city")?);
            assert!(!store.try_delete_index("by_city")?);
            assert!(store.index_names().is_empty());
            Ok(())
        });
        let factory = Factory::memory();
        let db = factory.open(&definition).await.unwrap();
        assert_eq!(db.object_store_names(), vec!["people".to_string()]);
    });
}
