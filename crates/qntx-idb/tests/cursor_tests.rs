//! Cursor iteration tests: ordering, seek, offset, limit and early break

#![cfg(not(target_arch = "wasm32"))]

mod common;

use common::*;
use pretty_assertions::assert_eq;
use qntx_idb::{
    CursorDirection, CursorOptions, Database, Error, Factory, KeyPosition, MemoryFactory,
    TransactionMode,
};

/// Primary keys a value run over "people" delivers with `options`.
async fn walk(db: &Database, options: CursorOptions<u32>) -> Result<Vec<u32>, Error> {
    let definition = people();
    let store = &definition;
    db.transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
        let mut ids = Vec::new();
        tx.object_store(store)?
            .iterate(options, |position| {
                ids.push(*position.primary_key());
                async { Ok(false) }
            })
            .await?;
        Ok::<_, Error>(ids)
    })
    .await
}

async fn seeded(factory: &Factory, name: &str) -> Database {
    let db = open_people(factory, name).await;
    seed(&db, &five()).await;
    db
}

#[test]
fn test_forward_and_reverse_order() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "order").await;

        assert_eq!(walk(&db, CursorOptions::new()).await.unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(
            walk(&db, CursorOptions::new().direction(CursorDirection::Prev))
                .await
                .unwrap(),
            vec![5, 4, 3, 2, 1]
        );
    });
}

#[test]
fn test_offset_skips_positions() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "offset").await;

        assert_eq!(walk(&db, CursorOptions::new().offset(2)).await.unwrap(), vec![3, 4, 5]);
        assert_eq!(walk(&db, CursorOptions::new().offset(5)).await.unwrap(), Vec::<u32>::new());
        assert_eq!(
            walk(&db, CursorOptions::new().offset(1).direction(CursorDirection::Prev))
                .await
                .unwrap(),
            vec![4, 3, 2, 1]
        );
    });
}

#[test]
fn test_from_key_seeks() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "seek").await;

        assert_eq!(walk(&db, CursorOptions::new().from_key(3)).await.unwrap(), vec![3, 4, 5]);
        // Already at the target: no seek needed.
        assert_eq!(walk(&db, CursorOptions::new().from_key(1)).await.unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(
            walk(&db, CursorOptions::new().from_key(3).direction(CursorDirection::Prev))
                .await
                .unwrap(),
            vec![3, 2, 1]
        );
        assert_eq!(
            walk(&db, CursorOptions::new().from_key(2).offset(1).limit(2))
                .await
                .unwrap(),
            vec![3, 4]
        );
        assert_eq!(walk(&db, CursorOptions::new().from_key(9)).await.unwrap(), Vec::<u32>::new());
    });
}

#[test]
fn test_query_bounds_the_run() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "query").await;
        let range = people().bound(2, 4, false, true).unwrap();

        assert_eq!(walk(&db, CursorOptions::new().query(range)).await.unwrap(), vec![2, 3]);
    });
}

#[test]
fn test_limit_stops_without_another_host_call() {
    run(async {
        let memory = MemoryFactory::new();
        let factory = Factory::from(memory.clone());
        let db = seeded(&factory, "limit").await;

        let definition = people();
        let store = &definition;
        let memory = &memory;
        let (ids, in_last_callback, after_run) = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                let mut ids = Vec::new();
                let mut in_last_callback = 0;
                tx.object_store(store)?
                    .iterate(CursorOptions::new().limit(2), |position| {
                        ids.push(*position.primary_key());
                        in_last_callback = memory.operation_count();
                        async { Ok(false) }
                    })
                    .await?;
                Ok::<_, Error>((ids, in_last_callback, memory.operation_count()))
            })
            .await
            .unwrap();

        assert_eq!(ids, vec![1, 2]);
        assert_eq!(after_run, in_last_callback);
    });
}

#[test]
fn test_limit_waits_for_the_last_callback() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "limit-write").await;

        let definition = people();
        let store = &definition;
        db.transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
            tx.object_store(store)?
                .iterate(CursorOptions::new().limit(2), |position| async move {
                    let mut renamed = position.value().clone();
                    renamed.name = renamed.name.to_uppercase();
                    position.update(&renamed).await?;
                    Ok::<_, Error>(false)
                })
                .await
        })
        .await
        .unwrap();

        let names = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                let all = tx.object_store(store)?.get_all(None, None).await?;
                Ok::<_, Error>(all.into_iter().map(|p| p.name).collect::<Vec<_>>())
            })
            .await
            .unwrap();
        assert_eq!(names, vec!["ADA", "BOB", "cyd", "dee", "eve"]);
    });
}

#[test]
fn test_callback_breaks_early() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "break").await;

        let definition = people();
        let store = &definition;
        let ids = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                let mut ids = Vec::new();
                tx.object_store(store)?
                    .iterate_keys(CursorOptions::new(), |position: KeyPosition<u32, u32>| {
                        ids.push(position.key);
                        async move { Ok(position.key == 3) }
                    })
                    .await?;
                Ok::<_, Error>(ids)
            })
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    });
}

#[test]
fn test_zero_offset_or_limit_rejected_before_opening() {
    run(async {
        let memory = MemoryFactory::new();
        let factory = Factory::from(memory.clone());
        let db = seeded(&factory, "zero").await;

        let definition = people();
        let store = &definition;
        let memory = &memory;
        let (before, offset, limit, after) = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                let people = tx.object_store(store)?;
                let before = memory.operation_count();
                let offset = people
                    .iterate(CursorOptions::new().offset(0), |_| async { Ok(false) })
                    .await;
                let limit = people
                    .iterate(CursorOptions::new().limit(0), |_| async { Ok(false) })
                    .await;
                Ok::<_, Error>((before, offset, limit, memory.operation_count()))
            })
            .await
            .unwrap();

        assert!(matches!(offset, Err(Error::InvalidArgument(_))));
        assert!(matches!(limit, Err(Error::InvalidArgument(_))));
        assert_eq!(before, after);
    });
}

#[test]
fn test_callback_error_aborts() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "callback-error").await;

        let definition = people();
        let store = &definition;
        let result = db
            .transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
                tx.object_store(store)?
                    .iterate(CursorOptions::new(), |position| async move {
                        if *position.primary_key() == 2 {
                            return Err(Error::InvalidArgument("stop at 2".into()));
                        }
                        position.delete().await?;
                        Ok(false)
                    })
                    .await
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        // The delete of 1 rolled back with the transaction.
        assert_eq!(walk(&db, CursorOptions::new()).await.unwrap(), vec![1, 2, 3, 4, 5]);
    });
}

#[test]
fn test_delete_through_cursor() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "cursor-delete").await;

        let definition = people();
        let store = &definition;
        db.transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
            tx.object_store(store)?
                .iterate(CursorOptions::new(), |position| async move {
                    if position.value().city == "oslo" {
                        position.delete().await?;
                    }
                    Ok::<_, Error>(false)
                })
                .await
        })
        .await
        .unwrap();

        assert_eq!(walk(&db, CursorOptions::new()).await.unwrap(), vec![1, 3, 5]);
    });
}

/// `(city, id)` pairs an index run over "by_city" delivers.
async fn walk_city(db: &Database, options: CursorOptions<String, u32>) -> Vec<(String, u32)> {
    let definition = people();
    let store = &definition;
    db.transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
        let mut seen = Vec::new();
        tx.object_store(store)?
            .index(&by_city())?
            .iterate(options, |position| {
                seen.push((position.key().clone(), position.value().id));
                async { Ok(false) }
            })
            .await?;
        Ok::<_, Error>(seen)
    })
    .await
    .unwrap()
}

fn pairs(expected: &[(&str, u32)]) -> Vec<(String, u32)> {
    expected.iter().map(|(city, id)| (city.to_string(), *id)).collect()
}

#[test]
fn test_index_duplicates_and_unique_directions() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "index-order").await;

        assert_eq!(
            walk_city(&db, CursorOptions::new()).await,
            pairs(&[("oslo", 2), ("oslo", 4), ("paris", 1), ("paris", 3), ("paris", 5)])
        );
        assert_eq!(
            walk_city(&db, CursorOptions::new().direction(CursorDirection::Prev)).await,
            pairs(&[("paris", 5), ("paris", 3), ("paris", 1), ("oslo", 4), ("oslo", 2)])
        );
        assert_eq!(
            walk_city(&db, CursorOptions::new().direction(CursorDirection::NextUnique)).await,
            pairs(&[("oslo", 2), ("paris", 1)])
        );
        assert_eq!(
            walk_city(&db, CursorOptions::new().direction(CursorDirection::PrevUnique)).await,
            pairs(&[("paris", 1), ("oslo", 2)])
        );
    });
}

#[test]
fn test_index_from_position() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "index-seek").await;

        assert_eq!(
            walk_city(&db, CursorOptions::new().from_position("paris".to_string(), 3)).await,
            pairs(&[("paris", 3), ("paris", 5)])
        );
        assert_eq!(
            walk_city(&db, CursorOptions::new().from_key("paris".to_string()).limit(1)).await,
            pairs(&[("paris", 1)])
        );
        assert_eq!(
            walk_city(
                &db,
                CursorOptions::new()
                    .from_position("oslo".to_string(), 4)
                    .direction(CursorDirection::Prev)
            )
            .await,
            pairs(&[("oslo", 4), ("oslo", 2)])
        );
    });
}

#[test]
fn test_index_key_run() {
    run(async {
        let factory = Factory::memory();
        let db = seeded(&factory, "index-keys").await;

        let definition = people();
        let store = &definition;
        let keys = db
            .transaction(&[store], TransactionMode::ReadOnly, |tx| async move {
                let mut keys = Vec::new();
                tx.object_store(store)?
                    .index(&by_name())?
                    .iterate_keys(CursorOptions::new().offset(1).limit(3), |position| {
                        keys.push(position);
                        async { Ok(false) }
                    })
                    .await?;
                Ok::<_, Error>(keys)
            })
            .await
            .unwrap();

        assert_eq!(
            keys,
            vec![
                KeyPosition {
                    key: "bob".to_string(),
                    primary_key: 2
                },
                KeyPosition {
                    key: "cyd".to_string(),
                    primary_key: 3
                },
                KeyPosition {
                    key: "dee".to_string(),
                    primary_key: 4
                },
            ]
        );
    });
}
