//! Browser IndexedDB tests
//!
//! Run with `wasm-pack test --headless --firefox crates/qntx-idb`.

#![cfg(target_arch = "wasm32")]

use pretty_assertions::assert_eq;
use qntx_idb::{
    CursorOptions, DatabaseDefinition, Error, Factory, ObjectStoreDefinition, TransactionMode,
};
use serde::{Deserialize, Serialize};
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    id: u32,
    body: String,
}

fn entries() -> ObjectStoreDefinition<Entry, u32> {
    ObjectStoreDefinition::new("entries").with_key_path("id")
}

fn journal(name: &str) -> DatabaseDefinition {
    DatabaseDefinition::new(name, 1, |db, _, _| {
        db.create_object_store(&entries())?;
        Ok(())
    })
}

#[wasm_bindgen_test]
async fn test_browser_round_trip() {
    let factory = Factory::browser().unwrap();
    let _ = factory.delete_database("qntx-idb-round-trip").await;
    let db = factory.open(&journal("qntx-idb-round-trip")).await.unwrap();

    let definition = entries();
    let store = &definition;
    let ids = db
        .transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
            assert_eq!(tx.mode(), TransactionMode::ReadWrite);
            let entries = tx.object_store(store)?;
            for id in 1..=5u32 {
                entries
                    .put(&Entry {
                        id,
                        body: format!("entry {}", id),
                    })
                    .await?;
            }
            let mut ids = Vec::new();
            entries
                .iterate(CursorOptions::new().from_key(2).offset(1).limit(2), |position| {
                    ids.push(*position.primary_key());
                    async { Ok(false) }
                })
                .await?;
            Ok::<_, Error>(ids)
        })
        .await
        .unwrap();
    assert_eq!(ids, vec![3, 4]);

    db.close();
    factory.delete_database("qntx-idb-round-trip").await.unwrap();
}
