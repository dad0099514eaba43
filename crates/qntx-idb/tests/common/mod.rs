//! Shared fixtures for the memory-engine integration tests

#![allow(dead_code)]

use std::future::Future;

use qntx_idb::{
    Database, DatabaseDefinition, Factory, IndexDefinition, ObjectStoreDefinition, TransactionMode,
};
use serde::{Deserialize, Serialize};
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: u32,
    pub name: String,
    pub city: String,
}

pub fn person(id: u32, name: &str, city: &str) -> Person {
    Person {
        id,
        name: name.to_string(),
        city: city.to_string(),
    }
}

/// Drive `future` on a paused current-thread runtime inside a `LocalSet`,
/// which the memory engine needs for its callbacks and timers.
pub fn run<F: Future>(future: F) -> F::Output {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();
    LocalSet::new().block_on(&runtime, future)
}

pub fn people() -> ObjectStoreDefinition<Person, u32> {
    ObjectStoreDefinition::new("people").with_key_path("id")
}

pub fn by_city() -> IndexDefinition<String> {
    IndexDefinition::new("by_city", "city")
}

pub fn by_name() -> IndexDefinition<String> {
    IndexDefinition::new("by_name", "name").with_unique(true)
}

/// Version 1 of the "people" database: one store keyed by `id`, indexed by
/// city (non-unique) and name (unique).
pub fn people_db(name: &str) -> DatabaseDefinition {
    DatabaseDefinition::new(name, 1, |db, _, _| {
        let store = db.create_object_store(&people())?;
        store.create_index(&by_city())?;
        store.create_index(&by_name())?;
        Ok(())
    })
}

pub async fn open_people(factory: &Factory, name: &str) -> Database {
    factory.open(&people_db(name)).await.unwrap()
}

/// Put every person in one read-write transaction.
pub async fn seed(db: &Database, rows: &[Person]) {
    let definition = people();
    let store = &definition;
    db.transaction(&[store], TransactionMode::ReadWrite, |tx| async move {
        let people = tx.object_store(store)?;
        for row in rows {
            people.put(row).await?;
        }
        Ok::<_, qntx_idb::Error>(())
    })
    .await
    .unwrap();
}

/// People 1..=5, two cities.
pub fn five() -> Vec<Person> {
    vec![
        person(1, "ada", "paris"),
        person(2, "bob", "oslo"),
        person(3, "cyd", "paris"),
        person(4, "dee", "oslo"),
        person(5, "eve", "paris"),
    ]
}
