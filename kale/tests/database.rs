use std::sync::OnceLock;

use kale::{bson::doc, memory::InMemoryStore, prelude::*};

static SEEDED: OnceLock<Database> = OnceLock::new();

fn seeded() -> Database {
    SEEDED.get().cloned().expect("database connected by the test")
}

#[derive(Model)]
#[model(collection = "cities", database = seeded)]
struct City;

#[tokio::test]
async fn connect_seeds_and_binds_models() {
    let db = Database::connect(
        InMemoryStore::builder()
            .with_documents("cities", vec![doc! { "name": "Lisbon" }, doc! { "name": "Porto" }])
            .with_documents("rivers", vec![doc! { "name": "Tagus" }]),
    )
    .await
    .unwrap();
    SEEDED.set(db.clone()).unwrap();

    assert_eq!(db.list_collections().await.unwrap(), vec!["cities", "rivers"]);

    let cities = City::collection().unwrap();
    assert!(Database::ptr_eq(&City::database().unwrap(), &db));
    assert_eq!(cities.count(None).await.unwrap(), 2);

    let lisbon = cities
        .find_one(Filter::eq("name", "Lisbon"))
        .await
        .unwrap()
        .unwrap();
    let id = lisbon.id().unwrap().unwrap();
    assert!(Instance::ptr_eq(&City::collection().unwrap().tracked(id).unwrap(), &lisbon));

    let rivers = db.collection("rivers");
    assert_eq!(rivers.count(None).await.unwrap(), 1);
    db.drop_collection("rivers").await.unwrap();
    db.drop_collection("rivers").await.unwrap();
    assert_eq!(db.list_collections().await.unwrap(), vec!["cities"]);

    db.create_collection("lakes").await.unwrap();
    assert_eq!(db.list_collections().await.unwrap(), vec!["cities", "lakes"]);

    db.shutdown().await.unwrap();
}
