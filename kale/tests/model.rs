use std::sync::OnceLock;

use kale::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};

/// Declares a model backed by its own in-memory database.
macro_rules! model {
    ($name:ident, $collection:literal) => {
        #[derive(Model)]
        #[model(collection = $collection, database = $name::db)]
        struct $name;

        impl $name {
            fn db() -> Database {
                static DB: OnceLock<Database> = OnceLock::new();
                DB.get_or_init(|| Database::new(InMemoryStore::new()))
                    .clone()
            }
        }
    };
}

model!(Note, "notes");
model!(Author, "authors");
model!(Post, "posts");
model!(Tag, "tags");
model!(Profile, "profiles");
model!(Event, "events");
model!(Ledger, "ledger");

#[derive(Model)]
#[model(collection = "people", database = Person::db, members = ["full_name"])]
struct Person;

impl Person {
    fn db() -> Database {
        static DB: OnceLock<Database> = OnceLock::new();
        DB.get_or_init(|| Database::new(InMemoryStore::new()))
            .clone()
    }
}

#[derive(Model)]
struct Undeclared;

#[derive(Model)]
#[model(collection = "nowhere")]
struct Homeless;

fn note(text: &str) -> Instance<Note> {
    Instance::<Note>::from_value(Value::map([("text", text)])).unwrap()
}

#[tokio::test]
async fn save_assigns_an_id_once() {
    let first = note("save");

    let id = first.save().await.unwrap();
    assert!(first.is_persisted());
    assert!(matches!(id, bson::Bson::ObjectId(_)));
    assert_eq!(first.id().unwrap(), Some(id.clone()));

    first.set("text", "saved again");
    assert_eq!(first.save().await.unwrap(), id);

    let stored = Note::collection()
        .unwrap()
        .raw()
        .find_one(Filter::id(id.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_str("text").unwrap(), "saved again");
    assert_eq!(stored.get(ID_KEY), Some(&id));
}

#[tokio::test]
async fn insert_twice_is_a_duplicate() {
    let original = Instance::<Post>::from_value(Value::map([("title", "hello")])).unwrap();
    let id = original.insert().await.unwrap();

    let err = original.insert().await.unwrap_err();
    assert!(matches!(err, KaleError::DuplicateIdentifier(..)));

    let copy = Instance::<Post>::from_value(Value::map([("title", "hello")])).unwrap();
    let other = copy.insert().await.unwrap();
    assert_ne!(id, other);
}

#[tokio::test]
async fn remove_clears_the_id() {
    let doomed = Instance::<Ledger>::new().unwrap();
    doomed.set("amount", 12);
    let first = doomed.save().await.unwrap();

    doomed.remove(None).await.unwrap();

    assert!(!doomed.is_persisted());
    assert_eq!(doomed.item("amount").unwrap(), Value::from(12));
    let collection = Ledger::collection().unwrap();
    assert_eq!(collection.count(Some(Filter::id(first.clone()))).await.unwrap(), 0);
    assert!(collection.tracked(first.clone()).is_none());

    let second = doomed.save().await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn remove_rejects_collection_level_filters() {
    let kept = note("kept");
    kept.save().await.unwrap();

    let err = kept
        .remove(Some(Filter::eq("text", "kept")))
        .await
        .unwrap_err();
    assert!(matches!(err, KaleError::WrongLevel(_)));
    assert!(kept.is_persisted());

    kept.remove(Some(Filter::all())).await.unwrap();
    assert!(!kept.is_persisted());
}

#[tokio::test]
async fn removing_an_unsaved_instance_is_a_no_op() {
    let unsaved = note("never saved");

    unsaved.remove(None).await.unwrap();

    assert!(!unsaved.is_persisted());
}

#[tokio::test]
async fn reads_share_the_live_instance() {
    let author = Instance::<Author>::from_value(Value::map([("name", "ursula")])).unwrap();
    let id = author.save().await.unwrap();
    let authors = Author::collection().unwrap();

    let found = authors
        .find_one(Filter::eq("name", "ursula"))
        .await
        .unwrap()
        .unwrap();
    assert!(Instance::ptr_eq(&author, &found));

    author.set("name", "le guin");
    let raw = authors
        .raw()
        .find_one(Filter::id(id.clone()))
        .await
        .unwrap()
        .unwrap();
    let hydrated = authors.hydrate(raw).unwrap();
    assert!(Instance::ptr_eq(&author, &hydrated));
    assert_eq!(hydrated.item("name").unwrap(), Value::from("le guin"));

    drop((author, found, hydrated));
    assert!(authors.tracked(id.clone()).is_none());

    let fresh = authors
        .find_one(Filter::id(id.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.item("name").unwrap(), Value::from("ursula"));
    assert!(Instance::ptr_eq(&fresh, &authors.tracked(id).unwrap()));
}

#[tokio::test]
async fn model_fields_keep_identity() {
    let tag = Instance::<Tag>::from_value(Value::map([("label", "rust")])).unwrap();
    let post = Instance::<Post>::new().unwrap();

    post.set("tag", &tag);
    let read_back = post
        .item("tag")
        .unwrap()
        .as_instance::<Tag>()
        .unwrap();
    assert!(Instance::ptr_eq(&tag, &read_back));
    assert!(post.item("tag").unwrap().as_instance::<Note>().is_none());

    tag.set("label", "rustlang");
    assert_eq!(
        post.item("tag")
            .unwrap()
            .as_container()
            .unwrap()
            .item("label")
            .unwrap(),
        Value::from("rustlang")
    );

    let id = post.save().await.unwrap();
    let stored = Post::collection()
        .unwrap()
        .raw()
        .find_one(Filter::id(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.get_document("tag").unwrap().get_str("label").unwrap(),
        "rustlang"
    );
}

#[tokio::test]
async fn removing_a_referenced_instance_does_not_cascade() {
    let tag = Instance::<Tag>::from_value(Value::map([("label", "orphan")])).unwrap();
    tag.save().await.unwrap();
    let post = Instance::<Post>::new().unwrap();
    post.set("tag", &tag);
    let post_id = post.save().await.unwrap();

    tag.remove(None).await.unwrap();

    let posts = Post::collection().unwrap();
    assert_eq!(posts.count(Some(Filter::id(post_id))).await.unwrap(), 1);
    assert!(post.contains_key("tag"));
    post.save().await.unwrap();
}

#[tokio::test]
async fn nested_mappings_come_back_as_containers() {
    let profile = Instance::<Profile>::from_value(Value::map([
        ("name", Value::from("ada")),
        (
            "address",
            Value::map([
                ("city", Value::from("London")),
                ("geo", Value::map([("lat", 51.5)])),
            ]),
        ),
        ("langs", Value::array(["en", "fr"])),
    ]))
    .unwrap();
    let id = profile.save().await.unwrap();
    drop(profile);

    let fresh = Profile::collection()
        .unwrap()
        .find_one(Filter::eq("address.city", "London"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fresh.id().unwrap(), Some(id));
    let address = fresh.item("address").unwrap().as_container().unwrap();
    assert_eq!(address.attr("city").unwrap().into_value(), Some(Value::from("London")));
    let geo = address.item("geo").unwrap().as_container().unwrap();
    assert_eq!(geo.item("lat").unwrap(), Value::from(51.5));
    assert_eq!(fresh.item("langs").unwrap(), Value::array(["en", "fr"]));
}

#[tokio::test]
async fn undeclared_models_cannot_be_built() {
    assert!(matches!(Instance::<Undeclared>::new(), Err(KaleError::Configuration(_))));
    assert!(matches!(Instance::<Homeless>::new(), Err(KaleError::Configuration(_))));
    assert!(matches!(Instance::<BaseModel>::new(), Err(KaleError::Configuration(_))));
    assert!(matches!(
        BaseModel::hydrate(bson::doc! { "a": 1 }),
        Err(KaleError::Configuration(_))
    ));
}

#[tokio::test]
async fn cyclic_instances_cannot_be_saved() {
    let looped = note("loop");
    looped.set("me", &looped);

    let err = looped.save().await.unwrap_err();

    assert!(matches!(err, KaleError::UnsupportedValue(_)));
    assert!(!looped.is_persisted());
    assert!(looped.to_string().contains("{...}"));
}

#[tokio::test]
async fn members_shadow_stored_keys() {
    let person = Instance::<Person>::new().unwrap();
    person.set("save", "stored under a member name");
    person.set("nickname", "bo");

    assert_eq!(person.attr("save").unwrap(), Attribute::Member("save"));
    assert_eq!(person.attr("keys").unwrap(), Attribute::Member("keys"));
    assert_eq!(person.attr("full_name").unwrap(), Attribute::Member("full_name"));
    assert_eq!(
        person.item("save").unwrap(),
        Value::from("stored under a member name")
    );
    assert_eq!(person.attr("nickname").unwrap().into_value(), Some(Value::from("bo")));

    assert!(matches!(person.set_attr("full_name", "x"), Err(KaleError::ReadOnlyMember(_))));
    assert!(matches!(person.del_attr("id"), Err(KaleError::ReadOnlyMember(_))));
    assert!(matches!(person.attr("missing"), Err(KaleError::KeyNotFound(_))));

    person.set_attr("nickname", "bob").unwrap();
    assert_eq!(person.del_attr("nickname").unwrap(), Value::from("bob"));
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct EventBody {
    kind: String,
    attendees: Vec<String>,
    venue: Venue,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Venue {
    city: String,
    capacity: i64,
}

#[tokio::test]
async fn serde_types_round_trip_through_instances() {
    let body = EventBody {
        kind: "meetup".to_string(),
        attendees: vec!["ana".to_string(), "bo".to_string()],
        venue: Venue { city: "Lisbon".to_string(), capacity: 40 },
    };

    let event = Instance::<Event>::from_serialize(&body).unwrap();
    assert!(event.item("venue").unwrap().as_container().is_some());
    event.save().await.unwrap();
    drop(event);

    let fresh = Event::collection()
        .unwrap()
        .find_one(Filter::eq("venue.city", "Lisbon"))
        .await
        .unwrap()
        .unwrap();
    fresh.remove(None).await.unwrap();

    assert_eq!(fresh.deserialize_into::<EventBody>().unwrap(), body);
}

#[tokio::test]
async fn text_round_trip_preserves_native_types() {
    let stamped = note("stamped");
    stamped.set("at", bson::DateTime::now().to_chrono());
    stamped.set("n", 3);
    stamped.save().await.unwrap();

    let parsed: AttrContainer = stamped.to_string().parse().unwrap();

    assert_eq!(parsed, *stamped.container());
    assert!(parsed.item(ID_KEY).unwrap().as_object_id().is_some());
    assert!(parsed.item("at").unwrap().as_datetime().is_some());
}

#[tokio::test]
async fn collection_passthroughs() {
    let collection = Ledger::collection().unwrap();
    for amount in [5, 50, 500] {
        let entry = Instance::<Ledger>::from_value(Value::map([("amount", amount), ("bulk", 1)])).unwrap();
        entry.save().await.unwrap();
    }

    assert_eq!(collection.name(), "ledger");
    assert_eq!(collection.count(Some(Filter::eq("bulk", 1))).await.unwrap(), 3);

    let deleted = collection
        .delete_many(Some(Filter::and([Filter::eq("bulk", 1), Filter::gte("amount", 50)])))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let raw = collection
        .raw()
        .find_one(Filter::eq("bulk", 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.get_i64("amount").unwrap(), 5);
}
