//! Model-level behavior through the public API: inheritance, proxies,
//! deletion policies, and named managers.

use memorm_db::{
    FieldDef, FieldType, ModelSchema, OnDelete, OrmError, Q, QuerySet, Store, Value,
};

fn places() -> Store {
    let store = Store::new();
    store
        .register(
            ModelSchema::new("Place")
                .field(FieldDef::new("name", FieldType::CharField).max_length(50))
                .field(FieldDef::new("address", FieldType::CharField).default(""))
                .display_field("name"),
        )
        .unwrap();
    store
        .register(
            ModelSchema::new("Restaurant")
                .inherits("Place")
                .field(FieldDef::new("serves_hot_dogs", FieldType::BooleanField).default(false)),
        )
        .unwrap();
    store
        .register(ModelSchema::new("Landmark").proxy_of("Place"))
        .unwrap();
    store
}

#[test]
fn test_multi_table_child_shares_parent_pk() {
    let store = places();
    store.create("Place", [("name", "Town Hall")]).unwrap();
    let diner = store
        .create(
            "Restaurant",
            [("name", Value::from("Demon Dogs")), ("serves_hot_dogs", Value::from(true))],
        )
        .unwrap();
    assert_eq!(diner.pk(), Some(2));
    assert_eq!(store.objects("Place").unwrap().count().unwrap(), 2);
    assert_eq!(store.objects("Restaurant").unwrap().count().unwrap(), 1);

    let as_place = store.get("Place", 2).unwrap();
    assert_eq!(as_place.get::<String>("name").unwrap(), "Demon Dogs");
    assert_ne!(as_place, diner);

    let found = store
        .objects("Restaurant")
        .unwrap()
        .get(Q::new("name__startswith", "Demon"))
        .unwrap();
    assert!(found.get::<bool>("serves_hot_dogs").unwrap());
}

#[test]
fn test_child_updates_reach_the_parent_row() {
    let store = places();
    let mut diner = store.create("Restaurant", [("name", "Demon Dogs")]).unwrap();
    diner.set("name", "Hot Dog Heaven").unwrap();
    store.save(&mut diner).unwrap();
    assert_eq!(
        store.get("Place", 1).unwrap().get::<String>("name").unwrap(),
        "Hot Dog Heaven"
    );

    store
        .objects("Place")
        .unwrap()
        .filter(Q::new("pk", 1))
        .unwrap()
        .update([("address", "1 Main St")])
        .unwrap();
    let mut fresh = diner.clone();
    store.refresh(&mut fresh).unwrap();
    assert_eq!(fresh.get::<String>("address").unwrap(), "1 Main St");
}

#[test]
fn test_deleting_a_child_removes_the_whole_object() {
    let store = places();
    store.create("Place", [("name", "Town Hall")]).unwrap();
    let diner = store.create("Restaurant", [("name", "Demon Dogs")]).unwrap();
    let (total, counts) = store.delete(&diner).unwrap();
    assert_eq!(total, 2);
    assert_eq!(counts.get("Place"), Some(&1));
    assert_eq!(counts.get("Restaurant"), Some(&1));
    assert_eq!(store.objects("Place").unwrap().count().unwrap(), 1);
}

#[test]
fn test_proxy_reads_the_parent_table() {
    let store = places();
    let hall = store.create("Place", [("name", "Town Hall")]).unwrap();
    let landmarks = store.objects("Landmark").unwrap();
    assert_eq!(landmarks.count().unwrap(), 1);
    let landmark = landmarks.first().unwrap().unwrap();
    assert_eq!(landmark.model(), "Landmark");
    assert_eq!(landmark, hall);
    assert_eq!(landmark.repr(), "<Landmark: Town Hall>");
}

fn publishing() -> Store {
    let store = Store::new();
    store
        .register(ModelSchema::new("Publisher").field(FieldDef::new("name", FieldType::CharField)))
        .unwrap();
    store
        .register(ModelSchema::new("Editor").field(FieldDef::new("name", FieldType::CharField)))
        .unwrap();
    store
        .register(
            ModelSchema::new("Book")
                .field(FieldDef::new("title", FieldType::CharField))
                .field(FieldDef::new("author", FieldType::CharField))
                .field(FieldDef::foreign_key("publisher", "Publisher", OnDelete::Protect))
                .field(
                    FieldDef::foreign_key("editor", "Editor", OnDelete::SetNull)
                        .null()
                        .related_name("edited"),
                )
                .display_field("title"),
        )
        .unwrap();
    store
}

fn book(store: &Store, title: &str, author: &str, publisher: i64, editor: Option<i64>) {
    store
        .create(
            "Book",
            [
                ("title", Value::from(title)),
                ("author", Value::from(author)),
                ("publisher", Value::from(publisher)),
                ("editor", Value::from(editor)),
            ],
        )
        .unwrap();
}

#[test]
fn test_protect_and_set_null() {
    let store = publishing();
    let house = store.create("Publisher", [("name", "Puffin")]).unwrap();
    let editor = store.create("Editor", [("name", "Ed")]).unwrap();
    book(&store, "Matilda", "Roald Dahl", 1, Some(1));

    assert!(matches!(store.delete(&house), Err(OrmError::ProtectedError(_))));
    assert_eq!(store.objects("Publisher").unwrap().count().unwrap(), 1);

    assert_eq!(store.related(&editor, "edited").unwrap().count().unwrap(), 1);
    let (total, _) = store.delete(&editor).unwrap();
    assert_eq!(total, 1);
    let matilda = store.get("Book", 1).unwrap();
    assert_eq!(matilda.get_value("editor_id"), Some(&Value::Null));

    let (total, counts) = store.objects("Book").unwrap().all().unwrap().delete().unwrap();
    assert_eq!(total, 1);
    assert_eq!(counts.get("Book"), Some(&1));
    store.delete(&house).unwrap();
}

#[test]
fn test_named_manager_chains_like_any_queryset() {
    let store = publishing();
    store.create("Publisher", [("name", "Puffin")]).unwrap();
    book(&store, "Matilda", "Roald Dahl", 1, None);
    book(&store, "The BFG", "Roald Dahl", 1, None);
    book(&store, "Emma", "Jane Austen", 1, None);
    store
        .register_manager("Book", "dahl_objects", |qs: QuerySet| {
            qs.filter(Q::new("author", "Roald Dahl"))
        })
        .unwrap();

    let dahl = store.manager("Book", "dahl_objects").unwrap();
    assert_eq!(dahl.count().unwrap(), 2);
    let titles = dahl
        .order_by(["-title"])
        .unwrap()
        .values_list_flat(["title"])
        .unwrap()
        .items()
        .unwrap();
    assert_eq!(titles, vec![Value::from("The BFG"), Value::from("Matilda")]);
    assert_eq!(store.objects("Book").unwrap().count().unwrap(), 3);
    assert!(matches!(
        store.manager("Book", "nope"),
        Err(OrmError::FieldError(_))
    ));
}
