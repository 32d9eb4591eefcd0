//! Registered transforms behave the same in filters, `values()`, and
//! expressions.

use memorm_db::functions::{count, lower};
use memorm_db::{
    Expression, FieldDef, FieldType, ModelSchema, OnDelete, OrmError, Q, Store, Transform, Value,
};

fn blogs() -> Store {
    let store = Store::new();
    store
        .register(ModelSchema::new("Blog").field(FieldDef::new("name", FieldType::CharField)))
        .unwrap();
    store
        .register(ModelSchema::new("Author").field(FieldDef::new("name", FieldType::CharField)))
        .unwrap();
    store
        .register(
            ModelSchema::new("Entry")
                .field(FieldDef::foreign_key("blog", "Blog", OnDelete::Cascade))
                .field(FieldDef::new("headline", FieldType::CharField))
                .field(FieldDef::many_to_many("authors", "Author")),
        )
        .unwrap();

    let first = store.create("Blog", [("name", "First")]).unwrap();
    let second = store.create("Blog", [("name", "Second")]).unwrap();
    let author = store.create("Author", [("name", "Test Author")]).unwrap();
    for (blog, headline) in [
        (&first, "New Lennon Biography"),
        (&first, "NEW deal"),
        (&second, "Old news"),
    ] {
        let entry = store
            .create("Entry", [("blog", Value::from(blog)), ("headline", Value::from(headline))])
            .unwrap();
        store.related(&entry, "authors").unwrap().add(&[&author]).unwrap();
    }
    store
}

#[test]
fn test_transform_needs_registration() {
    let store = blogs();
    assert!(matches!(
        store.objects("Entry").unwrap().filter(Q::new("headline__lower", "new deal")),
        Err(OrmError::FieldError(_))
    ));
}

#[test]
fn test_filter_and_annotation_agree() {
    let store = blogs();
    store.register_transform(Transform::lower());
    let entries = store.objects("Entry").unwrap();

    let by_lookup = entries
        .filter(Q::new("headline__lower__startswith", "new"))
        .unwrap();
    let by_annotation = entries
        .annotate("l", lower(Expression::f("headline")))
        .unwrap()
        .filter(Q::new("l__startswith", "new"))
        .unwrap();
    assert_eq!(by_lookup.count().unwrap(), 2);
    assert_eq!(by_lookup.items().unwrap(), by_annotation.items().unwrap());

    let exact = entries.filter(Q::new("headline__lower", "new deal")).unwrap();
    let exact_annotated = entries
        .annotate("l", lower(Expression::f("headline")))
        .unwrap()
        .filter(Q::new("l", "new deal"))
        .unwrap();
    assert_eq!(exact.count().unwrap(), 1);
    assert_eq!(exact.items().unwrap(), exact_annotated.items().unwrap());

    let lowered = entries
        .all()
        .unwrap()
        .values_list_flat(["headline__lower"])
        .unwrap()
        .items()
        .unwrap();
    assert_eq!(
        lowered,
        vec![
            Value::from("new lennon biography"),
            Value::from("new deal"),
            Value::from("old news")
        ]
    );
}

#[test]
fn test_grouping_by_a_transformed_path() {
    let store = blogs();
    store.register_transform(Transform::lower());
    let rows = store
        .objects("Blog")
        .unwrap()
        .values(["entry__authors__name__lower"])
        .unwrap()
        .annotate("entries", count("entry"))
        .unwrap()
        .items()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get::<String>("entry__authors__name__lower").unwrap(),
        "test author"
    );
    assert_eq!(rows[0].get::<i64>("entries").unwrap(), 3);
}
