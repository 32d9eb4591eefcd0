//! Filtering across foreign keys, reverse relations, and many-to-many
//! relations.

use memorm_db::functions::count;
use memorm_db::{
    Exists, Expression, FieldDef, FieldType, ModelSchema, OnDelete, OrmError, OrmResult, OuterRef, Q,
    QuerySet, Record, Store, SubqueryExpression, Value,
};

fn blog_store() -> OrmResult<Store> {
    let store = Store::new();
    store.register(
        ModelSchema::new("Blog")
            .field(FieldDef::new("name", FieldType::CharField))
            .display_field("name"),
    )?;
    store.register(
        ModelSchema::new("Author")
            .field(FieldDef::new("name", FieldType::CharField))
            .display_field("name"),
    )?;
    store.register(
        ModelSchema::new("Entry")
            .field(FieldDef::foreign_key("blog", "Blog", OnDelete::Cascade))
            .field(FieldDef::new("headline", FieldType::CharField))
            .field(FieldDef::new("pub_date", FieldType::DateField))
            .field(FieldDef::new("rating", FieldType::IntegerField).default(0))
            .field(FieldDef::many_to_many("authors", "Author"))
            .display_field("headline"),
    )?;
    Ok(store)
}

fn entry(store: &Store, blog: &Record, headline: &str, pub_date: &str) -> Record {
    store
        .create(
            "Entry",
            [
                ("blog", Value::from(blog)),
                ("headline", Value::from(headline)),
                ("pub_date", Value::from(pub_date)),
            ],
        )
        .unwrap()
}

/// Two blogs, five entries: the fixture used to tell one-call filters from
/// chained ones.
fn beatles_and_pop() -> Store {
    let store = blog_store().unwrap();
    let beatles = store.create("Blog", [("name", "Beatles Blog")]).unwrap();
    let pop = store.create("Blog", [("name", "Pop Music Blog")]).unwrap();
    entry(&store, &beatles, "New Lennon Biography", "2008-06-01");
    entry(&store, &beatles, "New Lennon Biography in Paperback", "2009-06-01");
    entry(&store, &pop, "Best Albums of 1984", "1984-06-01");
    entry(&store, &pop, "Best Albums of 2008", "2008-06-01");
    entry(&store, &pop, "Lennon Would Have Loved Hip Hop", "2020-04-01");
    store
}

fn blog_names(qs: &QuerySet) -> Vec<String> {
    qs.iter()
        .unwrap()
        .map(|blog| blog.get::<String>("name").unwrap())
        .collect()
}

#[test]
fn test_conditions_in_one_filter_share_the_join() {
    let store = beatles_and_pop();
    let blogs = store
        .objects("Blog")
        .unwrap()
        .filter(Q::new("entry__headline__contains", "Lennon") & Q::new("entry__pub_date__year", 2008))
        .unwrap();
    assert_eq!(blog_names(&blogs), vec!["Beatles Blog"]);
}

#[test]
fn test_chained_filters_join_independently() {
    let store = beatles_and_pop();
    let blogs = store
        .objects("Blog")
        .unwrap()
        .filter(Q::new("entry__headline__contains", "Lennon"))
        .unwrap()
        .filter(Q::new("entry__pub_date__year", 2008))
        .unwrap();
    assert_eq!(
        blog_names(&blogs),
        vec!["Beatles Blog", "Beatles Blog", "Pop Music Blog"]
    );
    assert_eq!(
        blogs.to_string(),
        "<QuerySet [<Blog: Beatles Blog>, <Blog: Beatles Blog>, <Blog: Pop Music Blog>]>"
    );
}

#[test]
fn test_chained_filters_are_looser_than_one_call() {
    // One blog, two entries: neither entry meets both conditions.
    let store = blog_store().unwrap();
    let blog = store.create("Blog", [("name", "Beatles Blog")]).unwrap();
    entry(&store, &blog, "Lennon Live", "2009-06-01");
    entry(&store, &blog, "Unrelated", "2008-06-01");
    let blogs = store.objects("Blog").unwrap();
    let headline = || Q::new("entry__headline__contains", "Lennon");
    let year = || Q::new("entry__pub_date__year", 2008);

    let narrow = blog_names(&blogs.filter(headline() & year()).unwrap());
    let loose = blog_names(
        &blogs
            .filter(headline())
            .unwrap()
            .filter(year())
            .unwrap(),
    );
    assert!(narrow.is_empty());
    assert_eq!(loose, vec!["Beatles Blog"]);
    assert!(narrow.iter().all(|name| loose.contains(name)));
}

#[test]
fn test_distinct_collapses_join_duplicates() {
    let store = beatles_and_pop();
    let blogs = store
        .objects("Blog")
        .unwrap()
        .filter(Q::new("entry__headline__contains", "Lennon"))
        .unwrap()
        .distinct()
        .unwrap();
    assert_eq!(blog_names(&blogs), vec!["Beatles Blog", "Pop Music Blog"]);
}

#[test]
fn test_exclude_over_a_multi_valued_relation() {
    let store = beatles_and_pop();
    let blogs = store
        .objects("Blog")
        .unwrap()
        .exclude(Q::new("entry__pub_date__year", 1984))
        .unwrap();
    assert_eq!(blog_names(&blogs), vec!["Beatles Blog"]);
}

#[test]
fn test_forward_foreign_key_paths() {
    let store = beatles_and_pop();
    let entries = store.objects("Entry").unwrap();
    assert_eq!(entries.filter(Q::new("blog__name", "Pop Music Blog")).unwrap().count().unwrap(), 3);
    assert_eq!(entries.filter(Q::new("blog", 1)).unwrap().count().unwrap(), 2);
    assert_eq!(entries.filter(Q::new("blog_id", 1)).unwrap().count().unwrap(), 2);
    assert_eq!(entries.filter(Q::new("blog__pk__in", vec![1_i64, 2])).unwrap().count().unwrap(), 5);
}

#[test]
fn test_unknown_relation_is_a_field_error() {
    let store = beatles_and_pop();
    let err = store
        .objects("Blog")
        .unwrap()
        .filter(Q::new("entries__headline", "x"))
        .unwrap_err();
    match err {
        OrmError::FieldError(message) => {
            assert!(message.starts_with("Cannot resolve keyword 'entries' into field."));
            assert!(message.contains("entry"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_many_to_many_paths() {
    let store = beatles_and_pop();
    let paul = store.create("Author", [("name", "Paul")]).unwrap();
    let ringo = store.create("Author", [("name", "Ringo")]).unwrap();
    let first = store.get("Entry", 1).unwrap();
    let second = store.get("Entry", 2).unwrap();
    store.related(&first, "authors").unwrap().add(&[&paul, &ringo]).unwrap();
    store.related(&second, "authors").unwrap().add(&[&paul]).unwrap();

    let entries = store.objects("Entry").unwrap();
    let by_paul = entries.filter(Q::new("authors__name", "Paul")).unwrap();
    assert_eq!(by_paul.count().unwrap(), 2);

    let authors = store.objects("Author").unwrap();
    let on_beatles = authors
        .filter(Q::new("entry__blog__name", "Beatles Blog"))
        .unwrap()
        .distinct()
        .unwrap();
    assert_eq!(on_beatles.count().unwrap(), 2);

    let busy = authors
        .annotate("entries", count("entry"))
        .unwrap()
        .filter(Q::new("entries__gt", 1))
        .unwrap();
    assert_eq!(busy.items().unwrap(), vec![paul.clone()]);

    let blogs = store
        .objects("Blog")
        .unwrap()
        .filter(Q::new("entry__authors__name", "Ringo"))
        .unwrap();
    assert_eq!(blog_names(&blogs), vec!["Beatles Blog"]);
}

#[test]
fn test_subquery_and_exists() {
    let store = beatles_and_pop();
    let newest = store
        .objects("Entry")
        .unwrap()
        .filter(Q::new("blog", OuterRef::new("pk")))
        .unwrap()
        .order_by(["-pub_date"])
        .unwrap()
        .values(["headline"])
        .unwrap()
        .slice(None, Some(1))
        .unwrap();
    let rows = store
        .objects("Blog")
        .unwrap()
        .annotate("newest", SubqueryExpression::from_queryset(&newest))
        .unwrap()
        .values(["name", "newest"])
        .unwrap()
        .items()
        .unwrap();
    assert_eq!(rows[0].get::<String>("newest").unwrap(), "New Lennon Biography in Paperback");
    assert_eq!(rows[1].get::<String>("newest").unwrap(), "Lennon Would Have Loved Hip Hop");

    let from_1984 = store
        .objects("Entry")
        .unwrap()
        .filter(Q::new("blog", OuterRef::new("pk")) & Q::new("pub_date__year", 1984))
        .unwrap();
    let old = store
        .objects("Blog")
        .unwrap()
        .annotate("has_old", Exists::from_queryset(&from_1984))
        .unwrap()
        .filter(Q::new("has_old", true))
        .unwrap();
    assert_eq!(blog_names(&old), vec!["Pop Music Blog"]);
}

#[test]
fn test_outer_ref_outside_a_subquery_fails_on_evaluation() {
    let store = beatles_and_pop();
    let qs = store
        .objects("Entry")
        .unwrap()
        .filter(Q::new("blog", OuterRef::new("pk")))
        .unwrap();
    assert!(matches!(qs.len(), Err(OrmError::ValueError(_))));
}

#[test]
fn test_filter_with_field_reference() {
    let store = beatles_and_pop();
    store
        .objects("Entry")
        .unwrap()
        .filter(Q::new("pk__lte", 2))
        .unwrap()
        .update([("rating", Expression::f("pk") * Expression::value(2))])
        .unwrap();
    let above = store
        .objects("Entry")
        .unwrap()
        .filter(Q::new("rating__gt", Expression::f("blog")))
        .unwrap();
    assert_eq!(above.count().unwrap(), 2);
}
