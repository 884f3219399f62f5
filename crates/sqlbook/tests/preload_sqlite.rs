//! Eager loading against in-memory SQLite: one query per path segment.

mod common;

use common::{Recording, User, setup};
use sqlbook::{Clause, Search, UsageErrorKind, Value};

/// Three users: ada (two posts, profile, company 1), bob (one post),
/// cyd (nothing).
fn seed(conn: &Recording) {
    conn.raw(
        "
        INSERT INTO companies (id, name) VALUES (1, 'acme'), (2, 'globex');
        INSERT INTO users (id, name, company_id) VALUES (1, 'ada', 1), (2, 'bob', 2), (3, 'cyd', 0);
        INSERT INTO posts (id, user_id, title) VALUES (1, 1, 'engines'), (2, 1, 'notes'), (3, 2, 'bits');
        INSERT INTO comments (id, post_id, body) VALUES (1, 1, 'great'), (2, 1, 'spam'), (3, 3, 'ok');
        INSERT INTO profiles (id, user_id, bio) VALUES (1, 1, 'mathematician');
        INSERT INTO languages (id, name) VALUES (1, 'en'), (2, 'fr');
        INSERT INTO user_languages (user_id, language_id) VALUES (1, 1), (1, 2), (2, 1);
        INSERT INTO toys (id, name, owner_id, owner_type) VALUES (1, 'ball', 1, 'users'), (2, 'bone', 1, 'pets');
        ",
    );
    conn.clear();
}

fn by_name<'a>(users: &'a [User], name: &str) -> &'a User {
    users.iter().find(|u| u.name == name).unwrap()
}

#[test]
fn has_many_issues_one_query_for_all_owners() {
    let (engine, conn) = setup();
    seed(&conn);

    let users: Vec<User> = engine.find(Search::new().preload("Posts")).unwrap();
    assert_eq!(users.len(), 3);
    assert_eq!(
        conn.take_selects(),
        vec![
            "SELECT * FROM \"users\"",
            "SELECT * FROM \"posts\" WHERE (\"user_id\" IN (?1,?2,?3))",
        ]
    );

    let titles = |u: &User| u.posts.iter().map(|p| p.title.clone()).collect::<Vec<_>>();
    assert_eq!(titles(by_name(&users, "ada")), vec!["engines", "notes"]);
    assert_eq!(titles(by_name(&users, "bob")), vec!["bits"]);
    assert!(by_name(&users, "cyd").posts.is_empty());
}

#[test]
fn nested_path_loads_each_level_once() {
    let (engine, conn) = setup();
    seed(&conn);

    let users: Vec<User> = engine
        .find(Search::new().preload("Posts.Comments"))
        .unwrap();
    assert_eq!(conn.take_selects().len(), 3);

    let ada = by_name(&users, "ada");
    let engines = ada.posts.iter().find(|p| p.title == "engines").unwrap();
    let bodies: Vec<&str> = engines.comments.iter().map(|c| c.body.as_str()).collect();
    assert_eq!(bodies, vec!["great", "spam"]);
    assert!(ada.posts.iter().find(|p| p.title == "notes").unwrap().comments.is_empty());
    assert_eq!(by_name(&users, "bob").posts[0].comments.len(), 1);
}

#[test]
fn nested_path_stops_when_a_level_is_empty() {
    let (engine, conn) = setup();
    seed(&conn);

    let users: Vec<User> = engine
        .find(
            Search::new()
                .filter("name = ?", vec!["cyd".into()])
                .preload("Posts.Comments"),
        )
        .unwrap();
    assert_eq!(users.len(), 1);
    assert!(users[0].posts.is_empty());
    let selects = conn.take_selects();
    assert_eq!(selects.len(), 2, "{selects:?}");
    assert!(selects.iter().all(|s| !s.contains("comments")));
}

#[test]
fn shared_prefix_is_loaded_once() {
    let (engine, conn) = setup();
    seed(&conn);

    let users: Vec<User> = engine
        .find(Search::new().preload("Posts").preload("Posts.Comments"))
        .unwrap();
    let selects = conn.take_selects();
    assert_eq!(selects.iter().filter(|s| s.contains("\"posts\"")).count(), 1);
    assert_eq!(selects.len(), 3);
    assert_eq!(by_name(&users, "ada").posts.len(), 2);
}

#[test]
fn conditions_apply_to_the_last_segment_only() {
    let (engine, conn) = setup();
    seed(&conn);

    let users: Vec<User> = engine
        .find(Search::new().preload_with(
            "Posts.Comments",
            vec![Clause::new("body <> ?", vec!["spam".into()])],
        ))
        .unwrap();

    let selects = conn.take_selects();
    assert!(!selects[1].contains("body"));
    assert!(selects[2].contains("(body <> ?"));

    let ada = by_name(&users, "ada");
    assert_eq!(ada.posts.len(), 2);
    let engines = ada.posts.iter().find(|p| p.title == "engines").unwrap();
    assert_eq!(engines.comments.len(), 1);
    assert_eq!(engines.comments[0].body, "great");
}

#[test]
fn belongs_to_and_has_one() {
    let (engine, conn) = setup();
    seed(&conn);

    let users: Vec<User> = engine
        .find(Search::new().preload("Company").preload("Profile"))
        .unwrap();
    assert_eq!(conn.take_selects().len(), 3);

    let ada = by_name(&users, "ada");
    assert_eq!(ada.company.as_ref().map(|c| c.name.as_str()), Some("acme"));
    assert_eq!(ada.profile.as_ref().map(|p| p.bio.as_str()), Some("mathematician"));

    let bob = by_name(&users, "bob");
    assert_eq!(bob.company.as_ref().map(|c| c.name.as_str()), Some("globex"));
    assert!(bob.profile.is_none());

    let cyd = by_name(&users, "cyd");
    assert!(cyd.company.is_none());
}

#[test]
fn many_to_many_groups_by_owner() {
    let (engine, conn) = setup();
    seed(&conn);

    let users: Vec<User> = engine.find(Search::new().preload("Languages")).unwrap();
    let selects = conn.take_selects();
    assert_eq!(selects.len(), 2);
    assert!(selects[1].contains("INNER JOIN \"user_languages\""));

    let names = |u: &User| {
        let mut names: Vec<String> = u.languages.iter().map(|l| l.name.clone()).collect();
        names.sort();
        names
    };
    assert_eq!(names(by_name(&users, "ada")), vec!["en", "fr"]);
    assert_eq!(names(by_name(&users, "bob")), vec!["en"]);
    assert!(by_name(&users, "cyd").languages.is_empty());
}

#[test]
fn polymorphic_preload_filters_on_type() {
    let (engine, conn) = setup();
    seed(&conn);

    let users: Vec<User> = engine.find(Search::new().preload("Toys")).unwrap();
    let selects = conn.take_selects();
    assert!(selects[1].contains("\"owner_type\" = ?"));

    let ada = by_name(&users, "ada");
    assert_eq!(ada.toys.len(), 1);
    assert_eq!(ada.toys[0].name, "ball");
}

#[test]
fn single_record_destination() {
    let (engine, conn) = setup();
    seed(&conn);

    let ada: User = engine
        .find_one(
            Search::new()
                .filter("id = ?", vec![Value::Int(1)])
                .preload("Posts.Comments")
                .preload("Languages"),
        )
        .unwrap();
    assert_eq!(ada.posts.len(), 2);
    assert_eq!(ada.languages.len(), 2);
    assert_eq!(conn.take_selects().len(), 4);
}

#[test]
fn unknown_segment_is_a_usage_error() {
    let (engine, conn) = setup();
    seed(&conn);

    let err = engine
        .find::<User>(Search::new().preload("Posts.Likes"))
        .unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnresolvedPreload));
    assert!(err.to_string().contains("Likes"));
}
