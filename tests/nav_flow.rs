use linkboard::commands;
use linkboard::models::{
    Address, BatchSiteItem, BatchSitesPayload, CategoryNode, CreateCategoryPayload, NavTree,
    PlanKind, Profile, ReorderPayload, SiteAddPayload, SiteInput, SiteMovePayload,
    RESERVED_CATEGORY_ID,
};
use linkboard::store::{Database, NAV_TREE_KEY};
use linkboard::DocSession;

fn open_temp() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::new(&dir.path().join("links.db")).expect("open database");
    (dir, db)
}

fn site_input(title: &str, url: &str) -> SiteInput {
    SiteInput {
        title: title.to_string(),
        url: url.to_string(),
        description: None,
        icon: None,
    }
}

fn seed_single_dev_category(db: &Database) {
    let mut dev = CategoryNode::new(Some("dev".to_string()), "Dev");
    dev.sites.push({
        let mut entry = linkboard::models::SiteEntry::new("A", "http://a");
        entry.description = Some("first".to_string());
        entry
    });
    let tree = NavTree {
        profile: Profile::default(),
        categories: vec![dev],
    };
    commands::nav_save(db, tree).expect("seed tree");
}

#[test]
fn move_site_to_uncategorized_is_a_partial_write_touching_both_folders() {
    let (_dir, db) = open_temp();
    seed_single_dev_category(&db);

    let outcome = commands::site_move(
        &db,
        SiteMovePayload {
            from: Address::Title(vec!["Dev".to_string()]),
            to: None,
            title: "A".to_string(),
        },
    )
    .expect("move site");

    assert_eq!(outcome.plan, PlanKind::Partial);
    assert_eq!(outcome.updated_folders, 2);

    let tree = commands::nav_get(&db).unwrap();
    let dev = tree
        .categories
        .iter()
        .find(|node| node.id.as_deref() == Some("dev"))
        .unwrap();
    assert!(dev.sites.is_empty());

    let reserved = tree
        .categories
        .iter()
        .find(|node| node.id.as_deref() == Some(RESERVED_CATEGORY_ID))
        .unwrap();
    assert_eq!(reserved.sites.len(), 1);
    assert_eq!(reserved.sites[0].url, "http://a");
    assert_eq!(reserved.sites[0].description.as_deref(), Some("first"));
}

#[test]
fn reordering_root_categories_is_a_full_write_in_the_requested_order() {
    let (_dir, db) = open_temp();
    let tree = NavTree {
        profile: Profile::default(),
        categories: vec![
            CategoryNode::new(Some("a".to_string()), "A"),
            CategoryNode::new(Some("b".to_string()), "B"),
            CategoryNode::new(Some("c".to_string()), "C"),
        ],
    };
    commands::nav_save(&db, tree).unwrap();

    let outcome = commands::categories_reorder(
        &db,
        ReorderPayload {
            parent: None,
            order: vec!["c".to_string(), "a".to_string(), "b".to_string()],
        },
    )
    .unwrap();
    assert_eq!(outcome.plan, PlanKind::Full);

    let titles: Vec<String> = commands::nav_get(&db)
        .unwrap()
        .categories
        .iter()
        .map(|node| node.title.clone())
        .collect();
    // The reserved fallback was not named in the order, so it trails.
    assert_eq!(titles, vec!["C", "A", "B", "Uncategorized"]);
}

#[test]
fn saving_an_identical_tree_writes_nothing() {
    let (_dir, db) = open_temp();
    seed_single_dev_category(&db);

    let status_before = commands::nav_status(&db).unwrap();
    let tree = commands::nav_get(&db).unwrap();
    let outcome = commands::nav_save(&db, tree).unwrap();
    assert_eq!(outcome.plan, PlanKind::None);
    let status_after = commands::nav_status(&db).unwrap();
    assert_eq!(
        status_before.last_updated_at,
        status_after.last_updated_at
    );
}

#[test]
fn duplicate_url_in_one_category_is_a_conflict() {
    let (_dir, db) = open_temp();
    seed_single_dev_category(&db);

    let result = commands::site_add(
        &db,
        SiteAddPayload {
            category: Some(Address::Id(vec!["dev".to_string()])),
            site: site_input("A again", "http://a"),
        },
    );
    assert!(matches!(
        result,
        Err(linkboard::AppError::Conflict(_))
    ));

    let tree = commands::nav_get(&db).unwrap();
    assert_eq!(tree.categories[0].sites.len(), 1);
}

#[test]
fn batch_deletes_report_partial_success() {
    let (_dir, db) = open_temp();
    seed_single_dev_category(&db);
    for (title, url) in [("B", "http://b"), ("C", "http://c")] {
        commands::site_add(
            &db,
            SiteAddPayload {
                category: Some(Address::Id(vec!["dev".to_string()])),
                site: site_input(title, url),
            },
        )
        .unwrap();
    }

    let dev = Address::Id(vec!["dev".to_string()]);
    let items = vec![
        BatchSiteItem::Delete {
            category: dev.clone(),
            title: "A".to_string(),
        },
        BatchSiteItem::Delete {
            category: dev.clone(),
            title: "ghost-one".to_string(),
        },
        BatchSiteItem::Delete {
            category: dev.clone(),
            title: "B".to_string(),
        },
        BatchSiteItem::Delete {
            category: dev.clone(),
            title: "ghost-two".to_string(),
        },
        BatchSiteItem::Delete {
            category: dev.clone(),
            title: "C".to_string(),
        },
    ];
    let summary = commands::sites_batch(&db, BatchSitesPayload { items }).unwrap();

    assert_eq!(summary.deleted, 3);
    assert_eq!(summary.errors.len(), 2);

    let tree = commands::nav_get(&db).unwrap();
    let dev = tree
        .categories
        .iter()
        .find(|node| node.id.as_deref() == Some("dev"))
        .unwrap();
    assert!(dev.sites.is_empty());
}

#[test]
fn reserved_category_repair_is_persisted() {
    let (_dir, db) = open_temp();
    // A hand-written document with a shapeless reserved category: no id, no
    // icon, and no children/sites fields at all.
    let raw = r#"{"profile":{"name":"x"},"categories":[{"title":"Uncategorized"}]}"#;
    db.write_kv(NAV_TREE_KEY, raw).unwrap();

    commands::site_add(
        &db,
        SiteAddPayload {
            category: None,
            site: site_input("Loose", "http://loose"),
        },
    )
    .unwrap();

    let persisted = db.read_kv(NAV_TREE_KEY).unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&persisted).unwrap();
    let reserved = &value["categories"][0];
    assert_eq!(reserved["id"], RESERVED_CATEGORY_ID);
    assert!(reserved["icon"].is_string());
    assert!(reserved["children"].is_array());
    assert_eq!(reserved["sites"][0]["url"], "http://loose");
}

#[test]
fn legacy_root_category_crud_round_trip() {
    let (_dir, db) = open_temp();
    commands::nav_get(&db).unwrap();

    let created = commands::category_create(
        &db,
        CreateCategoryPayload {
            id: "media".to_string(),
            title: "Media".to_string(),
            icon: Some("🎬".to_string()),
        },
    )
    .unwrap();
    assert_eq!(created.id.as_deref(), Some("media"));

    // New categories land ahead of the reserved fallback.
    let tree = commands::nav_get(&db).unwrap();
    assert_eq!(
        tree.categories.last().unwrap().id.as_deref(),
        Some(RESERVED_CATEGORY_ID)
    );

    let updated = commands::category_update(
        &db,
        "media",
        linkboard::models::UpdateCategoryPayload {
            title: Some("Video".to_string()),
            icon: None,
        },
    )
    .unwrap();
    assert_eq!(updated.title, "Video");

    commands::category_delete(&db, "media").unwrap();
    assert!(matches!(
        commands::category_delete(&db, "media"),
        Err(linkboard::AppError::NotFound(_))
    ));
}

#[test]
fn import_merges_and_dedupes_against_the_existing_tree() {
    let (_dir, db) = open_temp();
    seed_single_dev_category(&db);

    let html = r#"<DL><p>
    <DT><H3>Dev</H3>
    <DL><p>
        <DT><A HREF="http://a">Duplicate of A</A>
        <DT><A HREF="http://fresh">Fresh</A>
    </DL><p>
</DL><p>"#;

    let summary = commands::bookmarks_import(
        &db,
        linkboard::models::ImportPayload {
            html: html.to_string(),
            mode: linkboard::models::ImportMode::Merge,
        },
    )
    .unwrap();
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.skipped, 1);

    let tree = commands::nav_get(&db).unwrap();
    let dev = tree
        .categories
        .iter()
        .find(|node| node.title == "Dev")
        .unwrap();
    let urls: Vec<&str> = dev.sites.iter().map(|site| site.url.as_str()).collect();
    assert_eq!(urls, vec!["http://a", "http://fresh"]);
}

#[test]
fn reset_clears_the_document_and_a_fresh_read_reseeds() {
    let (_dir, db) = open_temp();
    seed_single_dev_category(&db);
    commands::nav_reset(&db).unwrap();

    assert!(!commands::nav_status(&db).unwrap().initialized);
    let tree = commands::nav_get(&db).unwrap();
    assert!(tree
        .categories
        .iter()
        .all(|node| node.id.as_deref() != Some("dev")));
}

#[test]
fn index_paths_are_recomputed_not_cached_across_mutations() {
    let (_dir, db) = open_temp();
    let tree = NavTree {
        profile: Profile::default(),
        categories: vec![
            CategoryNode::new(Some("a".to_string()), "A"),
            CategoryNode::new(Some("b".to_string()), "B"),
        ],
    };
    commands::nav_save(&db, tree).unwrap();

    // Delete A, then address position 0 again: it must now mean B.
    commands::category_delete_at(&db, Address::Index(vec![0])).unwrap();
    let session = DocSession::new(&db);
    let current = session.read_document().unwrap().unwrap();
    assert_eq!(current.categories[0].title, "B");
}
