use crate::adapter::DocSession;
use crate::defaults;
use crate::errors::{AppError, AppResult};
use crate::import;
use crate::models::{
    Address, AppSettings, BatchSitesPayload, BatchSummary, CategoryNode, CreateCategoryPayload,
    ImportPayload, ImportSummary, NavStatus, NavTree, PlanKind, ReorderPayload, SaveOutcome,
    SearchResult, SiteAddPayload, SiteDeletePayload, SiteEntry, SiteMovePayload,
    SiteUpdatePayload, SubcategoryAddPayload, UpdateCategoryPayload,
};
use crate::ops;
use crate::planner::{self, WritePlan};
use crate::store::Database;
use uuid::Uuid;

fn load_or_default(session: &DocSession<'_>) -> AppResult<NavTree> {
    Ok(session.read_document()?.unwrap_or_else(defaults::starter_tree))
}

/// Loads the document for a mutating command. The reserved-category repair
/// runs opportunistically here; when it changed anything the fix-up is
/// persisted before the command proceeds.
fn prepare(session: &DocSession<'_>) -> AppResult<NavTree> {
    let uninitialized = session.read_document()?.is_none();
    let mut tree = load_or_default(session)?;
    if ops::ensure_reserved(&mut tree) || uninitialized {
        session.write_document(&tree)?;
    }
    Ok(tree)
}

/// Plans old-vs-new and issues the minimal write. A partial write that hits
/// an internal inconsistency falls back to a full snapshot rather than
/// dropping the update.
pub(crate) fn commit(
    session: &DocSession<'_>,
    current: &NavTree,
    next: &NavTree,
) -> AppResult<SaveOutcome> {
    let outcome = match planner::plan_write(current, next) {
        WritePlan::None => SaveOutcome {
            plan: PlanKind::None,
            updated_folders: 0,
        },
        WritePlan::Partial(updates) => match session.write_folder_sites_bulk(&updates) {
            Ok(()) => SaveOutcome {
                plan: PlanKind::Partial,
                updated_folders: updates.len(),
            },
            Err(AppError::Internal(message)) => {
                tracing::warn!(error = %message, "partial write failed, falling back to full snapshot");
                session.write_document(next)?;
                SaveOutcome {
                    plan: PlanKind::Full,
                    updated_folders: updates.len(),
                }
            }
            Err(other) => return Err(other),
        },
        WritePlan::Full => {
            session.write_document(next)?;
            SaveOutcome {
                plan: PlanKind::Full,
                updated_folders: 0,
            }
        }
    };
    tracing::debug!(plan = outcome.plan.as_str(), "navigation write committed");
    Ok(outcome)
}

/// Whole tree for display. The bundled starter document is persisted on the
/// first ever read so later partial writes have a base to patch.
pub fn nav_get(db: &Database) -> AppResult<NavTree> {
    let session = DocSession::new(db);
    match session.read_document()? {
        Some(tree) => Ok(tree),
        None => {
            let mut tree = defaults::starter_tree();
            ops::ensure_reserved(&mut tree);
            session.write_document(&tree)?;
            Ok(tree)
        }
    }
}

pub fn nav_status(db: &Database) -> AppResult<NavStatus> {
    let session = DocSession::new(db);
    let document = session.read_document()?;
    let stats = document
        .as_ref()
        .map(|tree| ops::tree_stats(&tree.categories))
        .unwrap_or_default();
    Ok(NavStatus {
        initialized: document.is_some(),
        last_updated_at: session.last_updated()?,
        category_count: stats.categories,
        site_count: stats.sites,
        max_depth: stats.max_depth,
    })
}

/// Admin-supplied whole tree. The planner decides whether this costs a full
/// snapshot, a folder-level partial write, or nothing at all.
pub fn nav_save(db: &Database, incoming: NavTree) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = session.read_document()?;
    let mut next = incoming;
    ops::ensure_reserved(&mut next);

    match current {
        None => {
            session.write_document(&next)?;
            Ok(SaveOutcome {
                plan: PlanKind::Full,
                updated_folders: 0,
            })
        }
        Some(current) => commit(&session, &current, &next),
    }
}

/// Wipes the navigation keyspace and the favicon cache.
pub fn nav_reset(db: &Database) -> AppResult<()> {
    db.clear_navigation()?;
    tracing::info!("navigation store reset");
    Ok(())
}

/// Linear case-insensitive substring scan over titles, urls and
/// descriptions. There is deliberately no index behind this.
pub fn nav_search(db: &Database, query: &str) -> AppResult<Vec<SearchResult>> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let session = DocSession::new(db);
    let tree = load_or_default(&session)?;

    let mut results = Vec::new();
    ops::walk_sites(&tree.categories, &mut |path, site| {
        let haystacks = [
            Some(site.title.as_str()),
            Some(site.url.as_str()),
            site.description.as_deref(),
        ];
        if haystacks
            .iter()
            .flatten()
            .any(|text| text.to_lowercase().contains(&needle))
        {
            results.push(SearchResult {
                title: site.title.clone(),
                url: site.url.clone(),
                description: site.description.clone(),
                category_path: path.to_vec(),
            });
        }
    });
    Ok(results)
}

fn root_position_by_id(tree: &NavTree, id: &str) -> AppResult<usize> {
    tree.categories
        .iter()
        .position(|node| node.id.as_deref() == Some(id))
        .ok_or_else(|| AppError::NotFound(format!("Category '{}' not found", id)))
}

/// Legacy pre-hierarchy endpoint: creates a root-level category by id.
pub fn category_create(db: &Database, payload: CreateCategoryPayload) -> AppResult<CategoryNode> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    ops::add_root_category(&mut next, &payload)?;
    commit(&session, &current, &next)?;
    let position = root_position_by_id(&next, &payload.id)?;
    Ok(next.categories[position].clone())
}

/// Legacy pre-hierarchy endpoint: renames or re-icons a root category.
pub fn category_update(
    db: &Database,
    id: &str,
    payload: UpdateCategoryPayload,
) -> AppResult<CategoryNode> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    let position = root_position_by_id(&next, id)?;
    ops::edit_category(&mut next, &Address::Index(vec![position]), &payload)?;
    commit(&session, &current, &next)?;
    Ok(next.categories[position].clone())
}

/// Legacy pre-hierarchy endpoint: deletes a root category and its subtree.
pub fn category_delete(db: &Database, id: &str) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    let position = root_position_by_id(&next, id)?;
    let removed = ops::delete_category(&mut next, &Address::Index(vec![position]))?;
    let stats = ops::tree_stats(std::slice::from_ref(&removed));
    tracing::info!(
        id = %id,
        categories = stats.categories,
        sites = stats.sites,
        "category subtree deleted"
    );
    commit(&session, &current, &next)
}

pub fn subcategory_add(db: &Database, payload: SubcategoryAddPayload) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    ops::add_subcategory(&mut next, &payload)?;
    commit(&session, &current, &next)
}

pub fn category_edit_at(
    db: &Database,
    target: Address,
    payload: UpdateCategoryPayload,
) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    ops::edit_category(&mut next, &target, &payload)?;
    commit(&session, &current, &next)
}

pub fn category_delete_at(db: &Database, target: Address) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    let removed = ops::delete_category(&mut next, &target)?;
    let stats = ops::tree_stats(std::slice::from_ref(&removed));
    tracing::info!(
        title = %removed.title,
        categories = stats.categories,
        sites = stats.sites,
        "category subtree deleted"
    );
    commit(&session, &current, &next)
}

pub fn categories_reorder(db: &Database, payload: ReorderPayload) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    ops::reorder_categories(&mut next, payload.parent.as_ref(), &payload.order)?;
    commit(&session, &current, &next)
}

pub fn sites_reorder(
    db: &Database,
    category: Address,
    order: Vec<String>,
) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    ops::reorder_sites(&mut next, &category, &order)?;
    commit(&session, &current, &next)
}

pub fn site_add(db: &Database, payload: SiteAddPayload) -> AppResult<SiteEntry> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    let entry = ops::add_site(&mut next, payload.category.as_ref(), &payload.site)?;
    commit(&session, &current, &next)?;
    Ok(entry)
}

pub fn site_update(db: &Database, payload: SiteUpdatePayload) -> AppResult<SiteEntry> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    let entry = ops::update_site(&mut next, &payload.category, &payload.title, &payload.patch)?;
    commit(&session, &current, &next)?;
    Ok(entry)
}

pub fn site_delete(db: &Database, payload: SiteDeletePayload) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    ops::delete_site(&mut next, &payload.category, &payload.title)?;
    commit(&session, &current, &next)
}

pub fn site_move(db: &Database, payload: SiteMovePayload) -> AppResult<SaveOutcome> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    ops::move_site(&mut next, &payload.from, payload.to.as_ref(), &payload.title)?;
    commit(&session, &current, &next)
}

/// Batched site edits: item failures are accumulated into the summary and
/// whatever succeeded is persisted in one pass.
pub fn sites_batch(db: &Database, payload: BatchSitesPayload) -> AppResult<BatchSummary> {
    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    let summary = ops::apply_batch(&mut next, &payload.items);
    commit(&session, &current, &next)?;
    Ok(summary)
}

pub fn bookmarks_import(db: &Database, payload: ImportPayload) -> AppResult<ImportSummary> {
    let parsed = import::parse_bookmark_html(&payload.html);
    if parsed.categories.is_empty() && parsed.orphans.is_empty() {
        return Err(AppError::Validation(
            "No bookmarks found in the uploaded document".to_string(),
        ));
    }

    let session = DocSession::new(db);
    let current = prepare(&session)?;
    let mut next = current.clone();
    let outcome = import::merge_into(&mut next, parsed, payload.mode);
    ops::ensure_reserved(&mut next);
    commit(&session, &current, &next)?;

    Ok(ImportSummary {
        batch_id: Uuid::new_v4().to_string(),
        imported: outcome.imported,
        skipped: outcome.skipped,
        categories_created: outcome.categories_created,
    })
}

pub fn settings_get(db: &Database) -> AppResult<AppSettings> {
    db.get_settings()
}

pub fn settings_update(db: &Database, update: serde_json::Value) -> AppResult<AppSettings> {
    db.update_settings(update)
}

/// A deployment without a configured token leaves the admin surface open;
/// that is the single-admin model, not an oversight.
pub fn verify_admin_token(db: &Database, token: Option<&str>) -> AppResult<bool> {
    let settings = db.get_settings()?;
    Ok(match settings.admin_token.as_deref() {
        None => true,
        Some(expected) => token == Some(expected),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("links.db")).expect("open database");
        (dir, db)
    }

    #[test]
    fn first_read_persists_the_starter_document() {
        let (_dir, db) = open_temp();
        assert!(!nav_status(&db).unwrap().initialized);
        let tree = nav_get(&db).unwrap();
        assert!(!tree.categories.is_empty());
        assert!(nav_status(&db).unwrap().initialized);
    }

    #[test]
    fn search_is_case_insensitive_and_reports_paths() {
        let (_dir, db) = open_temp();
        nav_get(&db).unwrap();
        let results = nav_search(&db, "gitHUB").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].category_path, vec!["Tools".to_string()]);
        assert!(nav_search(&db, "").unwrap().is_empty());
    }

    #[test]
    fn admin_token_verification() {
        let (_dir, db) = open_temp();
        assert!(verify_admin_token(&db, None).unwrap());
        settings_update(&db, serde_json::json!({"adminToken": "s3cret"})).unwrap();
        assert!(!verify_admin_token(&db, None).unwrap());
        assert!(!verify_admin_token(&db, Some("wrong")).unwrap());
        assert!(verify_admin_token(&db, Some("s3cret")).unwrap());
    }
}
