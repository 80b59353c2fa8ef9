//! Document-level persistence. A `DocSession` lives for exactly one inbound
//! command: the first whole-document read fills a transient cache that later
//! reads within the same command reuse, and the session is dropped with the
//! command so no staleness leaks across requests.

use crate::errors::{AppError, AppResult};
use crate::models::{Address, NavTree, SiteEntry};
use crate::planner::FolderUpdate;
use crate::resolver;
use crate::store::{Database, NAV_TREE_KEY, NAV_UPDATED_KEY};
use chrono::{DateTime, Utc};
use std::cell::RefCell;

pub struct DocSession<'a> {
    db: &'a Database,
    cached: RefCell<Option<NavTree>>,
}

impl<'a> DocSession<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            cached: RefCell::new(None),
        }
    }

    pub fn read_document(&self) -> AppResult<Option<NavTree>> {
        if let Some(tree) = self.cached.borrow().as_ref() {
            return Ok(Some(tree.clone()));
        }
        let Some(raw) = self.db.read_kv(NAV_TREE_KEY)? else {
            return Ok(None);
        };
        let tree: NavTree = serde_json::from_str(&raw)?;
        *self.cached.borrow_mut() = Some(tree.clone());
        Ok(Some(tree))
    }

    /// Single key-value put of the whole document plus a last-updated stamp.
    pub fn write_document(&self, tree: &NavTree) -> AppResult<()> {
        self.db.write_kv(NAV_TREE_KEY, &serde_json::to_string(tree)?)?;
        self.db
            .write_kv(NAV_UPDATED_KEY, &Utc::now().to_rfc3339())?;
        *self.cached.borrow_mut() = Some(tree.clone());
        Ok(())
    }

    pub fn read_folder_sites(&self, title_path: &[String]) -> AppResult<Vec<SiteEntry>> {
        let tree = self.read_document()?.ok_or_else(|| {
            AppError::NotFound("Navigation document is not initialized".to_string())
        })?;
        let resolved =
            resolver::resolve(&tree.categories, &Address::Title(title_path.to_vec()))?;
        let node = resolver::node_at(&tree.categories, &resolved.indices)
            .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;
        Ok(node.sites.clone())
    }

    /// Applies every site-list replacement in memory by title-path walk and
    /// performs exactly one whole-document write for the entire batch.
    pub fn write_folder_sites_bulk(&self, updates: &[FolderUpdate]) -> AppResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tree = self.read_document()?.ok_or_else(|| {
            AppError::NotFound("Navigation document is not initialized".to_string())
        })?;

        for update in updates {
            let resolved = resolver::resolve(
                &tree.categories,
                &Address::Title(update.title_path.clone()),
            )
            .map_err(|_| {
                AppError::Internal(format!(
                    "Folder {:?} disappeared between planning and write",
                    update.title_path
                ))
            })?;
            let node = resolver::node_at_mut(&mut tree.categories, &resolved.indices)
                .ok_or_else(|| AppError::Internal("Resolved category vanished".to_string()))?;
            node.sites = update.sites.clone();
        }

        self.write_document(&tree)
    }

    pub fn last_updated(&self) -> AppResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.db.read_kv(NAV_UPDATED_KEY)? else {
            return Ok(None);
        };
        let stamp = DateTime::parse_from_rfc3339(&raw)
            .map_err(|err| AppError::Internal(format!("Bad last-updated stamp: {}", err)))?
            .with_timezone(&Utc);
        Ok(Some(stamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryNode, Profile};

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("links.db")).expect("open database");
        (dir, db)
    }

    fn sample_tree() -> NavTree {
        let mut dev = CategoryNode::new(Some("dev".to_string()), "Dev");
        dev.sites.push(SiteEntry::new("A", "http://a"));
        let media = CategoryNode::new(None, "Media");
        NavTree {
            profile: Profile::default(),
            categories: vec![dev, media],
        }
    }

    #[test]
    fn document_round_trip_with_timestamp() {
        let (_dir, db) = open_temp();
        let session = DocSession::new(&db);
        assert!(session.read_document().unwrap().is_none());
        assert!(session.last_updated().unwrap().is_none());

        session.write_document(&sample_tree()).unwrap();
        let loaded = session.read_document().unwrap().unwrap();
        assert_eq!(loaded.categories.len(), 2);
        assert!(session.last_updated().unwrap().is_some());
    }

    #[test]
    fn folder_sites_read_resolves_title_paths() {
        let (_dir, db) = open_temp();
        let session = DocSession::new(&db);
        session.write_document(&sample_tree()).unwrap();

        let sites = session.read_folder_sites(&["Dev".to_string()]).unwrap();
        assert_eq!(sites.len(), 1);
        assert!(session.read_folder_sites(&["Nope".to_string()]).is_err());
    }

    #[test]
    fn bulk_write_applies_all_updates_in_one_document() {
        let (_dir, db) = open_temp();
        let session = DocSession::new(&db);
        session.write_document(&sample_tree()).unwrap();

        let updates = vec![
            FolderUpdate {
                title_path: vec!["Dev".to_string()],
                sites: Vec::new(),
            },
            FolderUpdate {
                title_path: vec!["Media".to_string()],
                sites: vec![SiteEntry::new("M", "http://m")],
            },
        ];
        session.write_folder_sites_bulk(&updates).unwrap();

        let fresh = DocSession::new(&db);
        let tree = fresh.read_document().unwrap().unwrap();
        assert!(tree.categories[0].sites.is_empty());
        assert_eq!(tree.categories[1].sites[0].url, "http://m");
    }

    #[test]
    fn bulk_write_with_unknown_path_fails_loudly() {
        let (_dir, db) = open_temp();
        let session = DocSession::new(&db);
        session.write_document(&sample_tree()).unwrap();

        let updates = vec![FolderUpdate {
            title_path: vec!["Ghost".to_string()],
            sites: Vec::new(),
        }];
        assert!(matches!(
            session.write_folder_sites_bulk(&updates),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn session_cache_serves_repeat_reads() {
        let (_dir, db) = open_temp();
        let writer = DocSession::new(&db);
        writer.write_document(&sample_tree()).unwrap();

        let reader = DocSession::new(&db);
        let first = reader.read_document().unwrap().unwrap();

        // A concurrent writer lands a new document; the open session keeps
        // serving its own snapshot, a fresh session sees the new state.
        let concurrent = DocSession::new(&db);
        let mut changed = first.clone();
        changed.categories[0].sites.clear();
        concurrent.write_document(&changed).unwrap();

        let second = reader.read_document().unwrap().unwrap();
        assert_eq!(first, second);
        let fresh = DocSession::new(&db);
        assert!(fresh.read_document().unwrap().unwrap().categories[0]
            .sites
            .is_empty());
    }
}
