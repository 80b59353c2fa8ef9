//! Bookmark-export (NETSCAPE-Bookmark-file) import. The format is too loose
//! for an XML parser, so folders and links are recovered with a line-level
//! scan, then merged into the navigation tree with whole-tree url dedupe.

use crate::models::{CategoryNode, ImportMode, NavTree, SiteEntry};
use crate::ops;
use crate::resolver::MAX_TREE_DEPTH;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static FOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<DT[^>]*>\s*<H3[^>]*>(.*?)</H3>").expect("folder pattern"));
static LINK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<DT[^>]*>\s*<A\s+([^>]*)>(.*?)</A>").expect("link pattern"));
static HREF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)HREF="([^"]*)""#).expect("href pattern"));
static ICON_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)ICON="([^"]*)""#).expect("icon pattern"));
static LIST_OPEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<DL[^>]*>").expect("list open pattern"));
static LIST_CLOSE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</DL>").expect("list close pattern"));

#[derive(Debug, Default)]
pub struct ParsedImport {
    pub categories: Vec<CategoryNode>,
    /// Links that sat outside any folder in the export.
    pub orphans: Vec<SiteEntry>,
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub imported: usize,
    pub skipped: usize,
    pub categories_created: usize,
}

pub fn parse_bookmark_html(html: &str) -> ParsedImport {
    let mut parsed = ParsedImport::default();
    // Frames mirror <DL> nesting; None marks a list without its own folder
    // (the outer wrapper, or anything past the depth cap).
    let mut stack: Vec<Option<CategoryNode>> = Vec::new();
    let mut pending_folder: Option<CategoryNode> = None;

    for line in html.lines() {
        if let Some(capture) = FOLDER_PATTERN.captures(line) {
            let title = unescape(capture[1].trim());
            if !title.is_empty() {
                pending_folder = Some(CategoryNode::new(None, title));
            }
        }

        if let Some(capture) = LINK_PATTERN.captures(line) {
            let attrs = &capture[1];
            let title = unescape(capture[2].trim());
            if let Some(href) = HREF_PATTERN.captures(attrs) {
                let url = unescape(&href[1]);
                if !url.is_empty() && !title.is_empty() {
                    let mut entry = SiteEntry::new(title, url);
                    entry.icon = ICON_PATTERN
                        .captures(attrs)
                        .map(|icon| unescape(&icon[1]))
                        .filter(|icon| !icon.is_empty());
                    attach_site(&mut stack, &mut parsed.orphans, entry);
                }
            }
        }

        if LIST_OPEN_PATTERN.is_match(line) {
            let folder_depth = stack.iter().filter(|frame| frame.is_some()).count();
            if folder_depth >= MAX_TREE_DEPTH {
                // Too deep; fold the contents into the nearest kept folder.
                stack.push(None);
                pending_folder = None;
            } else {
                stack.push(pending_folder.take());
            }
        }

        if LIST_CLOSE_PATTERN.is_match(line) {
            if let Some(frame) = stack.pop() {
                if let Some(folder) = frame {
                    attach_folder(&mut stack, &mut parsed.categories, folder);
                }
            }
        }
    }

    // Unbalanced exports: close whatever is still open.
    while let Some(frame) = stack.pop() {
        if let Some(folder) = frame {
            attach_folder(&mut stack, &mut parsed.categories, folder);
        }
    }

    parsed
}

fn attach_site(
    stack: &mut [Option<CategoryNode>],
    orphans: &mut Vec<SiteEntry>,
    entry: SiteEntry,
) {
    for frame in stack.iter_mut().rev() {
        if let Some(folder) = frame.as_mut() {
            folder.sites.push(entry);
            return;
        }
    }
    orphans.push(entry);
}

fn attach_folder(
    stack: &mut [Option<CategoryNode>],
    roots: &mut Vec<CategoryNode>,
    folder: CategoryNode,
) {
    for frame in stack.iter_mut().rev() {
        if let Some(parent) = frame.as_mut() {
            parent.children.push(folder);
            return;
        }
    }
    roots.push(folder);
}

fn unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Merges a parsed export into the document. `Replace` swaps the category
/// list wholesale; `Merge` folds folders into same-titled existing ones.
/// Either way a url that already exists anywhere in the resulting tree wins
/// over a later import of the same url.
pub fn merge_into(tree: &mut NavTree, parsed: ParsedImport, mode: ImportMode) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut seen = HashSet::new();

    if mode == ImportMode::Replace {
        tree.categories = Vec::new();
    }
    ops::walk_sites(&tree.categories, &mut |_, site| {
        seen.insert(site.url.clone());
    });

    for mut folder in parsed.categories {
        dedupe_folder(&mut folder, &mut seen, &mut outcome, 1);
        merge_folder(&mut tree.categories, folder, &mut outcome, 1);
    }

    if !parsed.orphans.is_empty() {
        ops::ensure_reserved(tree);
        let reserved = tree
            .categories
            .iter_mut()
            .find(|node| node.id.as_deref() == Some(crate::models::RESERVED_CATEGORY_ID))
            .expect("reserved category exists after ensure_reserved");
        for entry in parsed.orphans {
            if seen.insert(entry.url.clone()) {
                reserved.sites.push(entry);
                outcome.imported += 1;
            } else {
                outcome.skipped += 1;
            }
        }
    }

    outcome
}

/// Strips already-seen urls from an incoming folder subtree, claiming the
/// rest, and tallies the counts.
fn dedupe_folder(
    folder: &mut CategoryNode,
    seen: &mut HashSet<String>,
    outcome: &mut MergeOutcome,
    depth: usize,
) {
    if depth > MAX_TREE_DEPTH {
        folder.sites.clear();
        folder.children.clear();
        return;
    }
    folder.sites.retain(|site| {
        if seen.insert(site.url.clone()) {
            outcome.imported += 1;
            true
        } else {
            outcome.skipped += 1;
            false
        }
    });
    for child in &mut folder.children {
        dedupe_folder(child, seen, outcome, depth + 1);
    }
}

fn merge_folder(
    siblings: &mut Vec<CategoryNode>,
    folder: CategoryNode,
    outcome: &mut MergeOutcome,
    depth: usize,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    match siblings
        .iter_mut()
        .find(|existing| existing.title == folder.title)
    {
        Some(existing) => {
            existing.sites.extend(folder.sites);
            for child in folder.children {
                merge_folder(&mut existing.children, child, outcome, depth + 1);
            }
        }
        None => {
            outcome.categories_created += count_folders(&folder, depth);
            // New root folders stay ahead of the reserved fallback.
            let position = siblings
                .iter()
                .position(|node| {
                    node.id.as_deref() == Some(crate::models::RESERVED_CATEGORY_ID)
                })
                .unwrap_or(siblings.len());
            siblings.insert(position, folder);
        }
    }
}

fn count_folders(folder: &CategoryNode, depth: usize) -> usize {
    if depth > MAX_TREE_DEPTH {
        return 0;
    }
    1 + folder
        .children
        .iter()
        .map(|child| count_folders(child, depth + 1))
        .sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Profile;

    const SAMPLE: &str = r#"<!DOCTYPE NETSCAPE-Bookmark-file-1>
<TITLE>Bookmarks</TITLE>
<H1>Bookmarks</H1>
<DL><p>
    <DT><H3 ADD_DATE="1700000000">Dev</H3>
    <DL><p>
        <DT><A HREF="http://a" ADD_DATE="1700000000">A &amp; Friends</A>
        <DT><H3>Tools</H3>
        <DL><p>
            <DT><A HREF="http://b" ICON="data:image/png;base64,xyz">B</A>
        </DL><p>
    </DL><p>
    <DT><A HREF="http://loose">Loose Link</A>
</DL><p>
"#;

    #[test]
    fn parses_nested_folders_links_and_orphans() {
        let parsed = parse_bookmark_html(SAMPLE);
        assert_eq!(parsed.categories.len(), 1);
        let dev = &parsed.categories[0];
        assert_eq!(dev.title, "Dev");
        assert_eq!(dev.sites.len(), 1);
        assert_eq!(dev.sites[0].title, "A & Friends");
        assert_eq!(dev.children.len(), 1);
        assert_eq!(dev.children[0].title, "Tools");
        assert_eq!(
            dev.children[0].sites[0].icon.as_deref(),
            Some("data:image/png;base64,xyz")
        );
        assert_eq!(parsed.orphans.len(), 1);
        assert_eq!(parsed.orphans[0].url, "http://loose");
    }

    #[test]
    fn merge_dedupes_by_url_across_the_whole_tree() {
        let mut dev = CategoryNode::new(Some("dev".to_string()), "Dev");
        dev.sites.push(SiteEntry::new("Existing A", "http://a"));
        let mut tree = NavTree {
            profile: Profile::default(),
            categories: vec![dev],
        };

        let parsed = parse_bookmark_html(SAMPLE);
        let outcome = merge_into(&mut tree, parsed, ImportMode::Merge);

        // http://a already lives in the tree: skipped. b + loose imported.
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.imported, 2);
        assert_eq!(tree.categories[0].sites.len(), 1);
        assert_eq!(tree.categories[0].children[0].title, "Tools");
    }

    #[test]
    fn merge_creates_missing_folders_before_reserved() {
        let mut tree = NavTree::default();
        ops::ensure_reserved(&mut tree);

        let parsed = parse_bookmark_html(SAMPLE);
        let outcome = merge_into(&mut tree, parsed, ImportMode::Merge);

        assert_eq!(outcome.imported, 3);
        assert_eq!(outcome.categories_created, 2);
        assert_eq!(tree.categories[0].title, "Dev");
        assert_eq!(
            tree.categories.last().unwrap().id.as_deref(),
            Some(crate::models::RESERVED_CATEGORY_ID)
        );
    }

    #[test]
    fn replace_discards_the_previous_categories() {
        let mut old = CategoryNode::new(None, "Old");
        old.sites.push(SiteEntry::new("Old", "http://old"));
        let mut tree = NavTree {
            profile: Profile::default(),
            categories: vec![old],
        };

        let parsed = parse_bookmark_html(SAMPLE);
        let outcome = merge_into(&mut tree, parsed, ImportMode::Replace);

        assert_eq!(outcome.imported, 3);
        assert!(tree
            .categories
            .iter()
            .all(|category| category.title != "Old"));
    }
}
