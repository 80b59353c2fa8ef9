use crate::models::{CategoryNode, NavTree, Profile, SiteEntry};

/// Starter document persisted on first read when the store holds nothing.
pub fn starter_tree() -> NavTree {
    let mut tools = CategoryNode::new(Some("tools".to_string()), "Tools");
    tools.icon = Some("🧰".to_string());
    tools.sites.push(site(
        "GitHub",
        "https://github.com",
        "Where the code lives",
    ));
    tools.sites.push(site(
        "Wikipedia",
        "https://www.wikipedia.org",
        "Look it up",
    ));

    let mut reading = CategoryNode::new(Some("reading".to_string()), "Reading");
    reading.icon = Some("📚".to_string());
    reading
        .sites
        .push(site("Hacker News", "https://news.ycombinator.com", "Daily tech headlines"));

    NavTree {
        profile: Profile {
            name: "My Links".to_string(),
            avatar: None,
            slogan: Some("A quiet corner of the internet".to_string()),
            extra: Default::default(),
        },
        categories: vec![tools, reading],
    }
}

fn site(title: &str, url: &str, description: &str) -> SiteEntry {
    let mut entry = SiteEntry::new(title, url);
    entry.description = Some(description.to_string());
    entry
}
