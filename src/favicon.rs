use crate::adapter::DocSession;
use crate::commands;
use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, CachedFavicon, FaviconRefreshSummary};
use crate::ops;
use crate::store::{Database, FaviconRecord};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use url::Url;

const MAX_ICON_BYTES: usize = 512 * 1024;

/// Lowercased host portion of a bare host, a host:port, or a full url.
pub fn normalize_host(input: &str) -> AppResult<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Host must not be empty".to_string()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&candidate)
        .map_err(|err| AppError::Validation(format!("Invalid host '{}': {}", input, err)))?;
    url.host_str()
        .map(|host| host.to_ascii_lowercase())
        .ok_or_else(|| AppError::Validation(format!("No host in '{}'", input)))
}

/// Synthetic favicon path stored on site entries once a host is cached.
pub fn favicon_path_for(host: &str) -> String {
    format!("/api/favicon?host={}", host)
}

fn is_stale(record: &FaviconRecord, stale_days: i64, now: DateTime<Utc>) -> bool {
    now - record.updated_at > Duration::days(stale_days)
}

fn to_response(record: &FaviconRecord) -> CachedFavicon {
    CachedFavicon {
        host: record.host.clone(),
        content_type: record.content_type.clone(),
        data_base64: BASE64.encode(&record.data),
        updated_at: record.updated_at,
    }
}

fn build_client(settings: &AppSettings) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(
            settings.favicon_fetch_timeout_ms,
        ))
        .build()
        .map_err(|err| AppError::Internal(format!("Cannot build http client: {}", err)))
}

/// Returns the cached icon for a host, fetching when missing and refreshing
/// when older than the configured staleness window. A failed refresh falls
/// back to the stale copy when one exists.
pub async fn favicon_get(db: &Arc<Database>, host_or_url: &str) -> AppResult<CachedFavicon> {
    let settings = db.get_settings()?;
    let host = normalize_host(host_or_url)?;

    let cached = db.favicon_get(&host)?;
    if let Some(record) = &cached {
        if !is_stale(record, settings.favicon_stale_days, Utc::now()) {
            return Ok(to_response(record));
        }
    }

    let client = build_client(&settings)?;
    match fetch_icon(&client, &settings, &host).await {
        Ok((content_type, data)) => {
            if !db.favicon_put(&host, &content_type, &data)? {
                db.favicon_touch(&host)?;
            }
            let record = db
                .favicon_get(&host)?
                .ok_or_else(|| AppError::Internal("Favicon vanished after write".to_string()))?;
            Ok(to_response(&record))
        }
        Err(error) => {
            tracing::warn!(host = %host, error = %error, "favicon fetch failed");
            match cached {
                Some(record) => Ok(to_response(&record)),
                None => Err(AppError::NotFound(format!(
                    "No favicon cached for host '{}'",
                    host
                ))),
            }
        }
    }
}

async fn fetch_icon(
    client: &reqwest::Client,
    settings: &AppSettings,
    host: &str,
) -> Result<(String, Vec<u8>), String> {
    let primary = settings.favicon_service_template.replace("{host}", host);
    match try_fetch(client, &primary).await {
        Ok(icon) => Ok(icon),
        Err(primary_error) => {
            let fallback = format!("https://{}/favicon.ico", host);
            try_fetch(client, &fallback)
                .await
                .map_err(|fallback_error| {
                    format!(
                        "primary: {}; fallback: {}",
                        primary_error, fallback_error
                    )
                })
        }
    }
}

async fn try_fetch(client: &reqwest::Client, url: &str) -> Result<(String, Vec<u8>), String> {
    let response = client.get(url).send().await.map_err(|err| err.to_string())?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("image/x-icon")
        .split(';')
        .next()
        .unwrap_or("image/x-icon")
        .trim()
        .to_string();
    if !content_type.starts_with("image/") && content_type != "application/octet-stream" {
        return Err(format!("unexpected content type '{}'", content_type));
    }

    let data = response.bytes().await.map_err(|err| err.to_string())?;
    if data.is_empty() {
        return Err("empty body".to_string());
    }
    if data.len() > MAX_ICON_BYTES {
        return Err(format!("icon too large ({} bytes)", data.len()));
    }
    Ok((content_type, data.to_vec()))
}

/// Refreshes the cache for every distinct host in the tree, fetching hosts
/// concurrently. One host failing never aborts the others. Sites whose host
/// refreshed get their favicon path and refresh stamp updated, which is a
/// site-list-only change and persists through the partial-write path.
pub async fn favicon_refresh_all(db: &Arc<Database>) -> AppResult<FaviconRefreshSummary> {
    let settings = db.get_settings()?;

    let tree = {
        let session = DocSession::new(db);
        session.read_document()?
    };
    let Some(tree) = tree else {
        return Ok(FaviconRefreshSummary::default());
    };

    let mut hosts = BTreeSet::new();
    ops::walk_sites(&tree.categories, &mut |_, site| {
        if let Ok(host) = normalize_host(&site.url) {
            hosts.insert(host);
        }
    });

    let client = build_client(&settings)?;
    let mut tasks = JoinSet::new();
    for host in &hosts {
        let db = Arc::clone(db);
        let client = client.clone();
        let settings = settings.clone();
        let host = host.clone();
        tasks.spawn(async move {
            match fetch_icon(&client, &settings, &host).await {
                Ok((content_type, data)) => {
                    let result = db.favicon_put(&host, &content_type, &data).and_then(|wrote| {
                        if !wrote {
                            db.favicon_touch(&host)?;
                        }
                        Ok(())
                    });
                    match result {
                        Ok(()) => Ok(host),
                        Err(error) => Err((host, error.to_string())),
                    }
                }
                Err(error) => Err((host, error)),
            }
        });
    }

    let mut summary = FaviconRefreshSummary {
        refreshed: 0,
        failed: 0,
        hosts: hosts.iter().cloned().collect(),
    };
    let mut refreshed_hosts = BTreeSet::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(host)) => {
                refreshed_hosts.insert(host);
                summary.refreshed += 1;
            }
            Ok(Err((host, error))) => {
                tracing::warn!(host = %host, error = %error, "favicon refresh failed");
                summary.failed += 1;
            }
            Err(error) => {
                tracing::warn!(error = %error, "favicon refresh task panicked");
                summary.failed += 1;
            }
        }
    }

    if !refreshed_hosts.is_empty() {
        stamp_refreshed_sites(db, &refreshed_hosts)?;
    }
    Ok(summary)
}

fn stamp_refreshed_sites(db: &Arc<Database>, refreshed: &BTreeSet<String>) -> AppResult<()> {
    let session = DocSession::new(db);
    let Some(current) = session.read_document()? else {
        return Ok(());
    };
    let mut next = current.clone();
    let now = Utc::now();
    ops::walk_sites_mut(&mut next.categories, &mut |site| {
        if let Ok(host) = normalize_host(&site.url) {
            if refreshed.contains(&host) {
                site.favicon = Some(favicon_path_for(&host));
                site.favicon_updated_at = Some(now);
            }
        }
    });
    commands::commit(&session, &current, &next)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_host_accepts_bare_hosts_urls_and_ports() {
        assert_eq!(normalize_host("Example.COM").unwrap(), "example.com");
        assert_eq!(
            normalize_host("https://example.com/path?q=1").unwrap(),
            "example.com"
        );
        assert_eq!(normalize_host("example.com:8443").unwrap(), "example.com");
    }

    #[test]
    fn normalize_host_rejects_empty_input() {
        assert!(normalize_host("  ").is_err());
    }

    #[test]
    fn staleness_uses_the_configured_window() {
        let record = FaviconRecord {
            host: "example.com".to_string(),
            content_type: "image/png".to_string(),
            data: vec![1],
            updated_at: Utc::now() - Duration::days(8),
        };
        assert!(is_stale(&record, 7, Utc::now()));
        assert!(!is_stale(&record, 30, Utc::now()));
    }

    #[test]
    fn favicon_path_embeds_the_host() {
        assert_eq!(
            favicon_path_for("example.com"),
            "/api/favicon?host=example.com"
        );
    }
}
