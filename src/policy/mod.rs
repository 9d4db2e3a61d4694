//! Crawl policy utilities: robots.txt allowance and sitemap discovery.
//!
//! Both parsers are deliberately lenient line/tag scanners: sitemaps
//! in the wild are full of namespace quirks and half-valid XML, and the
//! only fields the scheduler needs are `loc`, `lastmod` and alternate
//! `xhtml:link` targets. A site without robots.txt allows everything.

use log::{debug, warn};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::error::{Result, SnapError};
use crate::utils::SNAPKIT_USER_AGENT;

static HTTP: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(SNAPKIT_USER_AGENT)
        .build()
        .expect("http client construction cannot fail with static options")
});

/// One sitemap entry considered by the re-crawl scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub url: String,
    /// `<lastmod>` as published, usually ISO-8601
    pub lastmod: Option<String>,
    /// Alternate/child URLs (`xhtml:link href`) folded into the
    /// candidate set alongside the entry itself
    pub links: Vec<String>,
}

/// Parsed robots.txt rules applying to our user agent
#[derive(Debug, Default, Clone)]
pub struct RobotsRules {
    /// (allow, path-prefix) pairs from applicable groups
    rules: Vec<(bool, String)>,
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Whether the rules permit fetching `path`.
    ///
    /// Longest matching prefix wins; an allow rule wins a tie; no
    /// matching rule means allowed.
    #[must_use]
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for (allow, prefix) in &self.rules {
            if prefix.is_empty() || !path.starts_with(prefix.as_str()) {
                continue;
            }
            let candidate = (prefix.len(), *allow);
            best = match best {
                Some((len, verdict)) if len > prefix.len() => Some((len, verdict)),
                Some((len, verdict)) if len == prefix.len() => Some((len, verdict || *allow)),
                _ => Some(candidate),
            };
        }
        best.map_or(true, |(_, allow)| allow)
    }
}

/// Parse robots.txt, keeping groups that apply to `user_agent` or `*`
#[must_use]
pub fn parse_robots(text: &str, user_agent: &str) -> RobotsRules {
    let ua_lower = user_agent.to_lowercase();
    let mut rules = RobotsRules::default();

    let mut group_applies = false;
    let mut in_group_header = false;

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_lowercase();
        let value = value.trim();

        match field.as_str() {
            "user-agent" => {
                let agent = value.to_lowercase();
                let applies = agent == "*" || ua_lower.contains(&agent);
                if in_group_header {
                    group_applies = group_applies || applies;
                } else {
                    group_applies = applies;
                    in_group_header = true;
                }
            }
            "allow" | "disallow" => {
                in_group_header = false;
                // an empty Disallow means "allow everything"
                if group_applies && !value.is_empty() {
                    rules.rules.push((field == "allow", value.to_string()));
                }
            }
            "sitemap" => {
                in_group_header = false;
                rules.sitemaps.push(value.to_string());
            }
            _ => {
                in_group_header = false;
            }
        }
    }

    rules
}

fn origin_of(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| SnapError::InvalidUrl(format!("{url}: {e}")))?;
    let origin = format!(
        "{}://{}{}",
        parsed.scheme(),
        parsed
            .host_str()
            .ok_or_else(|| SnapError::InvalidUrl(format!("{url}: no host")))?,
        parsed.port().map(|p| format!(":{p}")).unwrap_or_default()
    );
    Url::parse(&origin).map_err(|e| SnapError::InvalidUrl(format!("{origin}: {e}")))
}

async fn fetch_text(url: &str) -> Option<String> {
    match HTTP.get(url).send().await {
        Ok(response) if response.status().is_success() => response.text().await.ok(),
        Ok(response) => {
            debug!("fetch {url} returned status {}", response.status());
            None
        }
        Err(e) => {
            debug!("fetch {url} failed: {e}");
            None
        }
    }
}

/// Fetch robots.txt for the URL's origin and parse it.
///
/// Returns default (allow-everything) rules when the file is absent or
/// unreachable.
pub async fn fetch_robots(url: &str) -> Result<RobotsRules> {
    let origin = origin_of(url)?;
    let robots_url = origin.join("robots.txt").map_err(|e| {
        SnapError::InvalidUrl(format!("robots.txt join failed for {origin}: {e}"))
    })?;

    Ok(fetch_text(robots_url.as_str())
        .await
        .map(|text| parse_robots(&text, "snapkit"))
        .unwrap_or_default())
}

/// Check whether robots.txt permits crawling `url`
pub async fn is_accept_crawler(url: &str) -> bool {
    let rules = match fetch_robots(url).await {
        Ok(rules) => rules,
        Err(e) => {
            warn!("robots check for {url} failed: {e}, defaulting to allowed");
            return true;
        }
    };

    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| "/".to_string());

    rules.is_allowed(&path)
}

/// Resolve and parse every sitemap for a site.
///
/// Sitemap URLs declared in robots.txt win; `/sitemap.xml` is the
/// fallback. Sitemap-index files are followed one level deep. Entries
/// are de-duplicated by URL, first occurrence wins.
pub async fn get_sitemap_entries(site_url: &str) -> Result<Vec<SitemapEntry>> {
    let robots = fetch_robots(site_url).await?;

    let sitemap_urls = if robots.sitemaps.is_empty() {
        let origin = origin_of(site_url)?;
        vec![
            origin
                .join("sitemap.xml")
                .map_err(|e| SnapError::InvalidUrl(format!("{e}")))?
                .to_string(),
        ]
    } else {
        robots.sitemaps.clone()
    };

    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for sitemap_url in &sitemap_urls {
        let Some(xml) = fetch_text(sitemap_url).await else {
            warn!("sitemap {sitemap_url} could not be fetched, skipping");
            continue;
        };

        // sitemap-index: follow children one level
        let children = tag_blocks(&xml, "sitemap");
        if !children.is_empty() {
            for block in children {
                if let Some(child_url) = tag_text(block, "loc") {
                    if let Some(child_xml) = fetch_text(&child_url).await {
                        collect_entries(&child_xml, &mut entries, &mut seen);
                    }
                }
            }
            continue;
        }

        collect_entries(&xml, &mut entries, &mut seen);
    }

    debug!("found {} sitemap entries for {site_url}", entries.len());
    Ok(entries)
}

fn collect_entries(xml: &str, entries: &mut Vec<SitemapEntry>, seen: &mut HashSet<String>) {
    for block in tag_blocks(xml, "url") {
        let Some(url) = tag_text(block, "loc") else {
            continue;
        };
        if !crate::utils::is_valid_url(&url) || !seen.insert(url.clone()) {
            continue;
        }
        let links = attr_values(block, "xhtml:link", "href")
            .into_iter()
            .filter(|link| crate::utils::is_valid_url(link))
            .collect();
        entries.push(SitemapEntry {
            url,
            lastmod: tag_text(block, "lastmod"),
            links,
        });
    }
}

/// Extract the inner text of each `<tag ...>...</tag>` block
fn tag_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let after_open = &rest[start + open.len()..];
        // require a real tag boundary, not a prefix like <urlset>
        if !after_open.starts_with('>') && !after_open.starts_with(char::is_whitespace) {
            rest = after_open;
            continue;
        }
        let Some(body_start) = after_open.find('>') else {
            break;
        };
        let body = &after_open[body_start + 1..];
        let Some(end) = body.find(&close) else {
            break;
        };
        blocks.push(&body[..end]);
        rest = &body[end + close.len()..];
    }

    blocks
}

/// Inner text of the first `<tag>` in a block
fn tag_text(block: &str, tag: &str) -> Option<String> {
    let inner = tag_blocks(block, tag).into_iter().next()?;
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Collect `attr="..."` values from self-closing `<tag ...>` elements
fn attr_values(block: &str, tag: &str, attr: &str) -> Vec<String> {
    let open = format!("<{tag}");
    let needle = format!("{attr}=\"");
    let mut values = Vec::new();
    let mut rest = block;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(tag_end) = after.find('>') else {
            break;
        };
        let attrs = &after[..tag_end];
        if let Some(value_start) = attrs.find(&needle) {
            let value = &attrs[value_start + needle.len()..];
            if let Some(value_end) = value.find('"') {
                values.push(value[..value_end].to_string());
            }
        }
        rest = &after[tag_end..];
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robots_longest_match_wins() {
        let rules = parse_robots(
            "User-agent: *\nDisallow: /private\nAllow: /private/public\n",
            "snapkit",
        );
        assert!(rules.is_allowed("/anything"));
        assert!(!rules.is_allowed("/private/page"));
        assert!(rules.is_allowed("/private/public/page"));
    }

    #[test]
    fn robots_ignores_other_agents() {
        let rules = parse_robots(
            "User-agent: badbot\nDisallow: /\n\nUser-agent: *\nDisallow: /admin\n",
            "snapkit",
        );
        assert!(rules.is_allowed("/page"));
        assert!(!rules.is_allowed("/admin/page"));
    }

    #[test]
    fn robots_collects_sitemaps() {
        let rules = parse_robots(
            "Sitemap: https://example.com/map1.xml\nUser-agent: *\nDisallow:\nSitemap: https://example.com/map2.xml\n",
            "snapkit",
        );
        assert_eq!(rules.sitemaps.len(), 2);
        assert!(rules.is_allowed("/anything"));
    }

    #[test]
    fn sitemap_blocks_parse_loc_lastmod_and_links() {
        let xml = r#"<?xml version="1.0"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.com/a</loc>
    <lastmod>2024-01-02</lastmod>
    <xhtml:link rel="alternate" hreflang="de" href="https://example.com/de/a"/>
  </url>
  <url><loc>https://example.com/b</loc></url>
</urlset>"#;

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        collect_entries(xml, &mut entries, &mut seen);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://example.com/a");
        assert_eq!(entries[0].lastmod.as_deref(), Some("2024-01-02"));
        assert_eq!(entries[0].links, vec!["https://example.com/de/a"]);
        assert!(entries[1].lastmod.is_none());
    }
}
