use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

const HREF_KEYWORDS: &[&str] = &["aircraft", "seatmap", "seat-map"];
const LINK_CLASSES: &[&str] = &["aircraft-link", "seatmap-link"];

/// Per-aircraft detail pages linked from an airline index page, in document
/// order, same host only, without fragments or duplicates.
pub fn detail_links(doc: &Html, airline_code: &str, page_url: &Url) -> Vec<Url> {
    let prefix = format!("/{}-", airline_code.trim().to_lowercase());
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for a in doc.select(&ANCHOR) {
        let el = a.value();
        let Some(href) = el.attr("href") else {
            continue;
        };
        let Ok(mut url) = page_url.join(href.trim()) else {
            continue;
        };
        url.set_fragment(None);
        if url.host_str() != page_url.host_str() || url.path() == page_url.path() {
            continue;
        }

        let path = url.path().to_lowercase();
        let href_lower = href.to_lowercase();
        let wanted = path.starts_with(&prefix)
            || HREF_KEYWORDS.iter().any(|k| href_lower.contains(k))
            || el.classes().any(|c| LINK_CLASSES.contains(&c));

        if wanted && seen.insert(url.to_string()) {
            links.push(url);
        }
    }

    links
}
