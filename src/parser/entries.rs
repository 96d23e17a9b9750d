use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::trace;
use url::Url;

use super::srcset::{parse_srcset, select_best, Candidate, Descriptor};
use super::RawEntry;
use crate::error::ParseError;
use crate::normalize::normalize_aircraft;

static CANDIDATE_IMG: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "figure img, .seatmap img, .seat-map img, .aircraft-layout img, img[data-aircraft]",
    )
    .unwrap()
});
// images marked up as seat maps; a bare `figure` must earn it
static MARKED_IMG: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".seatmap img, .seat-map img, .aircraft-layout img, img[data-aircraft]").unwrap()
});
static FIGCAPTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("figcaption").unwrap());

const SEATMAP_KEYWORDS: &[&str] = &["seat", "map", "layout", "cabin"];

/// Images carrying the same label on one page are resolution variants of
/// one seat map. Different labels stay apart even when they normalize to
/// the same model ("A330-200" and "A330-300").
struct Group {
    key: String,
    label: String,
    candidates: Vec<Candidate>,
}

pub(super) struct Extracted {
    pub entries: Vec<RawEntry>,
    pub malformed: Vec<ParseError>,
    pub foreign: usize,
}

pub(super) fn extract(doc: &Html, airline_code: &str, page_url: &Url) -> Extracted {
    let mut groups: Vec<Group> = Vec::new();
    let mut malformed = Vec::new();
    let mut foreign = 0;
    let mut order = 0usize;

    for img in doc.select(&CANDIDATE_IMG) {
        let el = img.value();

        if let Some(owner) = el.attr("data-airline") {
            if !owner.trim().eq_ignore_ascii_case(airline_code) {
                foreign += 1;
                continue;
            }
        }

        let label = label_for(img);
        if !MARKED_IMG.matches(&img) && !looks_like_seatmap(img, label.as_deref()) {
            trace!(src = el.attr("src").unwrap_or(""), "decorative figure image ignored");
            continue;
        }

        let Some(label) = label else {
            malformed.push(ParseError::Malformed(format!(
                "image without aircraft label ({})",
                el.attr("src").unwrap_or("no src")
            )));
            continue;
        };

        let mut candidates = Vec::new();
        for attr in ["srcset", "data-srcset"] {
            if let Some(set) = el.attr(attr) {
                for (raw, desc) in parse_srcset(set) {
                    let width = match desc {
                        Descriptor::Width(w) => Some(w),
                        _ => None,
                    };
                    push_candidate(&mut candidates, page_url, &raw, width, None, &mut order);
                }
            }
        }
        let width_hint = el.attr("width").and_then(|w| w.trim().parse::<u32>().ok());
        let bytes_hint = el.attr("data-bytes").and_then(|b| b.trim().parse::<u64>().ok());
        for attr in ["src", "data-src"] {
            if let Some(raw) = el.attr(attr) {
                push_candidate(&mut candidates, page_url, raw, width_hint, bytes_hint, &mut order);
            }
        }

        if candidates.is_empty() {
            malformed.push(ParseError::Malformed(format!("{label}: no usable image url")));
            continue;
        }

        let key = label.to_lowercase();
        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => group.candidates.extend(candidates),
            None => groups.push(Group {
                key,
                label,
                candidates,
            }),
        }
    }

    let entries = groups
        .into_iter()
        .filter_map(|g| {
            let best = select_best(&g.candidates)?;
            let image_url = Url::parse(&best.url).ok()?;
            Some(RawEntry {
                aircraft_label: g.label,
                image_url,
            })
        })
        .collect();

    Extracted {
        entries,
        malformed,
        foreign,
    }
}

fn push_candidate(
    out: &mut Vec<Candidate>,
    page_url: &Url,
    raw: &str,
    width: Option<u32>,
    bytes: Option<u64>,
    order: &mut usize,
) {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return;
    }
    let Ok(resolved) = page_url.join(raw) else {
        return;
    };
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return;
    }
    if out.iter().any(|c| c.url == resolved.as_str()) {
        return;
    }
    out.push(Candidate {
        url: resolved.to_string(),
        width,
        bytes,
        order: *order,
    });
    *order += 1;
}

/// A figure image counts when its label names a known aircraft or its
/// label or URLs mention a seat map.
fn looks_like_seatmap(img: ElementRef, label: Option<&str>) -> bool {
    if label.is_some_and(|l| normalize_aircraft(l).is_recognized()) {
        return true;
    }
    let el = img.value();
    ["src", "data-src", "srcset", "data-srcset"]
        .iter()
        .filter_map(|a| el.attr(a))
        .chain(label)
        .any(|text| {
            let text = text.to_lowercase();
            SEATMAP_KEYWORDS.iter().any(|k| text.contains(k))
        })
}

/// `data-aircraft`, then `alt`, then the enclosing figure's caption.
fn label_for(img: ElementRef) -> Option<String> {
    let el = img.value();
    let direct = ["data-aircraft", "alt"]
        .iter()
        .filter_map(|a| el.attr(a))
        .map(collapse)
        .find(|s| !s.is_empty());
    if direct.is_some() {
        return direct;
    }

    img.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "figure")
        .and_then(|fig| fig.select(&FIGCAPTION).next())
        .map(|cap| collapse(&cap.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
