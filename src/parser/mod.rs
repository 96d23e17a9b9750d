pub mod entries;
pub mod listing;
pub mod srcset;

use scraper::Html;
use url::Url;

use crate::error::ParseError;

/// One seat-map image as found on a page, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub aircraft_label: String,
    pub image_url: Url,
}

/// Everything extracted from one page. Pure function of the page bytes.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub airline_code: String,
    pub page_url: Url,
    pub detail_links: Vec<Url>,
    entries: Vec<RawEntry>,
    malformed: Vec<ParseError>,
    foreign: usize,
}

impl ParsedPage {
    /// Successfully extracted entries, in document order. Restartable.
    pub fn entries(&self) -> impl Iterator<Item = &RawEntry> + '_ {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<RawEntry> {
        self.entries
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.malformed
    }

    /// Entries skipped because they could not be extracted.
    pub fn skipped(&self) -> usize {
        self.malformed.len()
    }

    /// Images tagged for a different carrier; ignored, not errors.
    pub fn foreign(&self) -> usize {
        self.foreign
    }
}

/// Parse one airline page: seat-map entries plus links to detail pages.
pub fn parse(html: &[u8], airline_code: &str, page_url: &Url) -> ParsedPage {
    let text = String::from_utf8_lossy(html);
    let doc = Html::parse_document(&text);

    let extracted = entries::extract(&doc, airline_code, page_url);
    let detail_links = listing::detail_links(&doc, airline_code, page_url);

    ParsedPage {
        airline_code: airline_code.to_string(),
        page_url: page_url.clone(),
        detail_links,
        entries: extracted.entries,
        malformed: extracted.malformed,
        foreign: extracted.foreign,
    }
}
