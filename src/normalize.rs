use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::airlines::{AirlineRef, AirlineTable};
use crate::error::AirlineLookupError;

static MANUFACTURER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(AIRBUS|BOEING|EMBRAER|BOMBARDIER|COMAC|MCDONNELL DOUGLAS|DE HAVILLAND(?: CANADA)?)\b")
        .unwrap()
});
// "A-320", "B 737", "CRJ.900" → letter prefix glued to its number
static PREFIX_GAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{1,4})[\s\-_.]+(\d)").unwrap());
static AIRBUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^A(220|3[0-8]\d)(NEO)?$").unwrap());
static BOEING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^B?(7[0-8]7)(MAX|X)?$").unwrap());
static EJET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:E|ERJ)(1[79]\d)(E2)?$").unwrap());
static ERJ_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ERJ(1[34]\d)$").unwrap());
static CRJ_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^CRJ(\d{3,4})$").unwrap());
static ATR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ATR(42|72)$").unwrap());
static MD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^MD(\d{2})$").unwrap());
static BARE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{3}$").unwrap());

/// ICAO type designators that differ from the canonical family name.
const TYPE_DESIGNATORS: &[(&str, &str)] = &[
    ("A19N", "A319NEO"),
    ("A20N", "A320NEO"),
    ("A21N", "A321NEO"),
    ("A332", "A330"),
    ("A333", "A330"),
    ("A338", "A330NEO"),
    ("A339", "A330NEO"),
    ("A342", "A340"),
    ("A343", "A340"),
    ("A345", "A340"),
    ("A346", "A340"),
    ("A359", "A350"),
    ("A35K", "A350"),
    ("A388", "A380"),
    ("BCS1", "A220"),
    ("BCS3", "A220"),
    ("B38M", "B737MAX"),
    ("B39M", "B737MAX"),
    ("B3XM", "B737MAX"),
    ("B736", "B737"),
    ("B738", "B737"),
    ("B739", "B737"),
    ("B744", "B747"),
    ("B748", "B747"),
    ("B752", "B757"),
    ("B753", "B757"),
    ("B762", "B767"),
    ("B763", "B767"),
    ("B764", "B767"),
    ("B772", "B777"),
    ("B773", "B777"),
    ("B77L", "B777"),
    ("B77W", "B777"),
    ("B778", "B777X"),
    ("B779", "B777X"),
    ("B788", "B787"),
    ("B789", "B787"),
    ("B78X", "B787"),
    ("E290", "E190E2"),
    ("E295", "E195E2"),
    ("AT72", "ATR72"),
    ("AT76", "ATR72"),
    ("AT45", "ATR42"),
    ("AT46", "ATR42"),
    ("CRJ7", "CRJ700"),
    ("CRJ9", "CRJ900"),
    ("CRJX", "CRJ1000"),
    ("DH8D", "DHC8"),
    ("DHC8", "DHC8"),
    ("DASH8", "DHC8"),
    ("Q400", "DHC8"),
    ("Q300", "DHC8"),
    ("C919", "C919"),
    ("ARJ21", "ARJ21"),
];

/// Result of canonicalising an aircraft label. Never an error: labels
/// outside the rule table come back as `Unrecognized` with a slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "confidence", content = "model", rename_all = "snake_case")]
pub enum AircraftModel {
    Recognized(String),
    Unrecognized(String),
}

impl AircraftModel {
    pub fn as_str(&self) -> &str {
        match self {
            AircraftModel::Recognized(m) | AircraftModel::Unrecognized(m) => m,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, AircraftModel::Recognized(_))
    }

    pub fn into_string(self) -> String {
        match self {
            AircraftModel::Recognized(m) | AircraftModel::Unrecognized(m) => m,
        }
    }
}

/// Maps free-text airline and aircraft labels onto the controlled vocabulary.
#[derive(Debug, Clone)]
pub struct Normalizer {
    airlines: Arc<AirlineTable>,
}

impl Normalizer {
    pub fn new(airlines: Arc<AirlineTable>) -> Self {
        Self { airlines }
    }

    pub fn airlines(&self) -> &AirlineTable {
        &self.airlines
    }

    /// Exact code first, then exact (case-insensitive) English or Chinese name.
    pub fn normalize_airline(&self, raw: &str) -> Result<&AirlineRef, AirlineLookupError> {
        let trimmed = raw.trim();
        if let Some(airline) = self.airlines.get(trimmed) {
            return Ok(airline);
        }

        let matches = self.airlines.find_by_name(trimmed);
        match matches.as_slice() {
            [] => Err(AirlineLookupError::NotFound(trimmed.to_string())),
            [only] => Ok(only),
            many => Err(AirlineLookupError::Ambiguous {
                input: trimmed.to_string(),
                candidates: many.iter().map(|a| a.iata_code.clone()).collect(),
            }),
        }
    }

    pub fn normalize_aircraft(&self, raw: &str) -> AircraftModel {
        normalize_aircraft(raw)
    }
}

pub fn normalize_aircraft(raw: &str) -> AircraftModel {
    let upper = raw.to_uppercase();
    let manufacturer = MANUFACTURER_RE
        .captures(&upper)
        .map(|c| c[1].to_string());
    let stripped = MANUFACTURER_RE.replace_all(&upper, " ");
    let glued = PREFIX_GAP_RE.replace_all(&stripped, "$1$2");

    let tokens: Vec<&str> = glued
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1).copied();
        if let Some(model) = match_token(token, next, manufacturer.as_deref()) {
            return AircraftModel::Recognized(model);
        }
    }

    AircraftModel::Unrecognized(fallback_slug(raw))
}

fn match_token(token: &str, next: Option<&str>, manufacturer: Option<&str>) -> Option<String> {
    if let Some((_, canonical)) = TYPE_DESIGNATORS.iter().find(|(code, _)| *code == token) {
        return Some(canonical.to_string());
    }

    if let Some(c) = AIRBUS_RE.captures(token) {
        let neo = c.get(2).is_some() || next == Some("NEO");
        return Some(format!("A{}{}", &c[1], if neo { "NEO" } else { "" }));
    }

    if let Some(c) = BOEING_RE.captures(token) {
        // "MAX 8" arrives glued as "MAX8"
        let suffix = c
            .get(2)
            .map(|m| m.as_str())
            .or(match next {
                Some(n) if n.starts_with("MAX") => Some("MAX"),
                Some("X") => Some("X"),
                _ => None,
            })
            .unwrap_or("");
        return Some(format!("B{}{}", &c[1], suffix));
    }

    if let Some(c) = EJET_RE.captures(token) {
        let e2 = c.get(2).is_some() || next == Some("E2");
        return Some(format!("E{}{}", &c[1], if e2 { "E2" } else { "" }));
    }

    if let Some(c) = ERJ_RE.captures(token) {
        return Some(format!("ERJ{}", &c[1]));
    }
    if let Some(c) = CRJ_RE.captures(token) {
        return Some(format!("CRJ{}", &c[1]));
    }
    if let Some(c) = ATR_RE.captures(token) {
        return Some(format!("ATR{}", &c[1]));
    }
    if let Some(c) = MD_RE.captures(token) {
        return Some(format!("MD{}", &c[1]));
    }

    // "Airbus 320", "Embraer 190": the number alone once the maker is known
    if BARE_NUMBER_RE.is_match(token) {
        let prefixed = match manufacturer {
            Some("AIRBUS") => format!("A{token}"),
            Some("EMBRAER") => format!("E{token}"),
            _ => return None,
        };
        return match_token(&prefixed, next, None);
    }

    None
}

fn fallback_slug(raw: &str) -> String {
    let slug: String = raw
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if slug.is_empty() {
        "UNKNOWN".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(AirlineTable::packaged().unwrap()))
    }

    #[test]
    fn a320_spellings_converge() {
        for label in ["Airbus A320", "A-320", "a320", "Airbus A-320", "A 320", "Airbus 320"] {
            assert_eq!(
                normalize_aircraft(label),
                AircraftModel::Recognized("A320".into()),
                "label {label:?}"
            );
        }
    }

    #[test]
    fn variants_stay_distinct() {
        assert_eq!(normalize_aircraft("Airbus A321neo").as_str(), "A321NEO");
        assert_eq!(normalize_aircraft("A20N").as_str(), "A320NEO");
        assert_eq!(normalize_aircraft("Boeing 737 MAX 8").as_str(), "B737MAX");
        assert_eq!(normalize_aircraft("Boeing 737-800").as_str(), "B737");
        assert_eq!(normalize_aircraft("B77W").as_str(), "B777");
        assert_eq!(normalize_aircraft("Boeing 787-9 Dreamliner").as_str(), "B787");
        assert_eq!(normalize_aircraft("Embraer E190-E2").as_str(), "E190E2");
        assert_eq!(normalize_aircraft("Bombardier CRJ-900").as_str(), "CRJ900");
        assert_eq!(normalize_aircraft("ATR 72-600").as_str(), "ATR72");
        assert_eq!(normalize_aircraft("De Havilland Canada Dash 8 Q400").as_str(), "DHC8");
        assert_eq!(normalize_aircraft("COMAC ARJ21").as_str(), "ARJ21");
    }

    #[test]
    fn label_with_airline_and_config_noise() {
        let model = normalize_aircraft("Air China Airbus A330-300 (A333) 30J271Y");
        assert_eq!(model, AircraftModel::Recognized("A330".into()));
    }

    #[test]
    fn canonical_forms_are_fixed_points() {
        for canonical in ["A320", "A321NEO", "B737MAX", "B777X", "E190E2", "CRJ900", "ATR72", "DHC8", "MD11"] {
            assert_eq!(normalize_aircraft(canonical).as_str(), canonical);
        }
    }

    #[test]
    fn unknown_labels_fall_back_to_slug() {
        assert_eq!(
            normalize_aircraft("Sukhoi Superjet 100"),
            AircraftModel::Unrecognized("SUKHOISUPERJET100".into())
        );
        assert_eq!(normalize_aircraft(""), AircraftModel::Unrecognized("UNKNOWN".into()));
        assert_eq!(normalize_aircraft("—"), AircraftModel::Unrecognized("UNKNOWN".into()));
    }

    #[test]
    fn aircraft_normalization_is_total_and_deterministic() {
        let inputs = [
            "", " ", "A", "320", "A-", "airbus", "Boeing", "７３７", "B-737-800", "a 3 2 0",
            "A380-800 (A388)", "Ил-96", "ERJ-145", "B747-8i", "😀", "A3201", "MD-11F",
        ];
        for input in inputs {
            let first = normalize_aircraft(input);
            let second = normalize_aircraft(input);
            assert_eq!(first, second, "input {input:?}");
            assert!(!first.as_str().is_empty());
        }
    }

    #[test]
    fn airline_code_and_name_resolve_to_same_ref() {
        let n = normalizer();
        let by_code = n.normalize_airline("CA").unwrap().clone();
        let by_name = n.normalize_airline("Air China").unwrap().clone();
        assert_eq!(by_code, by_name);
        assert_eq!(by_code.iata_code, "CA");
    }

    #[test]
    fn airline_name_lookup_ignores_case_and_spacing() {
        let n = normalizer();
        assert_eq!(n.normalize_airline("  china   EASTERN airlines ").unwrap().iata_code, "MU");
        assert_eq!(n.normalize_airline("中国南方航空").unwrap().iata_code, "CZ");
    }

    #[test]
    fn airline_lookup_never_guesses() {
        let n = normalizer();
        assert!(matches!(
            n.normalize_airline("Air Chna"),
            Err(AirlineLookupError::NotFound(_))
        ));
        assert!(matches!(
            n.normalize_airline("China"),
            Err(AirlineLookupError::NotFound(_))
        ));
        assert!(matches!(
            n.normalize_airline("亚洲航空"),
            Err(AirlineLookupError::Ambiguous { .. })
        ));
    }
}
