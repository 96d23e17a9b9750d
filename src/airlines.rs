use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

const PACKAGED_TABLE: &str = include_str!("reference/airlines.json");

/// A carrier from the packaged reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirlineRef {
    pub iata_code: String,
    pub chinese_name: String,
    pub english_name: String,
}

#[derive(Deserialize)]
struct TableFile {
    version: String,
    airlines: Vec<AirlineRef>,
}

/// Read-only `iata_code → names` table, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AirlineTable {
    version: String,
    by_code: BTreeMap<String, AirlineRef>,
    // lowercased English or Chinese name → codes carrying it
    by_name: HashMap<String, Vec<String>>,
}

impl AirlineTable {
    pub fn packaged() -> Result<Self, serde_json::Error> {
        Self::from_json(PACKAGED_TABLE)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: TableFile = serde_json::from_str(json)?;
        Ok(Self::from_entries(file.version, file.airlines))
    }

    pub fn from_entries(version: impl Into<String>, entries: Vec<AirlineRef>) -> Self {
        let mut by_code = BTreeMap::new();
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();

        for mut airline in entries {
            airline.iata_code = airline.iata_code.trim().to_uppercase();
            for name in [&airline.english_name, &airline.chinese_name] {
                let codes = by_name.entry(name_key(name)).or_default();
                if !codes.contains(&airline.iata_code) {
                    codes.push(airline.iata_code.clone());
                }
            }
            by_code.insert(airline.iata_code.clone(), airline);
        }
        for codes in by_name.values_mut() {
            codes.sort();
        }

        Self {
            version: version.into(),
            by_code,
            by_name,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&AirlineRef> {
        self.by_code.get(&code.trim().to_uppercase())
    }

    /// Carriers whose English or Chinese name equals `name`, ignoring case.
    pub fn find_by_name(&self, name: &str) -> Vec<&AirlineRef> {
        self.by_name
            .get(&name_key(name))
            .map(|codes| codes.iter().filter_map(|c| self.by_code.get(c)).collect())
            .unwrap_or_default()
    }

    /// All carriers, sorted by code.
    pub fn all(&self) -> impl Iterator<Item = &AirlineRef> {
        self.by_code.values()
    }

    pub fn codes(&self) -> Vec<String> {
        self.by_code.keys().cloned().collect()
    }
}

fn name_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
