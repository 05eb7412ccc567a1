//! Author alias table: maps name variants to their canonical form.
//!
//! The table is a line-oriented file, fields separated by tabs or commas,
//! at least 8 per record: `last1 first1 middle1 <3 service fields> last2
//! first2 [middle2]`. The canonical form is `"<middle1> <last1> <first1>"`
//! trimmed, the alias form `"<middle2> <last2> <first2>"` trimmed.
//! An external `a_aliases.txt` overrides the embedded gzipped copy.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::translit::has_cyrillic;

/// Embedded gzipped alias table.
const ALIASES_GZ: &[u8] = include_bytes!("../assets/a_aliases.txt.gz");

/// External override file name, looked up next to the library root.
pub const ALIASES_FILE_NAME: &str = "a_aliases.txt";

#[derive(Debug, Default)]
pub struct AliasTable {
    /// alias → canonical
    forward: HashMap<String, String>,
    /// canonical → Latin alias, for display-side reverse lookup
    reverse: HashMap<String, String>,
}

impl AliasTable {
    /// Load the external file when present, the embedded copy otherwise.
    pub fn load(library_root: &Path) -> AliasTable {
        let external = library_root.join(ALIASES_FILE_NAME);
        if let Ok(content) = std::fs::read_to_string(&external) {
            debug!("Loading author aliases from {}", external.display());
            return AliasTable::parse(&content);
        }

        let mut decoder = GzDecoder::new(ALIASES_GZ);
        let mut content = String::new();
        if decoder.read_to_string(&mut content).is_err() {
            warn!("Embedded alias table is unreadable; aliases disabled");
            return AliasTable::default();
        }
        AliasTable::parse(&content)
    }

    /// Parse alias records. Malformed lines are skipped.
    pub fn parse(content: &str) -> AliasTable {
        let mut table = AliasTable::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = if line.contains('\t') {
                line.split('\t').collect()
            } else {
                line.split(',').collect()
            };
            if fields.len() < 8 {
                continue;
            }
            let canonical = join_name(fields[2], fields[0], fields[1]);
            let alias = join_name(fields.get(8).copied().unwrap_or(""), fields[6], fields[7]);
            if canonical.is_empty() || alias.is_empty() || canonical == alias {
                continue;
            }
            if has_cyrillic(&canonical) && !has_cyrillic(&alias) {
                // Latin spelling of a Cyrillic author: kept for output-side
                // lookup, not applied on insert.
                table.reverse.insert(canonical.clone(), alias.clone());
            }
            table.forward.insert(alias, canonical);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Canonical form of an author name, if the name is a known alias.
    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.forward.get(name).map(String::as_str)
    }

    /// Latin alias of a canonical Cyrillic name, if one exists.
    pub fn latin_alias(&self, canonical: &str) -> Option<&str> {
        self.reverse.get(canonical).map(String::as_str)
    }

    /// Substitute every Cyrillic author that appears as an alias key.
    /// Latin names are left untouched even when they are keys: the policy
    /// only canonicalizes Cyrillic variants.
    pub fn apply(&self, authors: &mut [String]) -> usize {
        let mut replaced = 0;
        for author in authors.iter_mut() {
            if !has_cyrillic(author) {
                continue;
            }
            if let Some(canonical) = self.canonical(author) {
                *author = canonical.to_string();
                replaced += 1;
            }
        }
        replaced
    }
}

fn join_name(middle: &str, last: &str, first: &str) -> String {
    let mut parts = Vec::new();
    for p in [middle.trim(), last.trim(), first.trim()] {
        if !p.is_empty() {
            parts.push(p);
        }
    }
    parts.join(" ")
}
