//! Hierarchical genre taxonomy with bilingual labels.
//!
//! The tree is two levels: parent sections carry only labels, subgenres
//! carry the tags stored in `book_genres`. Parents are persisted as
//! pseudo-rows with a `_MAIN_<name>` tag so the store stays tag-primary.
//! A Soundex index over every label recovers misspelled incoming tags.

use std::collections::HashMap;
use std::io::Cursor;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::translit::soundex;

/// Embedded taxonomy resource.
pub const GENRES_XML: &str = include_str!("../assets/genres.xml");

/// Tag prefix for persisted parent pseudo-rows.
pub const MAIN_TAG_PREFIX: &str = "_MAIN_";

#[derive(Debug, Clone)]
pub struct Subgenre {
    pub tag: String,
    pub name: String,
    pub translation: String,
}

#[derive(Debug, Clone)]
pub struct GenreNode {
    pub name: String,
    pub translation: String,
    pub subgenres: Vec<Subgenre>,
}

#[derive(Debug, Clone, Default)]
pub struct GenreTree {
    pub genres: Vec<GenreNode>,
}

impl GenreTree {
    /// Parse the embedded taxonomy. Panics are impossible: the resource is
    /// compiled in and a parse failure yields an empty tree.
    pub fn load_embedded() -> GenreTree {
        GenreTree::parse(GENRES_XML)
    }

    /// Parse `<root><genre name ru><subgenre tag ru>English</subgenre>…`.
    /// Malformed fragments are skipped, never fatal.
    pub fn parse(xml: &str) -> GenreTree {
        let mut reader = Reader::from_reader(Cursor::new(xml.as_bytes()));
        reader.config_mut().trim_text(true);

        let mut tree = GenreTree::default();
        let mut current: Option<GenreNode> = None;
        let mut pending: Option<Subgenre> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Err(_) => break,

                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    match e.name().as_ref() {
                        b"genre" => {
                            let mut node = GenreNode {
                                name: String::new(),
                                translation: String::new(),
                                subgenres: Vec::new(),
                            };
                            for attr in e.attributes().flatten() {
                                let value = attr
                                    .decode_and_unescape_value(reader.decoder())
                                    .unwrap_or_default();
                                match attr.key.as_ref() {
                                    b"name" => node.name = value.to_string(),
                                    b"ru" => node.translation = value.to_string(),
                                    _ => {}
                                }
                            }
                            current = Some(node);
                        }
                        b"subgenre" => {
                            let mut sub = Subgenre {
                                tag: String::new(),
                                name: String::new(),
                                translation: String::new(),
                            };
                            for attr in e.attributes().flatten() {
                                let value = attr
                                    .decode_and_unescape_value(reader.decoder())
                                    .unwrap_or_default();
                                match attr.key.as_ref() {
                                    b"tag" => sub.tag = value.to_string(),
                                    b"ru" => sub.translation = value.to_string(),
                                    _ => {}
                                }
                            }
                            pending = Some(sub);
                        }
                        _ => {}
                    }
                }

                Ok(Event::Text(ref e)) => {
                    if let Some(sub) = pending.as_mut() {
                        sub.name = e.decode().unwrap_or_default().trim().to_string();
                    }
                }

                Ok(Event::End(ref e)) => match e.name().as_ref() {
                    b"subgenre" => {
                        if let (Some(node), Some(sub)) = (current.as_mut(), pending.take()) {
                            if !sub.tag.is_empty() {
                                node.subgenres.push(sub);
                            }
                        }
                    }
                    b"genre" => {
                        if let Some(node) = current.take() {
                            if !node.name.is_empty() {
                                tree.genres.push(node);
                            }
                        }
                    }
                    _ => {}
                },

                _ => {}
            }
            buf.clear();
        }
        tree
    }

    /// Number of taggable (sub)genres; the additive startup seed compares
    /// this against the stored row count.
    pub fn subgenre_count(&self) -> usize {
        self.genres.iter().map(|g| g.subgenres.len()).sum()
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.genres
            .iter()
            .any(|g| g.subgenres.iter().any(|s| s.tag == tag))
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<&Subgenre> {
        self.genres
            .iter()
            .flat_map(|g| g.subgenres.iter())
            .find(|s| s.tag == tag)
    }

    /// Parent section of a tag.
    pub fn parent_of(&self, tag: &str) -> Option<&GenreNode> {
        self.genres
            .iter()
            .find(|g| g.subgenres.iter().any(|s| s.tag == tag))
    }

    /// Soundex → tag map over tags, English names and translations, used to
    /// recover unknown incoming tags phonetically. First writer wins so the
    /// taxonomy order is authoritative on collisions.
    pub fn soundex_index(&self) -> HashMap<String, String> {
        let mut index = HashMap::new();
        for genre in &self.genres {
            for sub in &genre.subgenres {
                for key in [&sub.tag, &sub.name, &sub.translation] {
                    let code = soundex(key);
                    if !code.is_empty() {
                        index.entry(code).or_insert_with(|| sub.tag.clone());
                    }
                }
            }
        }
        index
    }
}
