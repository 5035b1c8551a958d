use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry;
use std::fmt;

pub type WordId = i64;

/// Difficulty tag attached to a word. Data files store it either as a number
/// or as a string; filtering always goes through [`Level::label`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Level {
    Number(i64),
    Text(String),
}

impl Level {
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Number(value) => write!(f, "{value}"),
            Level::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    pub id: WordId,
    pub value: String,
    pub level: Level,
    pub meaning: String,
    pub example_sentence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMetadata {
    pub external_name: String,
    pub description_header_content: String,
}

/// Deduplicated word list for a session.
#[derive(Debug, Clone, Default)]
pub struct WordCollection {
    words: Vec<Word>,
    index: HashMap<WordId, usize>,
}

impl WordCollection {
    /// Concatenates `primary` then `secondary` and keeps the first word seen
    /// for every id.
    pub fn merge(primary: Vec<Word>, secondary: Vec<Word>) -> Self {
        Self::from_words(primary.into_iter().chain(secondary))
    }

    pub fn from_words<I>(words: I) -> Self
    where
        I: IntoIterator<Item = Word>,
    {
        let mut collection = Self::default();
        for word in words {
            if let Entry::Vacant(slot) = collection.index.entry(word.id) {
                slot.insert(collection.words.len());
                collection.words.push(word);
            }
        }
        collection
    }

    pub fn get(&self, id: WordId) -> Option<&Word> {
        self.index.get(&id).map(|&idx| &self.words[idx])
    }

    pub fn contains(&self, id: WordId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn as_slice(&self) -> &[Word] {
        &self.words
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Word> {
        self.words.iter()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Distinct level labels in first-seen order.
    pub fn levels(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.words
            .iter()
            .map(|word| word.level.label())
            .filter(|label| seen.insert(label.clone()))
            .collect()
    }
}

impl<'a> IntoIterator for &'a WordCollection {
    type Item = &'a Word;
    type IntoIter = std::slice::Iter<'a, Word>;

    fn into_iter(self) -> Self::IntoIter {
        self.words.iter()
    }
}

/// Everything the loader produces for one session.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub words: WordCollection,
    pub header: HeaderMetadata,
}

#[cfg(test)]
pub(crate) fn word(id: WordId, value: &str, level: Level) -> Word {
    Word {
        id,
        value: value.to_string(),
        level,
        meaning: format!("meaning of {value}"),
        example_sentence: format!("An example with {value}."),
    }
}
