use crate::store::KnownWordSet;
use crate::word::Word;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ALL: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelFilter {
    #[default]
    All,
    Exact(String),
}

impl LevelFilter {
    pub fn matches(&self, word: &Word) -> bool {
        match self {
            LevelFilter::All => true,
            LevelFilter::Exact(label) => word.level.label() == *label,
        }
    }
}

impl FromStr for LevelFilter {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == ALL {
            Ok(LevelFilter::All)
        } else {
            Ok(LevelFilter::Exact(trimmed.to_string()))
        }
    }
}

impl fmt::Display for LevelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelFilter::All => f.write_str(ALL),
            LevelFilter::Exact(label) => f.write_str(label),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownFilter {
    #[default]
    All,
    New,
    Known,
}

impl KnownFilter {
    pub fn matches(self, word: &Word, known: &KnownWordSet) -> bool {
        match self {
            KnownFilter::All => true,
            KnownFilter::New => !known.contains(word.id),
            KnownFilter::Known => known.contains(word.id),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KnownFilter::All => ALL,
            KnownFilter::New => "new",
            KnownFilter::Known => "known",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status filter {0:?} (expected all, new, or known)")]
pub struct UnknownKnownFilter(pub String);

impl FromStr for KnownFilter {
    type Err = UnknownKnownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | ALL => Ok(KnownFilter::All),
            "new" => Ok(KnownFilter::New),
            "known" => Ok(KnownFilter::Known),
            other => Err(UnknownKnownFilter(other.to_string())),
        }
    }
}

impl fmt::Display for KnownFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector values driving which cards are shown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterState {
    pub level: LevelFilter,
    pub known: KnownFilter,
}

impl FilterState {
    pub fn new(level: LevelFilter, known: KnownFilter) -> Self {
        Self { level, known }
    }
}

/// Keeps the words matching both selectors, in input order.
pub fn filter_words<'a, I>(words: I, state: &FilterState, known: &KnownWordSet) -> Vec<&'a Word>
where
    I: IntoIterator<Item = &'a Word>,
{
    words
        .into_iter()
        .filter(|word| state.level.matches(word) && state.known.matches(word, known))
        .collect()
}
