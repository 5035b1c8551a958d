use crate::store::KnownWordSet;
use crate::word::{Word, WordId};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;

/// Characters `encodeURIComponent` leaves untouched, so lookup links match
/// the ones browsers build.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub const MARK_NEW_LABEL: &str = "לסמן כחדשה";
pub const MARK_KNOWN_LABEL: &str = "אני יודע/ת";
/// Prefix of the level badge and level selector options.
pub const LEVEL_LABEL: &str = "רמה";

/// Everything a front end needs to draw one card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardView {
    pub word_id: WordId,
    pub word: String,
    pub level: String,
    pub level_badge: String,
    pub meaning: String,
    pub example: String,
    pub known: bool,
    pub toggle_label: &'static str,
    pub lookup_url: String,
}

impl CardView {
    pub fn from_word(word: &Word, known: &KnownWordSet) -> Self {
        let is_known = known.contains(word.id);
        let level = word.level.label();
        Self {
            word_id: word.id,
            word: word.value.clone(),
            level_badge: format!("{LEVEL_LABEL} {level}"),
            level,
            meaning: word.meaning.clone(),
            example: word.example_sentence.clone(),
            known: is_known,
            toggle_label: toggle_label(is_known),
            lookup_url: lookup_url(&word.value),
        }
    }
}

pub fn toggle_label(known: bool) -> &'static str {
    if known { MARK_NEW_LABEL } else { MARK_KNOWN_LABEL }
}

/// Builds the full card list for one render pass.
pub fn render_cards(words: &[&Word], known: &KnownWordSet) -> Vec<CardView> {
    words
        .iter()
        .map(|word| CardView::from_word(word, known))
        .collect()
}

/// Pronunciation lookup page for `word`.
pub fn lookup_url(word: &str) -> String {
    format!(
        "https://youglish.com/pronounce/{}/english",
        utf8_percent_encode(word, URI_COMPONENT)
    )
}
