//! Application state and the card action router.
//!
//! [`FlashcardApp`] owns everything a session mutates: the active user, that
//! user's known-word set, and the playback rate. Front ends hold one instance
//! and feed it [`CardEvent`]s; every method completes synchronously so each
//! call is one atomic user action.

use crate::cards::{CardView, lookup_url, render_cards, toggle_label};
use crate::filter::{FilterState, filter_words};
use crate::speech::{PlaybackRate, Speaker, SpeechController};
use crate::store::{KeyValueStore, KnownWordSet, PersistenceError, UserId, UserStateStore};
use crate::word::{Catalog, HeaderMetadata, Word, WordCollection, WordId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

pub struct FlashcardApp<S, P> {
    words: WordCollection,
    header: HeaderMetadata,
    state: UserStateStore<S>,
    user: UserId,
    known: KnownWordSet,
    speech: SpeechController<P>,
    rate: PlaybackRate,
}

/// Result of flipping a word between known and new.
#[derive(Debug)]
pub struct ToggleOutcome {
    pub word_id: WordId,
    pub known: bool,
    pub toggle_label: &'static str,
    /// Set when the new state could not be saved. The toggle stays applied.
    pub warning: Option<PersistenceError>,
}

impl<S: KeyValueStore, P: Speaker> FlashcardApp<S, P> {
    pub fn new(catalog: Catalog, state: UserStateStore<S>, speech: SpeechController<P>) -> Self {
        let user = state.load_last_user();
        let known = state.load_known_words(&user);
        info!(user = %user, known = known.len(), words = catalog.words.len(), "Session ready");
        Self {
            words: catalog.words,
            header: catalog.header,
            state,
            user,
            known,
            speech,
            rate: PlaybackRate::default(),
        }
    }

    pub fn words(&self) -> &WordCollection {
        &self.words
    }

    pub fn header(&self) -> &HeaderMetadata {
        &self.header
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn known(&self) -> &KnownWordSet {
        &self.known
    }

    /// Known words that still exist in the collection.
    pub fn known_count(&self) -> usize {
        self.known.iter().filter(|id| self.words.contains(*id)).count()
    }

    pub fn rate(&self) -> PlaybackRate {
        self.rate
    }

    pub fn set_rate(&mut self, rate: PlaybackRate) {
        self.rate = rate;
    }

    pub fn speech_mut(&mut self) -> &mut SpeechController<P> {
        &mut self.speech
    }

    pub fn visible(&self, filter: &FilterState) -> Vec<&Word> {
        filter_words(&self.words, filter, &self.known)
    }

    pub fn cards(&self, filter: &FilterState) -> Vec<CardView> {
        render_cards(&self.visible(filter), &self.known)
    }

    /// Flips `id` and saves the set immediately. Ids outside the collection
    /// are ignored.
    pub fn toggle_known(&mut self, id: WordId) -> Option<ToggleOutcome> {
        if !self.words.contains(id) {
            debug!(word_id = id, "Ignoring toggle for unknown word");
            return None;
        }
        let known = self.known.toggle(id);
        let warning = self.state.save_known_words(&self.user, &self.known).err();
        if let Some(err) = &warning {
            warn!(user = %self.user, word_id = id, error = %err, "known-word change not saved");
        }
        debug!(user = %self.user, word_id = id, known, "Toggled word");
        Some(ToggleOutcome {
            word_id: id,
            known,
            toggle_label: toggle_label(known),
            warning,
        })
    }

    /// Makes `user` active, saving the choice and loading their set. The
    /// switch applies even when saving fails; the error is returned.
    pub fn switch_user(&mut self, user: UserId) -> Option<PersistenceError> {
        let warning = self.state.set_last_user(&user).err();
        if let Some(err) = &warning {
            warn!(user = %user, error = %err, "active user not saved");
        }
        self.known = self.state.load_known_words(&user);
        info!(user = %user, known = self.known.len(), "Switched user");
        self.user = user;
        warning
    }

    /// Speaks `text` at the current rate. Engine failures are logged only.
    pub fn speak(&mut self, text: &str) -> bool {
        match self.speech.speak(text, self.rate) {
            Ok(started) => started,
            Err(err) => {
                warn!(error = %err, "speech failed");
                false
            }
        }
    }

    /// Routes one activation inside the card grid to its action.
    pub fn dispatch(&mut self, event: CardEvent) -> Dispatch {
        let (Some(card), Some(control)) = (event.card, event.control) else {
            return Dispatch::Ignored;
        };
        let Some(word) = self.words.get(card) else {
            return Dispatch::Ignored;
        };
        let text = word.value.clone();
        match control {
            CardControl::ToggleKnown => match self.toggle_known(card) {
                Some(outcome) => Dispatch::Toggled(outcome),
                None => Dispatch::Ignored,
            },
            CardControl::Speak => {
                let started = self.speak(&text);
                Dispatch::Spoke {
                    word: text,
                    started,
                }
            }
            CardControl::Lookup => {
                let url = lookup_url(&text);
                Dispatch::OpenLookup { word: text, url }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardControl {
    ToggleKnown,
    Speak,
    Lookup,
}

impl CardControl {
    pub fn as_str(self) -> &'static str {
        match self {
            CardControl::ToggleKnown => "toggle_known",
            CardControl::Speak => "speak",
            CardControl::Lookup => "lookup",
        }
    }
}

impl fmt::Display for CardControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown card control {0:?}")]
pub struct UnknownCardControl(pub String);

impl FromStr for CardControl {
    type Err = UnknownCardControl;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "toggle_known" => Ok(CardControl::ToggleKnown),
            "speak" => Ok(CardControl::Speak),
            "lookup" => Ok(CardControl::Lookup),
            other => Err(UnknownCardControl(other.to_string())),
        }
    }
}

/// One activation inside the card grid: the enclosing card, if any, and the
/// control that was hit, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardEvent {
    pub card: Option<WordId>,
    pub control: Option<CardControl>,
}

impl CardEvent {
    pub fn new(card: WordId, control: CardControl) -> Self {
        Self {
            card: Some(card),
            control: Some(control),
        }
    }
}

#[derive(Debug)]
pub enum Dispatch {
    Toggled(ToggleOutcome),
    Spoke { word: String, started: bool },
    OpenLookup { word: String, url: String },
    Ignored,
}
