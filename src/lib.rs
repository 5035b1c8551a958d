pub mod app;
pub mod cards;
pub mod config;
pub mod filter;
pub mod loader;
#[cfg(feature = "cli")]
pub mod logging;
pub mod speech;
pub mod store;
#[cfg(feature = "web")]
pub mod web;
pub mod word;

pub use app::{CardControl, CardEvent, Dispatch, FlashcardApp, ToggleOutcome, UnknownCardControl};
pub use cards::{CardView, lookup_url, render_cards};
pub use config::AppConfig;
pub use filter::{FilterState, KnownFilter, LevelFilter, UnknownKnownFilter, filter_words};
pub use loader::{DataLoadError, DataSources, DirFetcher, ResourceFetcher, load};
pub use speech::{
    CommandSpeaker, PlaybackRate, SilentSpeaker, Speaker, SpeechController, SpeechError, Voice,
    VoicePreferences,
};
pub use store::{
    FileStore, KeyValueStore, KnownWordSet, MemoryStore, PersistenceError, UserId, UserStateStore,
};
pub use word::{Catalog, HeaderMetadata, Level, Word, WordCollection, WordId};

pub type DynStore = Box<dyn KeyValueStore + Send>;
pub type DynSpeaker = Box<dyn Speaker + Send>;

/// Application wired to local files and the configured speech engine.
pub type LocalApp = FlashcardApp<DynStore, DynSpeaker>;

/// Loads the catalog from `config.data_dir` and opens the state file.
pub fn open_local(config: &AppConfig) -> Result<LocalApp, DataLoadError> {
    let catalog = load(&config.fetcher(), &config.sources)?;
    let speaker: DynSpeaker = match &config.speech_program {
        Some(program) => Box::new(CommandSpeaker::new(program.clone())),
        None => Box::new(SilentSpeaker),
    };
    let store: DynStore = Box::new(FileStore::open(&config.state_path));
    Ok(FlashcardApp::new(
        catalog,
        UserStateStore::with_default_user(store, config.default_user.clone()),
        SpeechController::new(speaker, config.voice.clone()),
    ))
}
