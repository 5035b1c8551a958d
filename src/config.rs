use crate::loader::{DataSources, DirFetcher};
use crate::speech::VoicePreferences;
use crate::store::UserId;
use std::path::PathBuf;

/// Locations and defaults shared by every front end.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub state_path: PathBuf,
    pub sources: DataSources,
    pub default_user: UserId,
    /// Identities offered by user selectors. The active user is always
    /// offered as well.
    pub users: Vec<UserId>,
    pub voice: VoicePreferences,
    pub speech_program: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            state_path: PathBuf::from(".wordcards/state.json"),
            sources: DataSources::default(),
            default_user: UserId::default(),
            users: ["user1", "user2", "user3"]
                .into_iter()
                .filter_map(UserId::new)
                .collect(),
            voice: VoicePreferences::default(),
            speech_program: Some("espeak-ng".to_string()),
        }
    }
}

impl AppConfig {
    pub fn fetcher(&self) -> DirFetcher {
        DirFetcher::new(&self.data_dir)
    }

    /// Selector options with `active` included exactly once.
    pub fn user_options(&self, active: &UserId) -> Vec<UserId> {
        let mut options = self.users.clone();
        if !options.contains(active) {
            options.push(active.clone());
        }
        options
    }
}
