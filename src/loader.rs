use crate::word::{Catalog, HeaderMetadata, Word, WordCollection};
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Failure to fetch or parse one of the required data resources.
#[derive(Debug, Error)]
pub enum DataLoadError {
    #[error("failed to fetch {resource}: {source}")]
    Fetch {
        resource: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {resource}: {source}")]
    Parse {
        resource: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of raw data resources addressed by relative name.
pub trait ResourceFetcher: Sync {
    fn fetch(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// Reads resources from files under a root directory.
#[derive(Debug, Clone)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceFetcher for DirFetcher {
    fn fetch(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.root.join(name))
    }
}

/// Names of the three resources that make up a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSources {
    pub primary_words: String,
    pub secondary_words: String,
    pub header: String,
}

impl Default for DataSources {
    fn default() -> Self {
        Self {
            primary_words: "gameWords.json".to_string(),
            secondary_words: "levelwords.json".to_string(),
            header: "generalExternalData.json".to_string(),
        }
    }
}

/// Fetches all three resources in parallel and merges the word lists.
///
/// Either every resource loads or the whole call fails; the primary list wins
/// when both lists carry the same id.
pub fn load<F: ResourceFetcher>(fetcher: &F, sources: &DataSources) -> Result<Catalog, DataLoadError> {
    let (primary, (secondary, header)) = rayon::join(
        || fetch_json::<Vec<Word>, _>(fetcher, &sources.primary_words),
        || {
            rayon::join(
                || fetch_json::<Vec<Word>, _>(fetcher, &sources.secondary_words),
                || fetch_json::<HeaderMetadata, _>(fetcher, &sources.header),
            )
        },
    );
    let primary = primary?;
    let secondary = secondary?;
    let header = header?;

    let fetched = primary.len() + secondary.len();
    let words = WordCollection::merge(primary, secondary);
    info!(
        words = words.len(),
        duplicates = fetched - words.len(),
        title = %header.external_name,
        "Loaded word catalog"
    );
    Ok(Catalog { words, header })
}

fn fetch_json<T, F>(fetcher: &F, name: &str) -> Result<T, DataLoadError>
where
    T: DeserializeOwned,
    F: ResourceFetcher,
{
    let bytes = fetcher.fetch(name).map_err(|source| DataLoadError::Fetch {
        resource: name.to_string(),
        source,
    })?;
    debug!(resource = name, bytes = bytes.len(), "Fetched resource");
    serde_json::from_slice(&bytes).map_err(|source| DataLoadError::Parse {
        resource: name.to_string(),
        source,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn load_merges_sources_primary_first() {
        let catalog = load(&full_fetcher(), &DataSources::default()).unwrap();
        let ids: Vec<_> = catalog.words.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(catalog.words.get(2).unwrap().value, "borrow");
        assert_eq!(catalog.header.external_name, "Word Trainer");
    }

    #[test]
    fn missing_resource_fails_whole_load() {
        let sources = DataSources::default();
        let fetcher = MapFetcher::default()
            .with(&sources.primary_words, PRIMARY)
            .with(&sources.header, HEADER);
        match load(&fetcher, &sources) {
            Err(DataLoadError::Fetch { resource, .. }) => {
                assert_eq!(resource, sources.secondary_words)
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }

    #[test]
    fn unparsable_resource_is_a_parse_error() {
        let sources = DataSources::default();
        let fetcher = full_fetcher().with(&sources.header, "<html>not json</html>");
        let err = load(&fetcher, &sources).unwrap_err();
        assert!(matches!(err, DataLoadError::Parse { ref resource, .. } if resource == &sources.header));
        assert!(err.to_string().contains("generalExternalData.json"));
    }

    #[test]
    fn negative_and_wide_ids_load() {
        let sources = DataSources::default();
        let secondary = r#"[
            {"id": -4, "value": "dusk", "level": 1, "meaning": "early evening", "exampleSentence": "We left at dusk."},
            {"id": 5000000000, "value": "ember", "level": 2, "meaning": "a glowing coal", "exampleSentence": "An ember fell."}
        ]"#;
        let fetcher = full_fetcher().with(&sources.secondary_words, secondary);
        let catalog = load(&fetcher, &sources).unwrap();
        let ids: Vec<_> = catalog.words.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![1, 2, -4, 5_000_000_000]);
        assert_eq!(catalog.words.get(-4).unwrap().value, "dusk");
    }

    #[test]
    fn dir_fetcher_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let sources = DataSources::default();
        fs::write(dir.path().join(&sources.primary_words), PRIMARY).unwrap();
        fs::write(dir.path().join(&sources.secondary_words), SECONDARY).unwrap();
        fs::write(dir.path().join(&sources.header), HEADER).unwrap();
        let catalog = load(&DirFetcher::new(dir.path()), &sources).unwrap();
        assert_eq!(catalog.words.len(), 3);
    }
}
