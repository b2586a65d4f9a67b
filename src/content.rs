use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ContentConfig, ContentSourceType};
use crate::error::{ContentError, Result as AppResult};

/// Minimum usable word-list size, for preset categories and validated
/// custom lists alike.
pub const MIN_WORDS: usize = 5;

const MAX_CUSTOM_WORD_LEN: usize = 32;
const MIN_CUSTOM_WORD_LEN: usize = 2;

/// Built-in catalog used when no external content source is configured.
const DEFAULT_CATALOG: &[(&str, &[&str])] = &[
    (
        "Animals",
        &[
            "Dog", "Cat", "Elephant", "Giraffe", "Penguin", "Dolphin", "Kangaroo", "Octopus",
            "Hedgehog", "Falcon", "Walrus", "Chameleon", "Otter", "Moose", "Flamingo", "Badger",
        ],
    ),
    (
        "Food",
        &[
            "Pizza", "Sushi", "Pancake", "Meatball", "Taco", "Croissant", "Dumpling", "Lasagna",
            "Porridge", "Waffle", "Burrito", "Cinnamon bun", "Omelette", "Falafel", "Ramen",
        ],
    ),
    (
        "Places",
        &[
            "Library", "Airport", "Lighthouse", "Hospital", "Castle", "Submarine", "Sauna",
            "Stadium", "Greenhouse", "Casino", "Monastery", "Campsite", "Elevator", "Museum",
        ],
    ),
    (
        "Occupations",
        &[
            "Firefighter", "Dentist", "Astronaut", "Locksmith", "Beekeeper", "Magician",
            "Plumber", "Archaeologist", "Barista", "Referee", "Tailor", "Pilot", "Librarian",
        ],
    ),
    (
        "Sports",
        &[
            "Curling", "Handball", "Fencing", "Biathlon", "Badminton", "Rowing", "Darts",
            "Orienteering", "Wrestling", "Snooker", "Floorball", "Archery", "Trampoline",
        ],
    ),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub words: Vec<String>,
}

// Root structure matching the external JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWordCatalog {
    pub categories: Vec<Category>,
}

pub struct CatalogParser;

impl CatalogParser {
    /// Parse JSON catalog data, dropping empty words and undersized
    /// categories.
    #[tracing::instrument(skip(content), fields(content.length = content.len()))]
    pub fn parse(content: &str) -> Result<Vec<Category>, ContentError> {
        let json_data: JsonWordCatalog = serde_json::from_str(content)
            .map_err(|e| ContentError::Parse(format!("Failed to parse JSON: {e}")))?;

        let categories: Vec<Category> = json_data
            .categories
            .into_iter()
            .map(|c| Category {
                name: c.name.trim().to_string(),
                words: c
                    .words
                    .into_iter()
                    .map(|w| w.trim().to_string())
                    .filter(|w| !w.is_empty())
                    .collect(),
            })
            .filter(|c| !c.name.is_empty())
            .collect();

        for dropped in categories.iter().filter(|c| c.words.len() < MIN_WORDS) {
            tracing::warn!(
                category.name = %dropped.name,
                words.count = dropped.words.len(),
                words.min = MIN_WORDS,
                "Dropping undersized category"
            );
        }

        let categories: Vec<Category> = categories
            .into_iter()
            .filter(|c| c.words.len() >= MIN_WORDS)
            .collect();

        if categories.is_empty() {
            return Err(ContentError::Parse(
                "Catalog contains no usable categories".to_string(),
            ));
        }
        Ok(categories)
    }
}

fn default_catalog() -> Vec<Category> {
    DEFAULT_CATALOG
        .iter()
        .map(|(name, words)| Category {
            name: name.to_string(),
            words: words.iter().map(|w| w.to_string()).collect(),
        })
        .collect()
}

#[tracing::instrument(skip(config))]
async fn load_raw_content(config: &ContentConfig) -> Result<String, ContentError> {
    match config.source_type {
        ContentSourceType::Embedded => Err(ContentError::Config(
            "Embedded catalog has no raw content to load".to_string(),
        )),
        ContentSourceType::File => {
            let file_path = config.file_path.as_ref().ok_or_else(|| {
                ContentError::Config("File path required for file source".to_string())
            })?;
            tracing::debug!(file.path = %file_path, "Loading catalog from file");
            tokio::fs::read_to_string(file_path)
                .await
                .map_err(|e| ContentError::FileRead { path: file_path.clone(), source: e })
        }
        ContentSourceType::Http => {
            let url = config.http_url.as_ref().ok_or_else(|| {
                ContentError::Config("HTTP URL required for http source".to_string())
            })?;
            tracing::debug!(http.url = %url, "Fetching catalog from URL");
            let response = reqwest::get(url)
                .await
                .map_err(|e| ContentError::HttpFetch { url: url.clone(), source: e })?;
            response
                .text()
                .await
                .map_err(|e| ContentError::HttpFetch { url: url.clone(), source: e })
        }
    }
}

async fn load_catalog_from_config(config: &ContentConfig) -> Result<Vec<Category>, ContentError> {
    if config.source_type == ContentSourceType::Embedded {
        return Ok(default_catalog());
    }
    let raw = load_raw_content(config).await?;
    CatalogParser::parse(&raw)
}

/// Preset word lists, cached and refreshable at runtime.
#[derive(Debug)]
pub struct WordCatalog {
    categories: RwLock<Arc<Vec<Category>>>,
    content_config: ContentConfig,
}

impl WordCatalog {
    #[tracing::instrument(skip(config), fields(content.source_type = ?config.source_type))]
    pub async fn new(config: ContentConfig) -> AppResult<Self> {
        let categories = load_catalog_from_config(&config).await.map_err(|err| {
            tracing::error!(error = %err, "Failed to load word catalog");
            err
        })?;

        tracing::info!(
            categories.count = categories.len(),
            words.total = categories.iter().map(|c| c.words.len()).sum::<usize>(),
            "WordCatalog initialized"
        );

        Ok(Self { categories: RwLock::new(Arc::new(categories)), content_config: config })
    }

    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> AppResult<()> {
        let new_categories = load_catalog_from_config(&self.content_config).await?;
        let mut guard = self.categories.write().await;
        *guard = Arc::new(new_categories);
        tracing::info!(categories.count = guard.len(), "Refreshed word catalog");
        Ok(())
    }

    pub async fn category_names(&self) -> Vec<String> {
        self.categories
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Words for a named preset category; `None` when the category is
    /// unknown. Lookup is case-insensitive.
    pub async fn words_for(&self, category: &str) -> Option<Vec<String>> {
        let categories = self.categories.read().await;
        categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(category))
            .map(|c| c.words.clone())
    }

    /// The catalog's first category, used as every new room's default.
    pub async fn default_category(&self) -> String {
        self.categories
            .read()
            .await
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }
}

fn is_valid_custom_word(word: &str) -> bool {
    let len = word.chars().count();
    (MIN_CUSTOM_WORD_LEN..=MAX_CUSTOM_WORD_LEN).contains(&len)
        && word
            .chars()
            .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'')
}

/// Parses free-form custom-words text into a cleaned word list.
///
/// Words are split on newlines and commas, trimmed, checked against the
/// per-word charset/length rules and de-duplicated case-insensitively.
/// The result is only playable once it reaches [`MIN_WORDS`] entries.
pub fn parse_custom_words(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(['\n', ','])
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .filter(|w| is_valid_custom_word(w))
        .filter(|w| seen.insert(w.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_categories_are_playable() {
        let catalog = default_catalog();
        assert!(!catalog.is_empty());
        for category in &catalog {
            assert!(
                category.words.len() >= MIN_WORDS,
                "category {} too small",
                category.name
            );
        }
    }

    #[test]
    fn parses_json_catalog() {
        let content = r#"{
  "categories": [
    { "name": "Animals", "words": ["dog", "cat", "owl", "fox", "elk", ""] },
    { "name": "Tiny", "words": ["one", "two"] }
  ]
}"#;
        let categories = CatalogParser::parse(content).unwrap();
        // "Tiny" is dropped, the empty word in "Animals" is filtered.
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Animals");
        assert_eq!(categories[0].words.len(), 5);
    }

    #[test]
    fn rejects_catalog_with_no_usable_categories() {
        let content = r#"{ "categories": [ { "name": "Tiny", "words": ["a b"] } ] }"#;
        assert!(CatalogParser::parse(content).is_err());
    }

    #[test]
    fn custom_words_are_split_trimmed_and_deduplicated() {
        let words = parse_custom_words("Dog, cat\n owl ,DOG\ncat\nfox, elk");
        assert_eq!(words, vec!["Dog", "cat", "owl", "fox", "elk"]);
    }

    #[test]
    fn custom_words_enforce_charset_and_length() {
        let words = parse_custom_words(
            "ok-word, x, word123, valid word, O'Brien, waaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaay-too-long",
        );
        assert_eq!(words, vec!["ok-word", "valid word", "O'Brien"]);
    }

    #[test]
    fn empty_custom_text_yields_no_words() {
        assert!(parse_custom_words("").is_empty());
        assert!(parse_custom_words(" ,\n, ").is_empty());
    }
}
