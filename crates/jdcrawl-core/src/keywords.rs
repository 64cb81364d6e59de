use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::ConfigError;

#[derive(Debug, Deserialize)]
pub struct KeywordsFile {
    pub keywords: Vec<String>,
}

/// Generate a file-safe slug for a search keyword.
///
/// ASCII letters are lowercased; other alphanumerics (including CJK) are kept
/// as-is; everything else collapses to a single `_`.
#[must_use]
pub fn keyword_slug(keyword: &str) -> String {
    keyword
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Load and validate the search keyword list from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_keywords(path: &Path) -> Result<KeywordsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::KeywordsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut file: KeywordsFile =
        serde_yaml::from_str(&content).map_err(ConfigError::KeywordsFileParse)?;

    for keyword in &mut file.keywords {
        *keyword = keyword.trim().to_owned();
    }

    validate_keywords(&file)?;

    Ok(file)
}

fn validate_keywords(file: &KeywordsFile) -> Result<(), ConfigError> {
    if file.keywords.is_empty() {
        return Err(ConfigError::Validation(
            "keywords file must list at least one keyword".to_string(),
        ));
    }

    let mut seen_slugs = HashSet::new();
    for keyword in &file.keywords {
        let slug = keyword_slug(keyword);
        if slug.is_empty() {
            return Err(ConfigError::Validation(format!(
                "keyword '{keyword}' has no searchable characters"
            )));
        }
        if !seen_slugs.insert(slug.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate keyword slug: '{slug}' (from keyword '{keyword}')"
            )));
        }
    }

    Ok(())
}
