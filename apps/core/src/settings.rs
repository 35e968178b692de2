use std::collections::HashSet;

use crate::model::FavouriteKind;

/// User input for creating or editing a favourite, before it touches the
/// stored config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavouriteDraft {
    pub name: String,
    pub lnk_path: String,
    pub kind: String,
    pub browser_links: Vec<String>,
}

/// Accepts only `http://` and `https://` links. Returns the trimmed URL.
pub fn validate_url(input: &str) -> Result<String, String> {
    let url = normalize_url(input);
    if url.is_empty() {
        return Err("URL is required.".to_string());
    }
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err("URL must start with http:// or https://.".to_string());
    }
    if lower == "http://" || lower == "https://" {
        return Err("URL must include a host.".to_string());
    }
    Ok(url)
}

pub fn normalize_url(input: &str) -> String {
    input.trim().to_string()
}

/// Drops repeated URLs, keeping the first occurrence of each.
pub fn deduplicate_urls(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.iter()
        .map(|url| normalize_url(url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub fn validate_delay_seconds(value: u32) -> Result<(), String> {
    if (1..=20).contains(&value) {
        Ok(())
    } else {
        Err("Delay must be between 1 and 20 seconds.".to_string())
    }
}

/// Checks a draft and returns its parsed kind along with the cleaned-up
/// links (validated and deduplicated).
pub fn validate_favourite_draft(
    draft: &FavouriteDraft,
) -> Result<(FavouriteKind, Vec<String>), String> {
    if draft.name.trim().is_empty() {
        return Err("Name is required.".to_string());
    }
    if draft.lnk_path.trim().is_empty() {
        return Err("Shortcut path is required.".to_string());
    }
    let kind = FavouriteKind::parse(&draft.kind)
        .ok_or_else(|| format!("Unknown favourite kind '{}'.", draft.kind.trim()))?;

    let mut links = Vec::with_capacity(draft.browser_links.len());
    for link in &draft.browser_links {
        links.push(validate_url(link)?);
    }
    Ok((kind, deduplicate_urls(&links)))
}
