use crate::model::{normalize_for_search, AppInfo};

/// Ranks discovered apps against `query`. An empty query keeps discovery
/// order and just applies the limit.
pub fn rank_apps(apps: &[AppInfo], query: &str, limit: usize) -> Vec<AppInfo> {
    if limit == 0 || apps.is_empty() {
        return Vec::new();
    }

    let normalized_query = normalize_for_search(query);
    if normalized_query.is_empty() {
        return apps.iter().take(limit).cloned().collect();
    }

    let mut scored: Vec<(i64, usize, &AppInfo)> = apps
        .iter()
        .enumerate()
        .filter_map(|(index, app)| {
            score_name(app.normalized_name(), &normalized_query).map(|score| (score, index, app))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    scored
        .into_iter()
        .take(limit)
        .map(|(_, _, app)| app.clone())
        .collect()
}

fn score_name(normalized_name: &str, query: &str) -> Option<i64> {
    if normalized_name.is_empty() || query.is_empty() {
        return None;
    }

    if let Some(position) = normalized_name.find(query) {
        let prefix_bonus = if position == 0 { 400 } else { 0 };
        let compact_bonus = (query.len() as i64) * 40;
        let position_penalty = position as i64;
        let length_penalty = (normalized_name.len() as i64 - query.len() as i64).abs();
        return Some(10_000 + prefix_bonus + compact_bonus - position_penalty - length_penalty);
    }

    let positions = subsequence_positions(normalized_name, query)?;
    let start_penalty = positions[0] as i64;
    let gap_penalty: i64 = positions
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0] + 1) as i64)
        .sum();
    let length_penalty = (normalized_name.len() as i64 - query.len() as i64).max(0);

    Some(5_000 + (query.len() as i64) * 30 - gap_penalty * 6 - start_penalty - length_penalty)
}

fn subsequence_positions(haystack: &str, needle: &str) -> Option<Vec<usize>> {
    let mut positions = Vec::with_capacity(needle.len());
    let mut next_start = 0;

    for needle_char in needle.chars() {
        let (offset, hay_char) = haystack[next_start..]
            .char_indices()
            .find(|(_, hay_char)| *hay_char == needle_char)?;
        let absolute = next_start + offset;
        next_start = absolute + hay_char.len_utf8();
        positions.push(absolute);
    }

    Some(positions)
}
