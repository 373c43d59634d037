use std::collections::HashSet;

pub const DEFAULT_SEPARATORS: [char; 2] = [',', '.'];

/// Split a free-text prompt into trimmed, non-empty pieces.
///
/// Any character in `separators` ends a piece. With `deduplicate`, later
/// repeats are dropped and the first occurrence keeps its position.
pub fn parse_prompts(text: &str, separators: &[char], deduplicate: bool) -> Vec<String> {
    let pieces = text
        .split(|c: char| separators.contains(&c))
        .map(str::trim)
        .filter(|piece| !piece.is_empty());

    if deduplicate {
        let mut seen = HashSet::new();
        pieces
            .filter(|piece| seen.insert(*piece))
            .map(str::to_string)
            .collect()
    } else {
        pieces.map(str::to_string).collect()
    }
}
