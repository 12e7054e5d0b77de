//! Result file naming

/// Reduce query text to a file-name-safe slug
///
/// Spaces become hyphens, everything is lowercased, and any character other
/// than `a-z`, `0-9` or `-` is dropped.
pub fn slugify(query: &str) -> String {
    query
        .replace(' ', "-")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// File name for the `attempt`-th candidate of a reservation
///
/// Attempt 0 is the plain name; later attempts add a numeric suffix.
pub fn candidate_file_name(query: &str, key: &str, extension: &str, attempt: u32) -> String {
    let base = format!("{}-{}", slugify(query), key);
    let extension = extension.trim_start_matches('.').to_lowercase();

    if attempt == 0 {
        format!("{}.{}", base, extension)
    } else {
        format!("{}-{}.{}", base, attempt, extension)
    }
}
