use super::model::Track;

// ---------------------------------------------------------------------------
// Sample selection by name
// ---------------------------------------------------------------------------

/// Return the keys that contain every needle as a substring, in iteration
/// order.
///
/// Sample names are built by joining their factors with `_`, so a needle such
/// as `"RED"` or `"_PEG"` selects every sample sharing that factor.  Matching
/// is plain substring search: `"PEG"` also matches `"nPEG"`.
pub fn matching_keys<'a, I, S>(keys: I, needles: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = &'a S>,
    S: AsRef<str> + 'a + ?Sized,
{
    keys.into_iter()
        .map(|k| k.as_ref())
        .filter(|key| needles.iter().all(|n| key.contains(n)))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Track length cut-off
// ---------------------------------------------------------------------------

/// Drop tracks with fewer than `cut` recorded frames.
pub fn discard_short_tracks(tracks: Vec<Track>, cut: usize) -> Vec<Track> {
    let before = tracks.len();
    let kept: Vec<Track> = tracks.into_iter().filter(|t| t.len() >= cut).collect();
    if kept.len() < before {
        log::debug!(
            "Discarded {} of {before} tracks shorter than {cut} frames",
            before - kept.len()
        );
    }
    kept
}
