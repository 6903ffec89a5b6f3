use pinprobe_core::ReleaseVersion;
use tracing::{debug, warn};

pub fn select_range<'a>(
    published: impl IntoIterator<Item = &'a str>,
    from: &str,
    to: &str,
    include_prereleases: bool,
) -> Vec<String> {
    let (lower, upper) = match (ReleaseVersion::parse(from), ReleaseVersion::parse(to)) {
        (Ok(lower), Ok(upper)) => (lower, upper),
        (Err(err), _) | (_, Err(err)) => {
            warn!(from, to, error = %err, "cannot select versions from unparsable bounds");
            return Vec::new();
        }
    };

    let mut selected = published
        .into_iter()
        .filter_map(|raw| match ReleaseVersion::parse(raw) {
            Ok(version) => Some(version),
            Err(_) => {
                debug!(version = raw, "skipping unparsable published version");
                None
            }
        })
        .filter(|version| *version >= lower && *version <= upper)
        .filter(|version| {
            include_prereleases
                || !version.is_prerelease()
                || *version == lower
                || *version == upper
        })
        .collect::<Vec<_>>();

    selected.sort();
    selected.dedup();
    selected
        .into_iter()
        .map(|version| version.as_str().to_string())
        .collect()
}
