//! # Hostnames
//!
//! Syntax checks and canonical form for the hostnames sent to the CA.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// At least two labels, optional leading wildcard label
static HOSTNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*\.)?([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")
        .expect("Failed to compile HOSTNAME_REGEX - this should never happen")
});

const MAX_HOSTNAME_LEN: usize = 253;

/// Lower-case and strip a trailing root dot
pub fn canonicalize(hostname: &str) -> String {
    hostname.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Whether a canonical hostname is acceptable to the CA
///
/// Wildcards are allowed only as the whole leftmost label.
pub fn is_valid_hostname(hostname: &str) -> bool {
    hostname.len() <= MAX_HOSTNAME_LEN && HOSTNAME_REGEX.is_match(hostname)
}

/// Canonical, de-duplicated set of hostnames
pub fn canonical_set<I, S>(hostnames: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    hostnames
        .into_iter()
        .map(|h| canonicalize(h.as_ref()))
        .filter(|h| !h.is_empty())
        .collect()
}
