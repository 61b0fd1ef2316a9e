//! Classification of transient IDE-host crashes.

use std::sync::OnceLock;

use regex::Regex;

/// Crash banners printed by the IDE launcher script when the host process dies.
const CRASH_SIGNATURES: &[&str] = &[
    r"Atom\.app/atom:\s+line 117:\s+\d+\s+Segmentation fault: 11",
    r"Atom\.app/atom:\s+line 117:\s+\d+\s+Abort trap: 6",
    r"Atom\.app/atom:\s+line 117:\s+\d+\s+Illegal instruction: 4",
    r"Atom\.app/atom:\s+line 117:\s+\d+\s+Bus error: 10",
];

static SIGNATURES: OnceLock<Vec<Regex>> = OnceLock::new();

fn signatures() -> &'static [Regex] {
    SIGNATURES.get_or_init(|| {
        CRASH_SIGNATURES
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::error!(pattern = %pattern, error = %e, "invalid crash signature");
                    None
                }
            })
            .collect()
    })
}

/// Returns true if `output` contains a known transient crash signature.
pub fn is_retryable(output: &str) -> bool {
    signatures().iter().any(|re| re.is_match(output))
}
