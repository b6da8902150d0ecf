//! Emergency stop phrases typed into the chat

const ALLSTOP_PHRASES: &[&str] = &[
    "allstop",
    "all stop",
    "stop all",
    "stop everything",
    "halt",
    "emergency stop",
];

/// Lowercase, drop punctuation, collapse whitespace.
fn normalize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// True when the text contains one of the allstop phrases as a run of whole words.
///
/// Matching is word-bounded on purpose: substring matching would fire on
/// words like "asphalt" or "behalf".
pub fn is_allstop(text: &str) -> bool {
    let words = normalize(text);
    if words.is_empty() {
        return false;
    }
    ALLSTOP_PHRASES.iter().any(|phrase| {
        let needle: Vec<&str> = phrase.split(' ').collect();
        words
            .windows(needle.len())
            .any(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_phrases() {
        for phrase in ALLSTOP_PHRASES {
            assert!(is_allstop(phrase), "{} should match", phrase);
        }
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        assert!(is_allstop("please ALL STOP now"));
        assert!(is_allstop("All-Stop!"));
        assert!(is_allstop("HALT."));
        assert!(is_allstop("ok... stop,   everything"));
        assert!(is_allstop("Emergency   STOP!!!"));
    }

    #[test]
    fn test_non_matches() {
        assert!(!is_allstop(""));
        assert!(!is_allstop("   "));
        assert!(!is_allstop("stop"));
        assert!(!is_allstop("the asphalt is hot"));
        assert!(!is_allstop("all good, keep going"));
        assert!(!is_allstop("stopall the things"));
    }
}
