//! Question text canonicalization.
//!
//! Cache keys and classifier patterns both work on the normalized form, so
//! normalization must be idempotent: applying it twice changes nothing.

/// Canonicalize question text: lowercase, collapse whitespace runs to one
/// space, strip terminal punctuation, trim.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', ',', ';', '?', '!'])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_strips_punctuation() {
        assert_eq!(normalize("Show CTR!!"), "show ctr");
        assert_eq!(normalize("How are my campaigns doing?"), "how are my campaigns doing");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(
            normalize("  how   many\tclicks\n last week "),
            "how many clicks last week"
        );
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        assert_eq!(normalize("Show CTR!!"), normalize("show ctr"));
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "Show CTR!!",
            "  多 spaces  here  ",
            "already normalized text",
            "trailing, commas,,,",
            "",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_interior_punctuation_preserved() {
        // Only terminal punctuation is stripped
        assert_eq!(normalize("cost-per-click, please."), "cost-per-click, please");
    }
}
