use crate::error::IngestError;
use regex::Regex;

/// Anything that is not a word character, whitespace, or basic punctuation.
const DISALLOWED_CHARACTERS: &str = r"[^\w\s.,!?;:\-()\[\]{}]";

#[derive(Debug, Clone)]
pub struct TextCleaner {
    disallowed: Regex,
}

impl TextCleaner {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            disallowed: Regex::new(DISALLOWED_CHARACTERS)?,
        })
    }

    /// Strips disallowed characters and collapses whitespace runs to a single
    /// space. Never fails; input with nothing left yields an empty string.
    pub fn clean(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let filtered = self.disallowed.replace_all(text, "");
        filtered.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::TextCleaner;

    fn cleaner() -> TextCleaner {
        TextCleaner::new().expect("cleaner pattern should compile")
    }

    #[test]
    fn whitespace_is_collapsed_and_trimmed() {
        let cleaned = cleaner().clean("  A  \t  lot\nof \u{a0}  spacing \r\n");
        assert_eq!(cleaned, "A lot of spacing");
    }

    #[test]
    fn punctuation_is_kept_and_symbols_removed() {
        let cleaned = cleaner().clean("Pressure: 5 bar (max) — see [fig. 2]! @home #tag {x}; ok?");
        assert_eq!(cleaned, "Pressure: 5 bar (max) see [fig. 2]! home tag {x}; ok?");
    }

    #[test]
    fn unicode_word_characters_survive() {
        let cleaned = cleaner().clean("Größe ändern, naïve café_1");
        assert_eq!(cleaned, "Größe ändern, naïve café_1");
    }

    #[test]
    fn fully_filtered_input_is_empty() {
        let cleaner = cleaner();
        assert_eq!(cleaner.clean(""), "");
        assert_eq!(cleaner.clean("   \n\t "), "");
        assert_eq!(cleaner.clean("@#$%^&*"), "");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let cleaner = cleaner();
        let samples = [
            "Section 4.2 — Hydraulic   pump\n\nfailure @ 300 psi",
            "  «quoted» text / with | pipes ",
            "plain words only",
            "a @ b # c",
            "",
        ];
        for sample in samples {
            let once = cleaner.clean(sample);
            assert_eq!(cleaner.clean(&once), once, "sample: {sample:?}");
        }
    }
}
