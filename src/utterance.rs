/// A single line of user input, as received.
///
/// Holds the raw text plus two derived forms: `text`, with whitespace
/// collapsed and trailing sentence punctuation removed (original case),
/// and `normalized`, the lowercase version of `text` used for lexicon
/// matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    raw: String,
    text: String,
    normalized: String,
}

impl Utterance {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = collapsed
            .trim_end_matches(['?', '!', '.'])
            .trim_end()
            .to_string();
        let normalized = text.to_lowercase();

        Self {
            raw,
            text,
            normalized,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl From<&str> for Utterance {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_lowercases() {
        let u = Utterance::new("  Hello   World\t again ");
        assert_eq!(u.text(), "Hello World again");
        assert_eq!(u.normalized(), "hello world again");
    }

    #[test]
    fn strips_trailing_sentence_punctuation() {
        let u = Utterance::new("What can you do?!");
        assert_eq!(u.normalized(), "what can you do");
    }

    #[test]
    fn raw_is_kept_verbatim() {
        let u = Utterance::new("ls  ~/Desktop ");
        assert_eq!(u.raw(), "ls  ~/Desktop ");
    }

    #[test]
    fn blank_input_is_empty() {
        assert!(Utterance::new("   ").is_empty());
        assert!(Utterance::new("?").is_empty());
    }
}
