//! Stop-word removal applied to queries and label text before embedding.
//!
//! Tokens are split on single spaces and compared case-sensitively against a
//! closed English stop-word list. Nothing else is touched: no case folding,
//! no stemming, no punctuation handling.

use once_cell::sync::Lazy;
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves",
    "you", "you're", "you've", "you'll", "you'd", "your", "yours", "yourself",
    "yourselves", "he", "him", "his", "himself", "she", "she's",
    "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this",
    "that", "that'll", "these", "those", "am", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "having", "do", "does", "did",
    "doing", "a", "an", "the", "and", "but", "if", "or", "because", "as",
    "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "won", "won't", "wouldn", "wouldn't", "between", "into", "through",
    "during", "before", "after", "above", "below", "to", "from", "up", "down",
    "in", "out", "on", "off", "over", "under", "again", "further", "then",
    "once", "here", "there", "when", "where", "why", "how", "all", "any",
    "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "s",
    "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn",
    "couldn't", "didn", "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn",
    "hasn't", "haven", "haven't", "isn", "isn't", "ma",
    "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't",
    "shan", "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren",
    "weren't",
];

static STOP_WORD_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| STOP_WORDS.iter().copied().collect());

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORD_SET.contains(token)
}

/// Remove stop-words from `text`, keeping the surviving tokens in order.
///
/// An input made only of stop-words normalizes to the empty string.
pub fn normalize(text: &str) -> String {
    text.split(' ')
        .filter(|token| !is_stop_word(token))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_stop_words() {
        assert_eq!(normalize("cat playing a piano"), "cat playing piano");
        assert_eq!(normalize("the dog is on the bicycle"), "dog bicycle");
    }

    #[test]
    fn test_case_sensitive() {
        // "The" is not in the list, only "the"
        assert_eq!(normalize("The cat"), "The cat");
    }

    #[test]
    fn test_exact_token_match_only() {
        assert_eq!(normalize("island theory"), "island theory");
        assert_eq!(normalize("don't stop"), "stop");
    }

    #[test]
    fn test_punctuation_is_kept() {
        assert_eq!(normalize("a cat, the dog."), "cat, dog.");
    }

    #[test]
    fn test_all_stop_words_yield_empty() {
        assert_eq!(normalize("what is this"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "cat playing a piano",
            "  double  spaced  the  text ",
            "what is this",
            "Mountain Sky Cloud",
            "",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_never_adds_tokens_and_keeps_order() {
        let input = "a red car and the blue bus near my house";
        let output = normalize(input);
        let out_tokens: Vec<_> = output.split(' ').collect();
        let in_tokens: Vec<_> = input.split(' ').collect();
        assert!(out_tokens.len() <= in_tokens.len());

        let mut cursor = in_tokens.iter();
        for token in &out_tokens {
            assert!(cursor.any(|t| t == token), "{token} out of order");
        }
        assert_eq!(output, "red car blue bus near house");
    }

    #[test]
    fn test_stop_word_list_has_no_padding() {
        for word in STOP_WORDS {
            assert_eq!(word.trim(), *word);
            assert!(!word.is_empty());
        }
    }
}
