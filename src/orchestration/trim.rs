//! Word-budget trimming for assembled resource turns

/// Result of trimming text to a word budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimResult {
    /// Text after trimming (unchanged when within budget)
    pub trimmed: String,
    /// Whitespace-delimited words before trimming
    pub original_word_count: usize,
    /// Whitespace-delimited words after trimming
    pub trimmed_word_count: usize,
}

impl TrimResult {
    /// Whether any words were cut
    pub fn was_trimmed(&self) -> bool {
        self.trimmed_word_count < self.original_word_count
    }
}

/// Count whitespace-delimited words
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keep the first `max_words` words of `text`.
///
/// Formatting inside the kept prefix (newlines, indentation) is preserved;
/// the cut happens right after the last kept word. Text within budget is
/// returned as is.
pub fn trim_to_words(text: &str, max_words: usize) -> TrimResult {
    let original_word_count = count_words(text);
    if original_word_count <= max_words {
        return TrimResult {
            trimmed: text.to_string(),
            original_word_count,
            trimmed_word_count: original_word_count,
        };
    }

    let mut words = 0;
    let mut in_word = false;
    let mut cut = 0;

    if max_words > 0 {
        for (idx, ch) in text.char_indices() {
            if ch.is_whitespace() {
                if in_word {
                    in_word = false;
                    if words == max_words {
                        cut = idx;
                        break;
                    }
                }
            } else if !in_word {
                in_word = true;
                words += 1;
            }
        }
    }

    let trimmed = text[..cut].to_string();
    let trimmed_word_count = count_words(&trimmed);

    TrimResult {
        trimmed,
        original_word_count,
        trimmed_word_count,
    }
}

/// One-line note appended to a turn whose content was trimmed
pub fn trim_note(kind: &str, result: &TrimResult, budget: usize) -> String {
    format!(
        "[Note: {} content was trimmed from {} to {} words to fit the {}-word budget.]",
        kind, result.original_word_count, result.trimmed_word_count, budget
    )
}
