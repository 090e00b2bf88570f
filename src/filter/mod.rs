//! # Content Filter
//!
//! Masks profane words in a transcript before it reaches the conversation
//! history or the chat service. The word list is embedded at compile time;
//! there is no runtime configuration surface.
//!
//! ## Matching rules:
//! - Whole words only ("class" is not touched because of "ass")
//! - Case-insensitive
//! - Leading/trailing punctuation is kept and not considered part of the word
//! - Common character substitutions are undone before lookup ("sh1t", "$hit")
//! - `*` inside a word matches any letter ("f*ck")
//! - Hyphen, underscore and apostrophe separated parts are checked individually

use std::collections::HashSet;

const DEFAULT_WORDLIST: &str = include_str!("wordlist.txt");

/// Replacement for a censored word.
pub const CENSOR: &str = "****";

/// Characters that can start a disguised word even though they are not letters.
const LEADING_SUBSTITUTES: &[char] = &['@', '$'];

/// Characters that can end a disguised word ("a$$", "sh!").
const TRAILING_SUBSTITUTES: &[char] = &['$', '!'];

/// Separators inside a token that split it into independently checked parts.
const PART_SEPARATORS: &[char] = &['-', '_', '\'', '\u{2019}'];

/// Deterministic, side-effect free profanity masker.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    words: HashSet<String>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::from_words(DEFAULT_WORDLIST.lines())
    }
}

impl ContentFilter {
    /// Filter loaded with the embedded default word list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter loaded with a custom word list (blank lines and `#` comments ignored).
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty() && !w.starts_with('#'))
            .collect();
        Self { words }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Replace every profane word in `text` with [`CENSOR`], preserving
    /// whitespace and surrounding punctuation exactly.
    pub fn censor(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut token_start: Option<usize> = None;

        for (idx, ch) in text.char_indices() {
            if ch.is_whitespace() {
                if let Some(start) = token_start.take() {
                    self.push_token(&text[start..idx], &mut out);
                }
                out.push(ch);
            } else if token_start.is_none() {
                token_start = Some(idx);
            }
        }
        if let Some(start) = token_start {
            self.push_token(&text[start..], &mut out);
        }

        out
    }

    fn push_token(&self, token: &str, out: &mut String) {
        match self.profane_span(token) {
            Some((start, end)) => {
                out.push_str(&token[..start]);
                out.push_str(CENSOR);
                out.push_str(&token[end..]);
            }
            None => out.push_str(token),
        }
    }

    /// Span of the profane word in `token`, if any. Trailing `$`/`!` are
    /// punctuation unless the word only matches with some of them included.
    fn profane_span(&self, token: &str) -> Option<(usize, usize)> {
        if let Some((start, end)) = core_span(token, &[]) {
            if self.is_profane(&token[start..end]) {
                return Some((start, end));
            }
        }

        let (start, mut end) = core_span(token, TRAILING_SUBSTITUTES)?;
        while start < end {
            if self.is_profane(&token[start..end]) {
                return Some((start, end));
            }
            match token[start..end].chars().next_back() {
                Some(c) if TRAILING_SUBSTITUTES.contains(&c) => end -= c.len_utf8(),
                _ => break,
            }
        }
        None
    }

    fn is_profane(&self, core: &str) -> bool {
        let lowered = core.to_lowercase();
        std::iter::once(lowered.as_str())
            .chain(lowered.split(PART_SEPARATORS))
            .filter(|candidate| !candidate.is_empty())
            .any(|candidate| self.matches(candidate))
    }

    fn matches(&self, candidate: &str) -> bool {
        // Plain numbers are never words, even if they decode to one ("455")
        if candidate.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        let normalized = undo_substitutions(candidate);
        if !normalized.contains('*') {
            return self.words.contains(&normalized);
        }

        let pattern: Vec<char> = normalized.chars().collect();
        self.words.iter().any(|word| {
            word.chars().count() == pattern.len()
                && word.chars().zip(&pattern).all(|(w, &p)| p == '*' || p == w)
        })
    }
}

/// Byte range of the word inside a whitespace-delimited token. The word may
/// end in any of `trailing` as well as in a letter or digit.
fn core_span(token: &str, trailing: &[char]) -> Option<(usize, usize)> {
    let start = token
        .char_indices()
        .find(|&(_, c)| c.is_alphanumeric() || LEADING_SUBSTITUTES.contains(&c))
        .map(|(i, _)| i)?;
    let end = token
        .char_indices()
        .rev()
        .find(|&(_, c)| c.is_alphanumeric() || trailing.contains(&c))
        .map(|(i, c)| i + c.len_utf8())?;
    (start < end).then_some((start, end))
}

fn undo_substitutions(word: &str) -> String {
    word.chars()
        .map(|c| match c {
            '@' | '4' => 'a',
            '$' | '5' => 's',
            '0' => 'o',
            '1' | '!' => 'i',
            '3' => 'e',
            '7' => 't',
            other => other,
        })
        .collect()
}
