//! Wake-phrase dispatch for final speech results.
//!
//! A final utterance is scanned for each trigger phrase in table order
//! (case-insensitive).  The first phrase found is cut out of the utterance,
//! once, and whatever remains, surrounding whitespace included, becomes the
//! conversational prompt.

use std::ops::Range;

pub const DEFAULT_TRIGGERS: &[&str] = &["oye paco", "oye rafa", "hola rafa"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerTable {
    phrases: Vec<String>,
}

impl TriggerTable {
    /// Empty phrases are ignored.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.trim().is_empty())
                .collect(),
        }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// The prompt carried by `utterance`, or `None` when no phrase matches.
    pub fn extract_prompt(&self, utterance: &str) -> Option<String> {
        self.phrases.iter().find_map(|phrase| {
            find_ignore_case(utterance, phrase)
                .map(|range| format!("{}{}", &utterance[..range.start], &utterance[range.end..]))
        })
    }
}

impl Default for TriggerTable {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGERS.iter().copied())
    }
}

/// Byte range of the first case-insensitive occurrence of `needle`.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    'start: for (start, _) in haystack.char_indices() {
        let mut rest = haystack[start..].char_indices();
        let mut end = start;
        for wanted in needle.chars() {
            match rest.next() {
                Some((offset, found)) if same_letter(found, wanted) => {
                    end = start + offset + found.len_utf8();
                }
                _ => continue 'start,
            }
        }
        return Some(start..end);
    }
    None
}

fn same_letter(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}
