use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

use hermes_core::types::ChatMessage;

/// Full-width code points fold onto their ASCII half-width equivalents
/// (spec §4.5.1 step 5, NFKC-like range fold).
const FULLWIDTH_START: u32 = 0xFF01;
const FULLWIDTH_END: u32 = 0xFF5E;
const FULLWIDTH_TO_HALFWIDTH_OFFSET: u32 = 0xFEE0;
const IDEOGRAPHIC_SPACE: char = '\u{3000}';

pub struct NormalizedMessage {
    pub processed_text: String,
    pub tokens: Vec<String>,
    pub unicode_emojis: Vec<String>,
}

/// Chinese word segmentation with a `special_words` user dictionary and a
/// `meaningless_words` stop-list (spec §4.5.1 step 6).
pub struct Tokenizer {
    jieba: jieba_rs::Jieba,
}

impl Tokenizer {
    pub fn new(special_words: &HashSet<String>) -> Self {
        let mut jieba = jieba_rs::Jieba::new();
        for word in special_words {
            jieba.add_word(word, None, None);
        }
        Self { jieba }
    }

    pub fn tokenize(&self, text: &str, meaningless_words: &HashSet<String>) -> Vec<String> {
        self.jieba
            .cut(text, false)
            .into_iter()
            .map(str::to_string)
            .filter(|token| !token.trim().is_empty())
            .filter(|token| !meaningless_words.contains(token))
            .collect()
    }
}

/// Run the full normalization pipeline over one chat message (spec
/// §4.5.1, steps 1-6, in order).
pub fn normalize(
    message: &ChatMessage,
    replace_map: &[(String, String)],
    meaningless_words: &HashSet<String>,
    tokenizer: &Tokenizer,
) -> NormalizedMessage {
    let raw = message.message.as_str();

    // Step 1: unicode emojis, preserving repetition and order.
    let unicode_emojis = extract_unicode_emojis(raw);

    // Step 2: YouTube emote names as stored alongside the message.
    let emote_names: Vec<String> = message.emotes.iter().map(|e| e.name.clone()).collect();

    // Step 3: longest-match-first dictionary substitution.
    let substituted = apply_replace_dictionary(raw, replace_map);

    // Step 4: strip emoji and emote tokens out of the substituted text.
    let stripped = strip_tokens(&substituted, &unicode_emojis, &emote_names);

    // Step 5: width-fold, then collapse/trim whitespace.
    let processed_text = collapse_whitespace(&fold_width(&stripped));

    // Step 6: tokenize, dropping meaningless tokens.
    let tokens = tokenizer.tokenize(&processed_text, meaningless_words);

    NormalizedMessage {
        processed_text,
        tokens,
        unicode_emojis,
    }
}

fn extract_unicode_emojis(text: &str) -> Vec<String> {
    text.graphemes(true)
        .filter(|g| emojis::get(g).is_some())
        .map(|g| g.to_string())
        .collect()
}

/// Greedy longest-match substitution. At each position, the longest key in
/// `replace_map` that matches the remaining text wins; equal-length matches
/// keep whichever key appears earlier in `replace_map` (insertion order).
fn apply_replace_dictionary(text: &str, replace_map: &[(String, String)]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let remainder: String = chars[i..].iter().collect();
        let mut best: Option<(usize, &str)> = None; // (source char count, target)

        for (source, target) in replace_map {
            if remainder.starts_with(source.as_str()) {
                let len = source.chars().count();
                let is_longer = match best {
                    Some((best_len, _)) => len > best_len,
                    None => true,
                };
                if is_longer {
                    best = Some((len, target.as_str()));
                }
            }
        }

        match best {
            Some((matched_len, target)) => {
                out.push_str(target);
                i += matched_len;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }

    out
}

fn strip_tokens(text: &str, unicode_emojis: &[String], emote_names: &[String]) -> String {
    let mut result = text.to_string();
    for token in unicode_emojis.iter().chain(emote_names.iter()) {
        if !token.is_empty() {
            result = result.replace(token.as_str(), "");
        }
    }
    result
}

fn fold_width(text: &str) -> String {
    text.chars()
        .map(|c| {
            let cp = c as u32;
            if (FULLWIDTH_START..=FULLWIDTH_END).contains(&cp) {
                char::from_u32(cp - FULLWIDTH_TO_HALFWIDTH_OFFSET).unwrap_or(c)
            } else if c == IDEOGRAPHIC_SPACE {
                ' '
            } else {
                c
            }
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_fullwidth_and_collapses_whitespace() {
        let folded = fold_width("Ａｂｃ\u{3000}\u{3000}ｄｅｆ");
        let collapsed = collapse_whitespace(&folded);
        assert_eq!(collapsed, "Abc def");
    }

    #[test]
    fn longest_match_wins_over_shorter_prefix() {
        let map = vec![
            ("abc".to_string(), "X".to_string()),
            ("ab".to_string(), "Y".to_string()),
        ];
        assert_eq!(apply_replace_dictionary("abcd", &map), "Xd");
    }

    #[test]
    fn tie_prefers_insertion_order() {
        let map = vec![
            ("ab".to_string(), "FIRST".to_string()),
            ("ab".to_string(), "SECOND".to_string()),
        ];
        assert_eq!(apply_replace_dictionary("ab", &map), "FIRST");
    }

    #[test]
    fn unmatched_text_passes_through() {
        let map = vec![("xyz".to_string(), "Q".to_string())];
        assert_eq!(apply_replace_dictionary("hello", &map), "hello");
    }
}
