//! Sentence splitting and speech sanitizing for assistant text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Characters the synthesizer would read out literally.
static UNSPEAKABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*/{}\[\]<>&#@_\\|+=%]").unwrap());

/// Strip markup-ish characters before synthesis.
pub fn sanitize(text: &str) -> String {
    UNSPEAKABLE.replace_all(text, "").into_owned()
}

/// Split at `.`, `!` or `?` followed by whitespace. The terminator stays
/// on its sentence; empty pieces are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let Some(&(j, next)) = chars.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }
        push_piece(&mut out, &text[start..i + c.len_utf8()]);
        // Swallow the whole whitespace run.
        let mut end = j;
        while let Some(&(k, w)) = chars.peek() {
            if !w.is_whitespace() {
                break;
            }
            end = k + w.len_utf8();
            chars.next();
        }
        start = end;
    }
    push_piece(&mut out, &text[start..]);
    out
}

fn push_piece(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_owned());
    }
}

/// The speakable snippets of an assistant reply, in playback order.
pub fn snippets(text: &str) -> Vec<String> {
    split_sentences(&sanitize(text))
}

pub fn sentence_count(text: &str) -> usize {
    split_sentences(text).len()
}

/// Whether the text ends like a finished sentence (closing quotes and
/// brackets allowed after the terminator).
pub fn ends_with_terminal(text: &str) -> bool {
    let trimmed = text.trim_end_matches(|c: char| {
        c.is_whitespace() || matches!(c, '"' | '\'' | ')' | '”' | '’' | '*')
    });
    trimmed.ends_with(['.', '!', '?', '…'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminator_followed_by_space() {
        let s = split_sentences("I hear you. That sounds hard!  Want to talk?\nI'm here.");
        assert_eq!(
            s,
            vec!["I hear you.", "That sounds hard!", "Want to talk?", "I'm here."]
        );
    }

    #[test]
    fn keeps_decimals_and_trailing_fragment() {
        let s = split_sentences("Try 4.5 minutes. Then rest");
        assert_eq!(s, vec!["Try 4.5 minutes.", "Then rest"]);
    }

    #[test]
    fn empty_text_has_no_sentences() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   ").is_empty());
        assert_eq!(sentence_count("One. Two."), 2);
    }

    #[test]
    fn sanitize_drops_markup() {
        assert_eq!(
            sanitize("**Breathe** in_for #4 <counts> & [hold] 100% {ok} a/b|c+d=e@f\\g"),
            "Breathe infor 4 counts  hold 100 ok abcdefg"
        );
    }

    #[test]
    fn snippets_sanitize_then_split() {
        let s = snippets("*Inhale.* Hold. **Exhale.**");
        assert_eq!(s, vec!["Inhale.", "Hold.", "Exhale."]);
    }

    #[test]
    fn terminal_punctuation_detection() {
        assert!(ends_with_terminal("You're not alone."));
        assert!(ends_with_terminal("Would you like that?\" "));
        assert!(!ends_with_terminal("It makes sense that you"));
        assert!(!ends_with_terminal(""));
    }
}
