//! Diagnostic redaction
//!
//! Strips secret values and absolute file paths from text before it is
//! logged or displayed. Applied to every diagnostic string that leaves
//! the credential and probe paths, since service error bodies can echo
//! request URLs complete with signatures.

/// Markers whose trailing value is a secret
const SECRET_MARKERS: &[&str] = &[
    "sig=",
    "sv=",
    "accountkey=",
    "sharedaccesssignature=",
    "client_secret=",
    "password=",
];

/// Word boundaries within diagnostic text
const BOUNDARY: &[char] = &['"', '\'', '&', ';', ',', '(', ')', '<', '>'];

/// Minimum length at which a bare base64/JWT-looking word is treated as
/// a credential
const TOKEN_MIN_LEN: usize = 40;

/// Redacts secret values and absolute file paths from diagnostic text.
pub fn redact(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();

    for ch in text.chars() {
        if ch.is_whitespace() || BOUNDARY.contains(&ch) {
            flush_word(&mut out, &word);
            word.clear();
            out.push(ch);
        } else {
            word.push(ch);
        }
    }
    flush_word(&mut out, &word);

    out
}

fn flush_word(out: &mut String, word: &str) {
    if word.is_empty() {
        return;
    }

    // ASCII lowering keeps byte offsets aligned with `word`.
    let lower = word.to_ascii_lowercase();

    // key=value secrets: keep the marker, drop the value.
    for marker in SECRET_MARKERS {
        if let Some(pos) = lower.find(marker) {
            out.push_str(&word[..pos + marker.len()]);
            out.push_str("<redacted>");
            return;
        }
    }

    // Bare tokens: long base64/JWT-looking words are credentials.
    if word.len() >= TOKEN_MIN_LEN && looks_like_token(word) {
        out.push_str("<redacted>");
        return;
    }

    // Absolute file paths. URL paths are safe: the path part of a URL is
    // never a standalone word starting with '/'.
    if word.starts_with('/') && word[1..].contains('/') {
        out.push_str("<path>");
        return;
    }

    out.push_str(word);
}

fn looks_like_token(word: &str) -> bool {
    word.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_' | '.'))
        && word.chars().filter(|c| c.is_ascii_alphanumeric()).count() * 4 >= word.len() * 3
}
