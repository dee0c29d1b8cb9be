//! HTML-to-text extraction and character-capped truncation.
//!
//! A small state machine rather than a DOM parse: drops tags wholesale,
//! skips `<script>`/`<style>` content, inserts newlines at block element
//! boundaries, decodes the common entities, and collapses blank runs.

/// Tags whose open or close marks a block boundary worth a newline.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "section", "article", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote", "pre",
];

enum State {
    /// Emitting character data.
    Text,
    /// Inside `<...>`; `from` holds the element being skipped, if any.
    Tag { from: Option<&'static str> },
    /// Inside the body of a script or style element.
    Skipped(&'static str),
}

/// Extract readable text from an HTML document.
pub fn extract_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 4);
    let mut state = State::Text;
    let mut tag = String::new();

    for ch in html.chars() {
        state = match state {
            State::Text if ch == '<' => {
                tag.clear();
                State::Tag { from: None }
            }
            State::Text => {
                out.push(ch);
                State::Text
            }
            State::Skipped(elem) if ch == '<' => {
                tag.clear();
                State::Tag { from: Some(elem) }
            }
            State::Skipped(elem) => State::Skipped(elem),
            State::Tag { from } if ch == '>' => close_tag(&tag, from, &mut out),
            State::Tag { from } => {
                tag.push(ch);
                State::Tag { from }
            }
        };
    }

    collapse(&decode_entities(&out))
}

/// Decide the state after a complete tag, emitting block newlines.
fn close_tag(tag: &str, from: Option<&'static str>, out: &mut String) -> State {
    let name = tag_name(tag);

    // Inside script/style only the matching close tag ends the skip.
    if let Some(elem) = from {
        if name == format!("/{elem}") {
            return State::Text;
        }
        return State::Skipped(elem);
    }

    match name.as_str() {
        "script" => State::Skipped("script"),
        "style" => State::Skipped("style"),
        _ => {
            if BLOCK_TAGS.contains(&name.trim_matches('/')) {
                out.push('\n');
            }
            State::Text
        }
    }
}

/// The lowercase element name of a tag body (`div class="x"` → `div`,
/// `/p` → `/p`).
fn tag_name(tag: &str) -> String {
    tag.trim()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '/' || *c == '!')
        .collect::<String>()
        .to_lowercase()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

/// Trim each line and collapse runs of blank lines.
fn collapse(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().map(str::trim).collect();
    lines.dedup_by(|a, b| a.is_empty() && b.is_empty());
    lines
        .into_iter()
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate to at most `max_chars` characters (not bytes). When truncation
/// occurs, prefer cutting at the last sentence boundary inside the window
/// so the text does not end mid-sentence.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let end = match text.char_indices().nth(max_chars) {
        Some((i, _)) => i,
        None => return text.to_string(),
    };

    let window = &text[..end];
    match window.rfind('.') {
        Some(i) if i > 0 => window[..=i].to_string(),
        _ => window.to_string(),
    }
}
