use std::borrow::Cow;

/// Decode one level of HTML entities (`&amp;` → `&`, `&eacute;` → `é`, `&#39;` → `'`).
///
/// Applied to feed text after XML parsing. Returns `Cow::Borrowed` when the
/// input has no `&`.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    html_escape::decode_html_entities(s)
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences from text.
///
/// Feed titles and descriptions are printed straight to the terminal by
/// `browse`, `feeds` and `following`, so anything that could move the cursor
/// or recolor output is removed. Tab, newline and carriage return are kept.
///
/// Returns `Cow::Borrowed` when the input contains no control characters.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\u{7f}' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            if !is_control(c) {
                out.push(c);
            }
            continue;
        }

        match chars.peek() {
            // CSI: ESC [ params... final byte in 0x40..=0x7E
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: ESC ] ... terminated by BEL or ST (ESC \)
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\u{07}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            // Bare ESC
            _ => {}
        }
    }

    Cow::Owned(out)
}
