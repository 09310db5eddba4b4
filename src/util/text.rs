use std::borrow::Cow;

/// Removes markup tags and collapses whitespace.
///
/// Every `<...>` run is replaced by a single space, then all whitespace runs
/// collapse to one space and the result is trimmed. A `<` with no closing `>`
/// is kept as literal text. Returns `None` when nothing but whitespace is left.
///
/// Common entities are decoded after the tags are gone, so an encoded `&lt;`
/// never opens a tag. This is not sanitization; the output is only meant for
/// plain-text summaries.
///
/// ```
/// use suprss::util::strip_html;
///
/// assert_eq!(strip_html("<p>Hello <b>world</b></p>").as_deref(), Some("Hello world"));
/// assert_eq!(strip_html("<p>Q&amp;A</p>").as_deref(), Some("Q&A"));
/// assert_eq!(strip_html("<br/>  <hr>"), None);
/// ```
pub fn strip_html(html: &str) -> Option<String> {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        match rest[open..].find('>') {
            Some(close) => {
                out.push_str(&rest[..open]);
                out.push(' ');
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);

    let decoded = decode_entities(&out);
    let collapsed = collapse_whitespace(&decoded);
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

/// Longest entity body considered, e.g. `#x10FFFF`.
const MAX_ENTITY_LEN: usize = 8;

/// Decodes `&amp;`, `&lt;`, `&gt;`, `&quot;`, `&apos;`, `&nbsp;` and numeric
/// references. Unknown or malformed entities, and a bare `&`, stay as written.
///
/// ```
/// use suprss::util::decode_entities;
///
/// assert_eq!(decode_entities("&lt;b&gt; &#65;&#x42; &copy;"), "<b> AB &copy;");
/// ```
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest[1..]
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_ENTITY_LEN)
            .and_then(|end| decode_entity(&rest[1..=end]).map(|c| (c, end + 2)));
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Collapses every whitespace run into a single ASCII space and trims both ends.
///
/// Returns `Cow::Borrowed` when the input is already collapsed.
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim();
    let already_clean = !trimmed
        .as_bytes()
        .windows(2)
        .any(|w| w[0].is_ascii_whitespace() && w[1].is_ascii_whitespace())
        && !trimmed
            .chars()
            .any(|c| c.is_whitespace() && c != ' ');

    if already_clean {
        return Cow::Borrowed(trimmed);
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut pending_space = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Strips ASCII control characters (except tab, newline, carriage return).
///
/// Feed titles occasionally carry stray control bytes from broken encoders;
/// they are dropped before the text is stored.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\u{7f}' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_control(c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_removes_tags() {
        assert_eq!(
            strip_html("<p>Hello <em>there</em></p>").as_deref(),
            Some("Hello there")
        );
    }

    #[test]
    fn test_strip_html_collapses_whitespace() {
        assert_eq!(
            strip_html("  one\n\n  two\t three  ").as_deref(),
            Some("one two three")
        );
    }

    #[test]
    fn test_strip_html_tags_become_separators() {
        // Adjacent block elements must not glue words together
        assert_eq!(strip_html("<li>a</li><li>b</li>").as_deref(), Some("a b"));
    }

    #[test]
    fn test_strip_html_empty_after_strip_is_none() {
        assert_eq!(strip_html(""), None);
        assert_eq!(strip_html("   "), None);
        assert_eq!(strip_html("<img src=\"x.png\"/>"), None);
    }

    #[test]
    fn test_strip_html_unclosed_tag_kept_literally() {
        assert_eq!(strip_html("a < b").as_deref(), Some("a < b"));
        assert_eq!(strip_html("x <b>y</b> <z").as_deref(), Some("x y <z"));
    }

    #[test]
    fn test_strip_html_multiline_tag() {
        assert_eq!(
            strip_html("<a\n href=\"/x\">link</a>").as_deref(),
            Some("link")
        );
    }

    #[test]
    fn test_strip_html_unicode_preserved() {
        assert_eq!(
            strip_html("<p>Café   \u{00a0}naïve</p>").as_deref(),
            Some("Café naïve")
        );
    }

    #[test]
    fn test_strip_html_decodes_entities() {
        assert_eq!(strip_html("Tom &amp; Jerry").as_deref(), Some("Tom & Jerry"));
        assert_eq!(
            strip_html("&quot;quoted&quot; &apos;single&apos;").as_deref(),
            Some("\"quoted\" 'single'")
        );
        assert_eq!(strip_html("A&nbsp;&nbsp;B").as_deref(), Some("A B"));
        assert_eq!(strip_html("&#65;&#x42;&#X3042;").as_deref(), Some("AB\u{3042}"));
    }

    #[test]
    fn test_strip_html_encoded_markup_is_text() {
        // Double-encoded markup decodes once and is not stripped again
        assert_eq!(
            strip_html("<p>&lt;b&gt;bold&lt;/b&gt;</p>").as_deref(),
            Some("<b>bold</b>")
        );
    }

    #[test]
    fn test_strip_html_only_nbsp_is_none() {
        assert_eq!(strip_html("<p>&nbsp;</p>"), None);
    }

    #[test]
    fn test_unknown_and_malformed_entities_kept() {
        assert_eq!(decode_entities("&copy; 2024"), "&copy; 2024");
        assert_eq!(decode_entities("fish & chips"), "fish & chips");
        assert_eq!(decode_entities("a&;b"), "a&;b");
        assert_eq!(decode_entities("&#xZZ; &#;"), "&#xZZ; &#;");
        assert_eq!(decode_entities("&#xD800;"), "&#xD800;");
        assert_eq!(decode_entities("&amp"), "&amp");
        assert_eq!(decode_entities("&&amp;"), "&&");
        assert_eq!(decode_entities("AT&T; x"), "AT&T; x");
    }

    #[test]
    fn test_decode_without_ampersand_is_borrowed() {
        assert!(matches!(decode_entities("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_collapse_clean_text_is_borrowed() {
        assert!(matches!(collapse_whitespace("already clean"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_collapse_newline_is_owned() {
        assert_eq!(collapse_whitespace("a\nb"), "a b");
    }

    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("Hi\x00 there\x07"), "Hi there");
        assert_eq!(strip_control_chars("tab\tok\n"), "tab\tok\n");
        assert!(matches!(strip_control_chars("clean"), Cow::Borrowed(_)));
    }
}
