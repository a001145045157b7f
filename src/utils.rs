use std::borrow::Cow;

/// Named entities that show up in PMC article text despite not being XML built-ins.
const NAMED_ENTITIES: [(&str, &str); 24] = [
    ("nbsp", " "),
    ("ndash", "–"),
    ("mdash", "—"),
    ("hyphen", "-"),
    ("minus", "−"),
    ("plusmn", "±"),
    ("times", "×"),
    ("deg", "°"),
    ("micro", "µ"),
    ("alpha", "α"),
    ("beta", "β"),
    ("gamma", "γ"),
    ("delta", "δ"),
    ("kappa", "κ"),
    ("lambda", "λ"),
    ("mu", "μ"),
    ("le", "≤"),
    ("ge", "≥"),
    ("lsquo", "‘"),
    ("rsquo", "’"),
    ("ldquo", "“"),
    ("rdquo", "”"),
    ("eacute", "é"),
    ("uuml", "ü"),
];

/// Resolves XML built-ins first, then the common HTML names above.
///
/// Numeric character references never reach this function.
pub(crate) fn resolve_named_entity(name: &str) -> Option<&'static str> {
    quick_xml::escape::resolve_predefined_entity(name).or_else(|| {
        NAMED_ENTITIES
            .iter()
            .find(|(entity, _)| *entity == name)
            .map(|(_, value)| *value)
    })
}

/// Decodes entity references in raw markup text.
///
/// Unknown named entities are left as written.
pub(crate) fn unescape_text(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    match quick_xml::escape::unescape_with(raw, resolve_named_entity) {
        Ok(text) => text,
        Err(_) => Cow::Owned(unescape_lossy(raw)),
    }
}

/// Entity-by-entity fallback used when a text node contains an unresolvable entity.
fn unescape_lossy(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find(';') {
            Some(end) if end > 1 && end <= 12 => {
                let entity = &tail[..=end];
                match quick_xml::escape::unescape_with(entity, resolve_named_entity) {
                    Ok(decoded) => out.push_str(&decoded),
                    Err(_) => out.push_str(entity),
                }
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replaces every run of non-printable characters with `replacement`.
///
/// Printable means printable ASCII plus ASCII whitespace.
pub(crate) fn replace_unprintable(text: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;

    for c in text.chars() {
        if is_printable(c) {
            in_run = false;
            out.push(c);
        } else if !in_run {
            in_run = true;
            out.push_str(replacement);
        }
    }
    out
}

fn is_printable(c: char) -> bool {
    c.is_ascii_graphic() || c.is_ascii_whitespace()
}
