//! Minimal XML tree: just enough of the document model the journal needs —
//! named elements with ordered attributes, optional text, ordered children,
//! a sanitiser applied at every text/attribute write, and a serialiser with
//! compact and pretty-printed modes. Not a general-purpose XML library.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// Forbidden code points per the journal's text-sanitisation invariant:
/// C0 controls other than tab/LF/CR, the C1 controls 0x0E-0x1F, and the
/// two non-characters 0xFFFE/0xFFFF.
fn is_forbidden(c: char) -> bool {
    let cp = c as u32;
    matches!(cp, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0xFFFE | 0xFFFF)
}

/// Strip forbidden code points from text or attribute values. Bytes that
/// are not valid UTF-8 must already have been replaced by the caller
/// (e.g. via `String::from_utf8_lossy`) before reaching this function.
pub fn sanitize(input: &str) -> String {
    input.chars().filter(|c| !is_forbidden(*c)).collect()
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// A single XML element: a name, ordered attributes, optional text,
/// ordered children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attrs: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    /// Every attribute write goes through the sanitiser; this is the one
    /// place the invariant is enforced.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = sanitize(&value.into());
        if let Some(existing) = self.attrs.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.attrs.push((key, value));
        }
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every text write goes through the sanitiser; this is the one place
    /// the invariant is enforced.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(sanitize(&text.into()));
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_child(&mut self, child: Element) -> &mut Element {
        self.children.push(child);
        self.children.last_mut().expect("just pushed")
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Element> {
        &mut self.children
    }

    pub fn first_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn first_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> + 'a {
        self.children.iter_mut().filter(move |c| c.name == name)
    }

    /// Depth-first, document-order walk over every descendant (self
    /// included), matching `etree`'s `Element.iter()`.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        Box::new(
            std::iter::once(self).chain(self.children.iter().flat_map(|c| c.iter())),
        )
    }

    fn write(&self, out: &mut String, pretty: bool, depth: usize) {
        let indent = if pretty {
            "  ".repeat(depth)
        } else {
            String::new()
        };
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape_xml(v));
            out.push('"');
        }

        let has_text = self.text.as_ref().is_some_and(|t| !t.is_empty());
        if self.children.is_empty() && !has_text {
            out.push_str("/>");
            if pretty {
                out.push('\n');
            }
            return;
        }

        out.push('>');
        if has_text {
            out.push_str(&escape_xml(self.text.as_deref().unwrap_or("")));
        }
        if !self.children.is_empty() {
            if pretty {
                out.push('\n');
            }
            for child in &self.children {
                child.write(out, pretty, depth + 1);
            }
            if pretty {
                out.push_str(&indent);
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
        if pretty {
            out.push('\n');
        }
    }

    /// Serialise with an XML declaration, in compact or pretty-printed
    /// (2-space indent, newline after each element) mode.
    pub fn to_xml_string(&self, pretty: bool) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
        if pretty {
            out.push('\n');
        }
        self.write(&mut out, pretty, 0);
        if !pretty && out.ends_with('\n') {
            out.pop();
        }
        out
    }
}

#[derive(Debug)]
pub struct XmlParseError(pub String);

impl fmt::Display for XmlParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XML parse error: {}", self.0)
    }
}

impl std::error::Error for XmlParseError {}

fn unescape_xml(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

struct Cursor<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Cursor {
            chars: input.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn expect(&mut self, c: char) -> Result<(), XmlParseError> {
        match self.chars.next() {
            Some(found) if found == c => Ok(()),
            other => Err(XmlParseError(format!("expected '{c}', found {other:?}"))),
        }
    }

    fn take_while<F: Fn(char) -> bool>(&mut self, pred: F) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if pred(c) {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        s
    }

}

/// Parse a document previously produced by `Element::to_xml_string`.
/// Supports the restricted subset this crate actually writes: an optional
/// `<?xml ... ?>` declaration, elements with `key="value"` attributes,
/// self-closing and text-bearing elements, and the five predefined
/// entities.
pub fn parse_document(input: &str) -> Result<Element, XmlParseError> {
    let trimmed = input.trim_start();
    let after_decl = if let Some(rest) = trimmed.strip_prefix("<?xml") {
        match rest.find("?>") {
            Some(idx) => &rest[idx + 2..],
            None => return Err(XmlParseError("unterminated XML declaration".into())),
        }
    } else {
        trimmed
    };

    let mut cursor = Cursor::new(after_decl);
    cursor.skip_ws();
    let root = parse_element(&mut cursor)?;
    Ok(root)
}

fn parse_element(cursor: &mut Cursor) -> Result<Element, XmlParseError> {
    cursor.skip_ws();
    cursor.expect('<')?;
    let name = cursor.take_while(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if name.is_empty() {
        return Err(XmlParseError("expected element name".into()));
    }
    let mut element = Element::new(name.clone());

    loop {
        cursor.skip_ws();
        match cursor.peek() {
            Some('/') => {
                cursor.chars.next();
                cursor.expect('>')?;
                return Ok(element);
            }
            Some('>') => {
                cursor.chars.next();
                break;
            }
            Some(_) => {
                let attr_name = cursor.take_while(|c| c.is_alphanumeric() || c == '_' || c == '-');
                if attr_name.is_empty() {
                    return Err(XmlParseError(format!(
                        "malformed attribute in <{name}>"
                    )));
                }
                cursor.skip_ws();
                cursor.expect('=')?;
                cursor.skip_ws();
                cursor.expect('"')?;
                let raw_value = cursor.take_while(|c| c != '"');
                cursor.expect('"')?;
                element.set_attr(attr_name, unescape_xml(&raw_value));
            }
            None => return Err(XmlParseError(format!("unterminated tag <{name}"))),
        }
    }

    // Content: mix of text and child elements, until the matching close tag.
    let mut text_buf = String::new();
    loop {
        match cursor.peek() {
            None => return Err(XmlParseError(format!("unexpected EOF in <{name}>"))),
            Some('<') => {
                let mut lookahead = cursor.chars.clone();
                lookahead.next();
                if lookahead.peek() == Some(&'/') {
                    cursor.chars.next();
                    cursor.chars.next();
                    let close_name =
                        cursor.take_while(|c| c.is_alphanumeric() || c == '_' || c == '-');
                    cursor.skip_ws();
                    cursor.expect('>')?;
                    if close_name != name {
                        return Err(XmlParseError(format!(
                            "mismatched close tag: expected </{name}>, found </{close_name}>"
                        )));
                    }
                    if !text_buf.is_empty() {
                        element.set_text(unescape_xml(&text_buf));
                    }
                    return Ok(element);
                }
                let child = parse_element(cursor)?;
                element.children.push(child);
            }
            Some(_) => {
                let chunk = cursor.take_while(|c| c != '<');
                text_buf.push_str(&chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_forbidden_codepoints() {
        let input = "hello\u{0001}world\u{FFFE}";
        assert_eq!(sanitize(input), "helloworld");
    }

    #[test]
    fn sanitize_keeps_tab_newline_cr() {
        let input = "a\tb\nc\rd";
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn round_trip_simple_tree() {
        let mut root = Element::new("BEAKER_TEST");
        root.push_child(Element::new("package").with_text("foo"));
        let mut log = Element::new("log");
        log.push_child(
            Element::new("phase")
                .with_attr("name", "check")
                .with_attr("result", "unfinished"),
        );
        root.push_child(log);

        let serialized = root.to_xml_string(false);
        let parsed = parse_document(&serialized).expect("parse");
        let reserialized = parsed.to_xml_string(false);
        assert_eq!(serialized, reserialized);
    }

    #[test]
    fn pretty_print_has_newlines_and_indent() {
        let mut root = Element::new("BEAKER_TEST");
        root.push_child(Element::new("package").with_text("foo"));
        let pretty = root.to_xml_string(true);
        assert!(pretty.contains("\n  <package>"));
    }

    #[test]
    fn attribute_values_escape_and_unescape() {
        let el = Element::new("test").with_attr("message", "a < b & c");
        let xml = el.to_xml_string(false);
        assert!(xml.contains("a &lt; b &amp; c"));
        let parsed = parse_document(&xml).unwrap();
        assert_eq!(parsed.get_attr("message"), Some("a < b & c"));
    }
}
