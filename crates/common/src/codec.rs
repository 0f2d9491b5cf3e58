//! Markup wire format for [`TreeNode`]s.
//!
//! The encoder writes one element per node: attributes become `key="value"`
//! pairs, text values are written in order between the tags and nested nodes
//! recursively, each element followed by a newline. A node without values is
//! written as a self-closing tag.
//!
//! The decoder is a small pull tokenizer over the subset of markup the
//! encoder produces (plus declarations, comments, processing instructions and
//! CDATA sections, which peers are free to send). Its events drive a
//! [`TreeBuilder`].

use std::io::{self, Read, Write};

use tracing::debug;

use crate::tree::{Attributes, TreeBuilder, TreeError, TreeNode, Value};

/// Version declaration written at the top of every encoded document.
pub const HEADER: &str = r#"<?xml version="1.0"?>"#;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("cannot encode a node without a name")]
    UnnamedNode,
    #[error("character {0:?} cannot be represented in markup")]
    InvalidChar(char),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed markup at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("closing tag </{found}> does not match open element <{expected}>")]
    Mismatched { expected: String, found: String },
    #[error("unknown entity reference &{0};")]
    Entity(String),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Encodes a single element (no document header).
pub fn encode(node: &TreeNode) -> Result<String, EncodeError> {
    let mut out = String::new();
    write_element(&mut out, node)?;
    Ok(out)
}

/// Encodes a full document: the version header line followed by the element.
pub fn encode_document(node: &TreeNode) -> Result<String, EncodeError> {
    let mut out = String::with_capacity(HEADER.len() + 1);
    out.push_str(HEADER);
    out.push('\n');
    write_element(&mut out, node)?;
    Ok(out)
}

/// Encodes a full document into `writer`.
pub fn write_document<W: Write>(mut writer: W, node: &TreeNode) -> Result<(), EncodeError> {
    let document = encode_document(node)?;
    writer.write_all(document.as_bytes())?;
    writer.flush()?;
    Ok(())
}

fn write_element(out: &mut String, node: &TreeNode) -> Result<(), EncodeError> {
    if node.name().is_empty() {
        return Err(EncodeError::UnnamedNode);
    }

    out.push('<');
    out.push_str(node.name());
    for (key, value) in node.attributes() {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        escape_into(out, value, true)?;
        out.push('"');
    }

    if node.values().is_empty() {
        out.push_str("/>\n");
        return Ok(());
    }

    out.push('>');
    for value in node.values() {
        match value {
            Value::Text(text) => escape_into(out, text, false)?,
            Value::Node(child) => write_element(out, child)?,
        }
    }
    out.push_str("</");
    out.push_str(node.name());
    out.push_str(">\n");
    Ok(())
}

fn escape_into(out: &mut String, raw: &str, in_attribute: bool) -> Result<(), EncodeError> {
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            _ if !is_markup_char(ch) => return Err(EncodeError::InvalidChar(ch)),
            _ => out.push(ch),
        }
    }
    Ok(())
}

/// Characters allowed in character data: no control characters other than
/// tab, line feed and carriage return.
fn is_markup_char(ch: char) -> bool {
    match ch {
        '\t' | '\n' | '\r' => true,
        '\u{FFFE}' | '\u{FFFF}' => false,
        _ => ch >= ' ',
    }
}

/// Decodes a document held in memory.
pub fn decode(input: &str) -> Result<TreeNode, DecodeError> {
    let mut builder = TreeBuilder::new();

    for event in Events::new(input) {
        match event? {
            Event::Start {
                name,
                attributes,
                empty,
            } => {
                builder.open(name, attributes)?;
                if empty {
                    builder.close()?;
                }
            }
            Event::End(name) => {
                let open = builder.current().unwrap_or_default().to_string();
                if open != name {
                    return Err(DecodeError::Mismatched {
                        expected: open,
                        found: name,
                    });
                }
                builder.close()?;
            }
            Event::Text(text) => builder.add_text(text)?,
        }
    }

    let tree = builder.finish()?;
    debug!(root = tree.name(), "decoded wire document");
    Ok(tree)
}

/// Reads `reader` to the end and decodes it.
pub fn decode_from<R: Read>(mut reader: R) -> Result<TreeNode, DecodeError> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    decode(&input)
}

/// Parse events produced by [`Events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start {
        name: String,
        attributes: Attributes,
        empty: bool,
    },
    End(String),
    /// Character data, trimmed; whitespace-only runs never produce an event.
    Text(String),
}

/// Pull tokenizer over a markup document.
pub struct Events<'a> {
    input: &'a str,
    pos: usize,
    failed: bool,
}

impl<'a> Events<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            failed: false,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn syntax(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    /// Advances past `terminator`, returning the text before it.
    fn take_until(&mut self, terminator: &str, what: &str) -> Result<&'a str, DecodeError> {
        let rest = self.rest();
        match rest.find(terminator) {
            Some(end) => {
                self.pos += end + terminator.len();
                Ok(&rest[..end])
            }
            None => Err(self.syntax(format!("unterminated {}", what))),
        }
    }

    /// Rejects characters that may not appear in a document; `start` is the
    /// offset of `raw` in the input.
    fn check_chars(&self, start: usize, raw: &str) -> Result<(), DecodeError> {
        match raw.char_indices().find(|(_, ch)| !is_markup_char(*ch)) {
            Some((i, ch)) => Err(DecodeError::Syntax {
                offset: start + i,
                message: format!("invalid character {:?}", ch),
            }),
            None => Ok(()),
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn name(&mut self) -> Result<String, DecodeError> {
        let rest = self.rest();
        let mut end = 0;
        for (i, ch) in rest.char_indices() {
            let valid = if i == 0 {
                ch.is_alphabetic() || ch == '_' || ch == ':'
            } else {
                ch.is_alphanumeric() || matches!(ch, '_' | ':' | '-' | '.')
            };
            if !valid {
                break;
            }
            end = i + ch.len_utf8();
        }
        if end == 0 {
            return Err(self.syntax("expected a name"));
        }
        self.pos += end;
        Ok(rest[..end].to_string())
    }

    fn start_tag(&mut self) -> Result<Event, DecodeError> {
        self.pos += 1; // '<'
        let name = self.name()?;
        let mut attributes = Attributes::new();

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(Event::Start {
                    name,
                    attributes,
                    empty: true,
                });
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok(Event::Start {
                    name,
                    attributes,
                    empty: false,
                });
            }
            if rest.is_empty() {
                return Err(self.syntax(format!("unterminated tag <{}>", name)));
            }

            let key = self.name()?;
            self.skip_whitespace();
            if !self.rest().starts_with('=') {
                return Err(self.syntax(format!("attribute '{}' has no value", key)));
            }
            self.pos += 1;
            self.skip_whitespace();

            let quote = match self.rest().chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => return Err(self.syntax(format!("attribute '{}' value is not quoted", key))),
            };
            self.pos += 1;
            let start = self.pos;
            let raw = self.take_until(&quote.to_string(), "attribute value")?;
            if raw.contains('<') {
                return Err(self.syntax(format!("'<' in value of attribute '{}'", key)));
            }
            self.check_chars(start, raw)?;
            let value = unescape(raw)?;
            if attributes.insert(key.clone(), value).is_some() {
                return Err(self.syntax(format!("duplicate attribute '{}'", key)));
            }

            let rest = self.rest();
            let separated = rest.is_empty()
                || rest.starts_with(char::is_whitespace)
                || rest.starts_with('>')
                || rest.starts_with("/>");
            if !separated {
                return Err(self.syntax(format!("missing whitespace after attribute '{}'", key)));
            }
        }
    }

    fn end_tag(&mut self) -> Result<Event, DecodeError> {
        self.pos += 2; // '</'
        let name = self.name()?;
        self.skip_whitespace();
        if !self.rest().starts_with('>') {
            return Err(self.syntax(format!("unterminated closing tag </{}>", name)));
        }
        self.pos += 1;
        Ok(Event::End(name))
    }

    fn next_event(&mut self) -> Result<Option<Event>, DecodeError> {
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Ok(None);
            }

            if rest.starts_with("<?") {
                self.take_until("?>", "processing instruction")?;
            } else if rest.starts_with("<!--") {
                self.pos += 4;
                self.take_until("-->", "comment")?;
            } else if rest.starts_with("<![CDATA[") {
                self.pos += 9;
                let start = self.pos;
                let data = self.take_until("]]>", "CDATA section")?;
                self.check_chars(start, data)?;
                if !data.is_empty() {
                    return Ok(Some(Event::Text(data.to_string())));
                }
            } else if rest.starts_with("<!") {
                self.take_until(">", "declaration")?;
            } else if rest.starts_with("</") {
                return self.end_tag().map(Some);
            } else if rest.starts_with('<') {
                return self.start_tag().map(Some);
            } else {
                let end = rest.find('<').unwrap_or(rest.len());
                let raw = &rest[..end];
                self.check_chars(self.pos, raw)?;
                self.pos += end;
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return Ok(Some(Event::Text(unescape(trimmed)?)));
                }
            }
        }
    }
}

impl Iterator for Events<'_> {
    type Item = Result<Event, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_event() {
            Ok(event) => event.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn unescape(raw: &str) -> Result<String, DecodeError> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| DecodeError::Entity(after.chars().take(8).collect()))?;
        let entity = &after[..semi];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let ch = char_reference(entity)
                    .ok_or_else(|| DecodeError::Entity(entity.to_string()))?;
                out.push(ch);
            }
        }
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn char_reference(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code).filter(|ch| is_markup_char(*ch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_registration_scenario() {
        let node = TreeNode::new("registration").attr("id", "w1").text("ok");
        assert_eq!(encode(&node).unwrap(), "<registration id=\"w1\">ok</registration>\n");

        let decoded = decode("<registration id=\"w1\">ok</registration>").unwrap();
        assert_eq!(decoded.name(), "registration");
        assert_eq!(decoded.attribute("id"), Some("w1"));
        assert_eq!(decoded.values(), &[Value::Text("ok".into())]);
    }

    #[test]
    fn test_encode_empty_node_self_closes() {
        let node = TreeNode::new("heartbeat").attr("componentIndex", "7");
        assert_eq!(encode(&node).unwrap(), "<heartbeat componentIndex=\"7\"/>\n");
        assert_eq!(encode(&TreeNode::new("ping")).unwrap(), "<ping/>\n");
    }

    #[test]
    fn test_encode_nested_and_document_header() {
        let node = TreeNode::new("a").text("x").child(TreeNode::with_text("b", "y"));
        assert_eq!(encode(&node).unwrap(), "<a>x<b>y</b>\n</a>\n");

        let document = encode_document(&node).unwrap();
        assert!(document.starts_with("<?xml version=\"1.0\"?>\n<a>"));
    }

    #[test]
    fn test_encode_rejects_unnamed_node() {
        let unnamed = TreeNode::default();
        assert!(matches!(encode(&unnamed), Err(EncodeError::UnnamedNode)));

        let nested = TreeNode::new("outer").child(TreeNode::default());
        assert!(matches!(encode(&nested), Err(EncodeError::UnnamedNode)));
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let tree = TreeNode::new("registration")
            .attr("leaseSlots", "2")
            .attr("version", "1")
            .child(TreeNode::with_text("id", "w1"))
            .text("interleaved")
            .child(
                TreeNode::new("attributes")
                    .child(TreeNode::with_text("attribute", "temperature"))
                    .child(TreeNode::new("empty")),
            )
            .child(TreeNode::with_text("port", "2000"));

        let decoded = decode(&encode_document(&tree).unwrap()).unwrap();
        assert_eq!(decoded, tree);
    }

    #[test]
    fn test_round_trip_escapes_reserved_characters() {
        let tree = TreeNode::new("note")
            .attr("title", "a \"quoted\" <title> & more")
            .text("1 < 2 && 3 > 2");
        let encoded = encode(&tree).unwrap();
        assert!(!encoded.contains("&&"));
        assert_eq!(decode(&encoded).unwrap(), tree);
    }

    #[test]
    fn test_decode_trims_text_and_drops_whitespace_runs() {
        let tree = decode("<a>\n  <b>  spaced value \n</b>\n   \n</a>").unwrap();
        assert_eq!(tree.count_children(), 1);
        assert_eq!(tree.values().len(), 1);
        assert_eq!(tree.text_of("b"), Some("spaced value"));
    }

    #[test]
    fn test_decode_skips_prolog_comments_and_reads_cdata() {
        let input = "<?xml version=\"1.0\"?>\n<!DOCTYPE msg>\n<!-- hi -->\n\
                     <msg a = 'single'><![CDATA[<raw> & text]]><!-- inner --></msg>";
        let tree = decode(input).unwrap();
        assert_eq!(tree.attribute("a"), Some("single"));
        assert_eq!(tree.values(), &[Value::Text("<raw> & text".into())]);
    }

    #[test]
    fn test_decode_resolves_character_references() {
        let tree = decode("<t>&#65;&#x42;&apos;</t>").unwrap();
        assert_eq!(tree.text_of("t"), Some("AB'"));
        assert!(matches!(decode("<t>&bogus;</t>"), Err(DecodeError::Entity(e)) if e == "bogus"));
        assert!(matches!(decode("<t>a & b</t>"), Err(DecodeError::Entity(_))));
    }

    #[test]
    fn test_decode_rejects_unbalanced_tags() {
        assert!(matches!(
            decode("<a><b></a>"),
            Err(DecodeError::Mismatched { expected, found }) if expected == "b" && found == "a"
        ));
        assert!(matches!(decode("<a><b/>"), Err(DecodeError::Tree(TreeError::Unclosed(1)))));
        assert!(matches!(decode("</a>"), Err(DecodeError::Mismatched { .. })));
        assert!(matches!(decode("<a/><b/>"), Err(DecodeError::Tree(TreeError::RootClosed(_)))));
        assert!(matches!(decode("stray<a/>"), Err(DecodeError::Tree(TreeError::NothingOpen))));
        assert!(matches!(decode("   "), Err(DecodeError::Tree(TreeError::Empty))));
    }

    #[test]
    fn test_decode_rejects_malformed_tags() {
        assert!(matches!(decode("<a"), Err(DecodeError::Syntax { .. })));
        assert!(matches!(decode("<a b></a>"), Err(DecodeError::Syntax { .. })));
        assert!(matches!(decode("<a b=c></a>"), Err(DecodeError::Syntax { .. })));
        assert!(matches!(decode("<a b=\"1\" b=\"2\"/>"), Err(DecodeError::Syntax { .. })));
        assert!(matches!(decode("<a><!-- open"), Err(DecodeError::Syntax { .. })));
        assert!(matches!(decode("<1a/>"), Err(DecodeError::Syntax { .. })));
    }

    #[test]
    fn test_decode_rejects_unseparated_attributes_and_control_chars() {
        assert!(matches!(decode("<a b=\"1\"c=\"2\"/>"), Err(DecodeError::Syntax { .. })));
        assert!(matches!(decode("<a>bell\u{7}</a>"), Err(DecodeError::Syntax { offset: 7, .. })));
        assert!(matches!(decode("<a k=\"\u{1}\"/>"), Err(DecodeError::Syntax { .. })));
        assert!(matches!(decode("<a><![CDATA[\u{0}]]></a>"), Err(DecodeError::Syntax { .. })));
        assert!(matches!(decode("<a>&#1;</a>"), Err(DecodeError::Entity(_))));

        let tree = decode("<a b=\"1\" c=\"2\"\t/>").unwrap();
        assert_eq!(tree.attribute("c"), Some("2"));
        assert_eq!(decode("<a>tab\there</a>").unwrap().text_of("a"), Some("tab\there"));
    }

    #[test]
    fn test_encode_rejects_control_chars() {
        let node = TreeNode::with_text("a", "bell\u{7}");
        assert!(matches!(encode(&node), Err(EncodeError::InvalidChar('\u{7}'))));
        let node = TreeNode::new("a").attr("k", "\u{0}");
        assert!(matches!(encode(&node), Err(EncodeError::InvalidChar(_))));
    }

    #[test]
    fn test_round_trip_interleaved_text_and_cdata() {
        let tree = TreeNode::new("a")
            .text("x")
            .text("y")
            .child(TreeNode::new("b"))
            .text("z")
            .child(TreeNode::with_text("c", "w"))
            .text("tail");
        assert_eq!(tree.values().len(), 5);
        assert_eq!(decode(&encode(&tree).unwrap()).unwrap(), tree);

        let decoded = decode("<a><![CDATA[x]]>y<b/>z</a>").unwrap();
        assert_eq!(decoded.values()[0], Value::Text("xy".into()));
        assert_eq!(decode(&encode(&decoded).unwrap()).unwrap(), decoded);
    }

    #[test]
    fn test_decode_from_reader_surfaces_io_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
            }
        }

        assert!(matches!(decode_from(Broken), Err(DecodeError::Io(_))));
        let tree = decode_from("<ok/>".as_bytes()).unwrap();
        assert_eq!(tree.name(), "ok");
    }

    #[test]
    fn test_write_document_to_writer() {
        let mut buffer = Vec::new();
        write_document(&mut buffer, &TreeNode::with_text("x", "1")).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, format!("{}\n<x>1</x>\n", HEADER));
    }
}
