//! Tolerant handling of the feed's XML.
//!
//! Archived snapshots are frequently damaged: NUL padding after the
//! document, truncated bodies, stray or mismatched end tags. [`repair`]
//! rewrites such input into a well-formed document without ever failing,
//! and [`to_tree`] turns a well-formed document into a JSON tree in which
//! text-only elements become strings, empty elements become `null` and
//! repeated children become arrays.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Value};

fn decode_dropping_invalid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

fn owned_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Rewrite possibly damaged feed bytes into a well-formed XML document.
///
/// Invalid UTF-8 is dropped, trailing NUL bytes are stripped, end tags that
/// close nothing are discarded, and every element still open when the input
/// ends (or becomes unreadable) is closed. Content after the first root
/// element is ignored. The result is empty when no element was found.
pub fn repair(bytes: &[u8]) -> String {
    let decoded = decode_dropping_invalid(bytes);
    let cleaned = decoded.trim_start_matches('\u{feff}').trim_end_matches('\0');

    let mut reader = Reader::from_str(cleaned);
    reader.config_mut().check_end_names = false;
    let mut writer = Writer::new(Vec::new());
    let mut open: Vec<Vec<u8>> = Vec::new();
    let mut saw_root = false;

    loop {
        let event = match reader.read_event() {
            Ok(Event::Eof) | Err(_) => break,
            Ok(event) => event,
        };
        let written = match event {
            Event::Start(e) => {
                if saw_root && open.is_empty() {
                    break;
                }
                saw_root = true;
                open.push(e.name().as_ref().to_vec());
                writer.write_event(Event::Start(e))
            }
            Event::Empty(e) => {
                if saw_root && open.is_empty() {
                    break;
                }
                saw_root = true;
                writer.write_event(Event::Empty(e))
            }
            Event::End(e) => {
                let name = e.name().as_ref().to_vec();
                let Some(depth) = open.iter().rposition(|n| *n == name) else {
                    continue;
                };
                let mut result = Ok(());
                while open.len() > depth {
                    let Some(closing) = open.pop() else { break };
                    result = writer.write_event(Event::End(BytesEnd::new(owned_name(&closing))));
                    if result.is_err() {
                        break;
                    }
                }
                result
            }
            Event::Text(e) if !open.is_empty() => writer.write_event(Event::Text(e)),
            Event::CData(e) if !open.is_empty() => writer.write_event(Event::CData(e)),
            _ => continue,
        };
        if written.is_err() {
            break;
        }
        if saw_root && open.is_empty() {
            break;
        }
    }

    while let Some(closing) = open.pop() {
        if writer
            .write_event(Event::End(BytesEnd::new(owned_name(&closing))))
            .is_err()
        {
            break;
        }
    }

    String::from_utf8_lossy(&writer.into_inner()).into_owned()
}

struct Node {
    name: String,
    children: Vec<(String, Value)>,
    text: String,
}

impl Node {
    fn open(start: &BytesStart<'_>) -> Self {
        let mut children = Vec::new();
        for attr in start.attributes().flatten() {
            let key = format!("@{}", owned_name(attr.key.as_ref()));
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| owned_name(&attr.value));
            children.push((key, Value::String(value)));
        }
        Self {
            name: owned_name(start.name().as_ref()),
            children,
            text: String::new(),
        }
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim().to_string();
        if self.children.is_empty() {
            let value = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
            return (self.name, value);
        }

        let mut map = Map::new();
        for (key, value) in self.children {
            push_child(&mut map, key, value);
        }
        if !text.is_empty() {
            map.insert("#text".to_string(), Value::String(text));
        }
        (self.name, Value::Object(map))
    }
}

fn push_child(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        None => {
            map.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

fn text_of(e: &BytesText<'_>) -> String {
    match e.unescape() {
        Ok(text) => text.into_owned(),
        Err(_) => String::from_utf8_lossy(e).into_owned(),
    }
}

/// Convert a well-formed document into `{root_name: tree}`.
pub fn to_tree(xml: &str) -> Result<Value, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<Node> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Node::open(&e)),
            Ok(Event::Empty(e)) => {
                let (name, value) = Node::open(&e).close();
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, value)),
                    None => return Ok(root(name, value)),
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text_of(&e));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let Some(node) = stack.pop() else {
                    return Err("unexpected end tag before any element".to_string());
                };
                let (name, value) = node.close();
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, value)),
                    None => return Ok(root(name, value)),
                }
            }
            Ok(Event::Eof) => {
                return Err(if stack.is_empty() {
                    "document has no root element".to_string()
                } else {
                    "document ended inside an element".to_string()
                });
            }
            Ok(_) => {}
            Err(err) => {
                return Err(format!(
                    "xml error at byte {}: {err}",
                    reader.error_position()
                ));
            }
        }
    }
}

fn root(name: String, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(name, value);
    Value::Object(map)
}
