//! Conversion between item payloads and plain key/value entries.

use minidom::Element;
use serde_json::{Map, Value};

use crate::{ns, Error, Result};

/// Encodes published entries and decodes received item payloads.
pub trait EntryCodec: Send + Sync + 'static {
    /// Build the payload element placed inside a published `<item/>`.
    fn encode(&self, entry: &Value) -> Result<Element>;

    /// Turn an `<item/>` payload element into a plain value.
    fn decode(&self, payload: &Element) -> Value;
}

/// Minimal Atom mapping: object keys become `<entry/>` children.
///
/// Nested objects nest, arrays repeat the element, scalars become text.
/// Decoding reverses this; repeated children collect into arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomCodec;

impl AtomCodec {
    fn encode_into(parent: &mut Element, name: &str, value: &Value) {
        match value {
            Value::Array(values) => {
                for v in values {
                    Self::encode_into(parent, name, v);
                }
            }
            Value::Object(map) => {
                let mut child = Element::bare(name, ns::ATOM);
                for (k, v) in map {
                    Self::encode_into(&mut child, k, v);
                }
                parent.append_child(child);
            }
            Value::Null => {
                parent.append_child(Element::bare(name, ns::ATOM));
            }
            Value::String(s) => {
                let mut child = Element::bare(name, ns::ATOM);
                child.append_text_node(s.as_str());
                parent.append_child(child);
            }
            other => {
                let mut child = Element::bare(name, ns::ATOM);
                child.append_text_node(other.to_string());
                parent.append_child(child);
            }
        }
    }

    fn decode_element(element: &Element) -> Value {
        if element.children().next().is_none() {
            return Value::String(element.text());
        }
        let mut map = Map::new();
        for child in element.children() {
            let value = Self::decode_element(child);
            match map.get_mut(child.name()) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(child.name().to_string(), value);
                }
            }
        }
        Value::Object(map)
    }
}

impl EntryCodec for AtomCodec {
    fn encode(&self, entry: &Value) -> Result<Element> {
        let Value::Object(fields) = entry else {
            return Err(Error::client("Entry must be an object", entry));
        };
        let mut root = Element::bare("entry", ns::ATOM);
        for (k, v) in fields {
            Self::encode_into(&mut root, k, v);
        }
        Ok(root)
    }

    fn decode(&self, payload: &Element) -> Value {
        Self::decode_element(payload)
    }
}
