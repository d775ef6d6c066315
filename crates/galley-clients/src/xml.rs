//! Minimal XML tree for POS responses.
//!
//! POS hierarchy payloads reuse the same tag name at different depths (a
//! department element contains a child element of the same name acting as a
//! flag), so field extraction must enumerate direct children only —
//! recursive descent would find the wrong node. The tree below makes that
//! the natural access pattern.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub tag: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// First direct child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// All direct children with the given tag.
    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    /// Direct child's trimmed text, `None` when absent or empty.
    pub fn child_text(&self, tag: &str) -> Option<String> {
        self.child(tag).map(|c| c.text.trim().to_string()).filter(|s| !s.is_empty())
    }

    pub fn child_bool(&self, tag: &str) -> bool {
        matches!(self.child_text(tag).as_deref(), Some("true") | Some("1"))
    }

    /// Convert to JSON for the snapshot column. Leaves become strings,
    /// repeated tags become arrays.
    pub fn to_json(&self) -> Value {
        if self.children.is_empty() {
            return Value::String(self.text.trim().to_string());
        }

        let mut map = Map::new();
        for child in &self.children {
            let v = child.to_json();
            match map.get_mut(&child.tag) {
                None => {
                    map.insert(child.tag.clone(), v);
                }
                Some(Value::Array(arr)) => arr.push(v),
                Some(existing) => {
                    let prev = existing.take();
                    *existing = Value::Array(vec![prev, v]);
                }
            }
        }
        Value::Object(map)
    }
}

/// Parse a whole document into its root node.
pub fn parse_document(body: &str) -> ApiResult<XmlNode> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push(XmlNode {
                    tag,
                    ..Default::default()
                });
            }
            Ok(Event::Empty(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let node = XmlNode {
                    tag,
                    ..Default::default()
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(|e| {
                        ApiError::permanent(format!("xml text decode failed: {e}"))
                    })?);
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ApiError::permanent("xml close tag without open"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => {
                        root = Some(node);
                        break;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ApiError::permanent(format!("malformed xml: {e}"))),
        }
    }

    root.ok_or_else(|| ApiError::permanent("empty xml document"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"
        <corporateItemDtoes>
          <corporateItemDto>
            <id>8e9e1bfa-4f24-426e-bf41-a6d1b2eaf733</id>
            <name>Бар (Центр)</name>
            <type>STORE</type>
            <corporateItemDto/>
          </corporateItemDto>
          <corporateItemDto>
            <id>e1a2d52b-9b1c-41b3-93bf-3e5b7a9e6f10</id>
            <name>Кухня (Центр)</name>
            <type>STORE</type>
          </corporateItemDto>
        </corporateItemDtoes>"#;

    #[test]
    fn direct_children_only_no_recursive_descent() {
        let root = parse_document(NESTED).unwrap();
        let items: Vec<_> = root.children_named("corporateItemDto").collect();
        assert_eq!(items.len(), 2);

        // The first item contains a same-named nested tag used as a flag;
        // it must surface as that item's child, not as a third list entry.
        assert!(items[0].child("corporateItemDto").is_some());
        assert!(items[1].child("corporateItemDto").is_none());
    }

    #[test]
    fn child_text_and_bool_extraction() {
        let root = parse_document(
            "<e><id>abc</id><deleted>true</deleted><code></code></e>",
        )
        .unwrap();
        assert_eq!(root.child_text("id").as_deref(), Some("abc"));
        assert!(root.child_bool("deleted"));
        assert_eq!(root.child_text("code"), None, "empty text is absent");
        assert!(!root.child_bool("missing"));
    }

    #[test]
    fn to_json_groups_repeated_tags() {
        let root = parse_document(NESTED).unwrap();
        let json = root.to_json();
        let arr = json.get("corporateItemDto").unwrap().as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(
            arr[1].get("name").unwrap().as_str().unwrap(),
            "Кухня (Центр)"
        );
    }

    #[test]
    fn malformed_xml_is_a_permanent_error() {
        let err = parse_document("<a><b></a>").unwrap_err();
        assert!(!err.is_transient());
    }
}
