#![forbid(unsafe_code)]

//! Server render round-trip data.
//!
//! Rendering on the server evaluates every interpolation and expands every
//! `each` and `template`. The client needs the sources back to bind the
//! rendered nodes without re-rendering them, so the server notes them here,
//! keyed by the element ids stamped into the markup.
//!
//! # Wire form
//!
//! ```json
//! {
//!   "expressions": { "3": "{{name}}" },
//!   "attributes": { "4title": "Hi {{name}}" },
//!   "each": { "5": "<li>{{$this}}</li>" },
//!   "templates": [6]
//! }
//! ```
//!
//! Attribute keys are the element id followed by the attribute name.

use ahash::AHashSet;
use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use crate::BlocksError;
use crate::elements::ElementId;

/// Sources noted while rendering on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerData {
    expressions: IndexMap<ElementId, String>,
    attributes: IndexMap<String, String>,
    each: IndexMap<ElementId, String>,
    templates: AHashSet<ElementId>,
}

impl ServerData {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
            && self.attributes.is_empty()
            && self.each.is_empty()
            && self.templates.is_empty()
    }

    pub(crate) fn note_expression(&mut self, id: ElementId, source: &str) {
        self.expressions.insert(id, source.to_owned());
    }

    pub(crate) fn note_attribute(&mut self, id: ElementId, attribute: &str, source: &str) {
        self.attributes.insert(attribute_key(id, attribute), source.to_owned());
    }

    pub(crate) fn note_each(&mut self, id: ElementId, markup: &str) {
        self.each.insert(id, markup.to_owned());
    }

    pub(crate) fn note_template(&mut self, id: ElementId) {
        self.templates.insert(id);
    }

    /// The interpolation source of text marker `id`.
    #[must_use]
    pub fn expression(&self, id: ElementId) -> Option<&str> {
        self.expressions.get(&id).map(String::as_str)
    }

    /// The authored template of `attribute` on element `id`.
    #[must_use]
    pub fn attribute(&self, id: &str, attribute: &str) -> Option<&str> {
        self.attributes
            .get(&format!("{id}{attribute}"))
            .map(String::as_str)
    }

    /// The authored template of the `each` element `id`.
    #[must_use]
    pub fn each_template(&self, id: ElementId) -> Option<&str> {
        self.each.get(&id).map(String::as_str)
    }

    /// Hand out the `each` template of `id`; every element expands once.
    pub(crate) fn take_each(&mut self, id: ElementId) -> Option<String> {
        self.each.shift_remove(&id)
    }

    /// Whether element `id` already holds its expanded `template(...)`.
    #[must_use]
    pub fn has_template(&self, id: ElementId) -> bool {
        self.templates.contains(&id)
    }

    // -----------------------------------------------------------------------
    // JSON
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn to_json(&self) -> Json {
        let keyed = |map: &IndexMap<ElementId, String>| {
            map.iter()
                .map(|(id, source)| (id.to_string(), Json::from(source.as_str())))
                .collect::<Map<_, _>>()
        };
        let attributes = self
            .attributes
            .iter()
            .map(|(key, source)| (key.clone(), Json::from(source.as_str())))
            .collect::<Map<_, _>>();
        let mut templates: Vec<ElementId> = self.templates.iter().copied().collect();
        templates.sort_unstable();

        let mut json = Map::new();
        json.insert("expressions".into(), Json::Object(keyed(&self.expressions)));
        json.insert("attributes".into(), Json::Object(attributes));
        json.insert("each".into(), Json::Object(keyed(&self.each)));
        json.insert("templates".into(), Json::from(templates));
        Json::Object(json)
    }

    /// Read the wire form. Missing sections are empty.
    pub fn from_json(json: &Json) -> Result<Self, BlocksError> {
        let Json::Object(root) = json else {
            return Err(BlocksError::Type("server data must be a JSON object".into()));
        };
        let mut data = Self::default();
        for (key, source) in section(root, "expressions")? {
            data.expressions.insert(parse_id(key)?, source);
        }
        for (key, source) in section(root, "attributes")? {
            data.attributes.insert(key.clone(), source);
        }
        for (key, source) in section(root, "each")? {
            data.each.insert(parse_id(key)?, source);
        }
        if let Some(templates) = root.get("templates") {
            let Json::Array(ids) = templates else {
                return Err(BlocksError::Type("`templates` must be an array".into()));
            };
            for id in ids {
                let id = id
                    .as_u64()
                    .and_then(|id| ElementId::try_from(id).ok())
                    .ok_or_else(|| BlocksError::Type(format!("bad template id {id}")))?;
                data.templates.insert(id);
            }
        }
        Ok(data)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json_str(text: &str) -> Result<Self, BlocksError> {
        let json: Json = serde_json::from_str(text).map_err(|err| BlocksError::Parse {
            source: text.chars().take(64).collect(),
            offset: err.column(),
            message: err.to_string(),
        })?;
        Self::from_json(&json)
    }
}

fn attribute_key(id: ElementId, attribute: &str) -> String {
    format!("{id}{attribute}")
}

fn section<'a>(root: &'a Map<String, Json>, name: &str) -> Result<Vec<(&'a String, String)>, BlocksError> {
    let Some(section) = root.get(name) else {
        return Ok(Vec::new());
    };
    let Json::Object(entries) = section else {
        return Err(BlocksError::Type(format!("`{name}` must be an object")));
    };
    entries
        .iter()
        .map(|(key, value)| match value {
            Json::String(source) => Ok((key, source.clone())),
            _ => Err(BlocksError::Type(format!("`{name}.{key}` must be a string"))),
        })
        .collect()
}

fn parse_id(key: &str) -> Result<ElementId, BlocksError> {
    key.parse()
        .map_err(|_| BlocksError::Type(format!("bad element id `{key}`")))
}

/// Markup rendered by [`Runtime::render_to_string`](crate::Runtime::render_to_string)
/// and the sources the client needs to bind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    pub server_data: ServerData,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServerData {
        let mut data = ServerData::default();
        data.note_expression(3, "{{name}}");
        data.note_attribute(4, "title", "Hi {{name}}");
        data.note_each(5, "<li>{{$this}}</li>");
        data.note_template(6);
        data
    }

    #[test]
    fn lookups_use_element_ids() {
        let data = sample();
        assert_eq!(data.expression(3), Some("{{name}}"));
        assert_eq!(data.attribute("4", "title"), Some("Hi {{name}}"));
        assert_eq!(data.attribute("4", "href"), None);
        assert!(data.has_template(6));
        assert!(!data.is_empty());
        assert!(ServerData::default().is_empty());
    }

    #[test]
    fn each_templates_are_handed_out_once() {
        let mut data = sample();
        assert_eq!(data.take_each(5).as_deref(), Some("<li>{{$this}}</li>"));
        assert_eq!(data.take_each(5), None);
    }

    #[test]
    fn json_wire_form() {
        let data = sample();
        let json = data.to_json();
        assert_eq!(json["expressions"]["3"], "{{name}}");
        assert_eq!(json["attributes"]["4title"], "Hi {{name}}");
        assert_eq!(json["templates"], serde_json::json!([6]));
        assert_eq!(ServerData::from_json_str(&data.to_json_string()).expect("parse"), data);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(ServerData::from_json_str("{"), Err(BlocksError::Parse { .. })));
        assert!(matches!(
            ServerData::from_json(&serde_json::json!({"expressions": {"x": "a"}})),
            Err(BlocksError::Type(_))
        ));
        assert!(ServerData::from_json(&serde_json::json!({})).is_ok_and(|data| data.is_empty()));
    }
}
