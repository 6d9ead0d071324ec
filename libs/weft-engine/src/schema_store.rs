//! Per-extension schema index.
//!
//! Holds the extension's own property schema plus eight msg-name → schema
//! maps (commands, data, video frames, audio frames, inbound and
//! outbound) and two interface maps whose by-reference imports expand into
//! the per-message maps. Maps are insertion-ordered: declaration order in
//! the manifest is observable through iteration.
//!
//! Manifest shape (the `api` object):
//!
//! ```json
//! {
//!   "property": { "<name>": <schema>, ... },
//!   "required": ["<name>", ...],
//!   "cmd_in":  [ { "name": "...", "property": {...}, "required": [...],
//!                  "result": { "property": {...} } }, ... ],
//!   "cmd_out": [...],
//!   "data_in": [...], "data_out": [...],
//!   "video_frame_in": [...], "video_frame_out": [...],
//!   "audio_frame_in": [...], "audio_frame_out": [...],
//!   "interface_in": [...], "interface_out": [...]
//! }
//! ```

use std::sync::Arc;

use indexmap::IndexMap;

use weft_api::error::Error;
use weft_api::msg::{Msg, MsgType};
use weft_api::schema::Schema;
use weft_api::value::{Value, parse_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgDirection {
    In,
    Out,
}

/// Schema attached to one message name: the property-tree schema plus, for
/// commands, the schema of the reply's property tree.
#[derive(Debug)]
pub struct MsgSchema {
    pub name: String,
    pub property: Option<Schema>,
    pub result: Option<Schema>,
}

impl MsgSchema {
    pub fn adjust_properties(&self, props: &mut Value) -> Result<(), Error> {
        match &self.property {
            // No property schema is defined, which is permitted.
            None => Ok(()),
            Some(schema) => schema.adjust(props),
        }
    }

    pub fn validate_properties(&self, props: &Value) -> Result<(), Error> {
        match &self.property {
            None => Ok(()),
            Some(schema) => schema.validate(props),
        }
    }
}

/// Expands interface references into plain msg-schema arrays.
///
/// Interfaces are schema packages imported by reference; resolving them
/// (file lookup, registry fetch) is an external concern. The resolver
/// returns an object with optional `cmd`, `data`, `video_frame` and
/// `audio_frame` arrays in the same element shape as the manifest.
pub trait InterfaceResolver: Send + Sync {
    fn resolve(&self, interface_def: &Value, base_dir: &str) -> Result<Value, Error>;
}

type MsgSchemaMap = IndexMap<String, Arc<MsgSchema>>;

#[derive(Default)]
pub struct SchemaStore {
    /// Schema of the extension's own config properties; always an
    /// object schema when present.
    property: Option<Schema>,

    cmd_in: MsgSchemaMap,
    cmd_out: MsgSchemaMap,
    data_in: MsgSchemaMap,
    data_out: MsgSchemaMap,
    video_frame_in: MsgSchemaMap,
    video_frame_out: MsgSchemaMap,
    audio_frame_in: MsgSchemaMap,
    audio_frame_out: MsgSchemaMap,

    /// Interface name → message names it contributed, per direction.
    interface_in: IndexMap<String, Vec<(MsgType, String)>>,
    interface_out: IndexMap<String, Vec<(MsgType, String)>>,
}

/// Wrap a msg entry's `property`/`required` keywords into one standalone
/// object-schema definition.
fn wrap_object_schema(property: Option<&Value>, required: Option<&Value>) -> Option<Value> {
    property?;
    let mut def = Value::empty_object();
    let _ = def.object_move("type", Value::from("object"));
    if let Some(props) = property {
        let _ = def.object_move("properties", props.clone());
    }
    if let Some(req) = required {
        let _ = def.object_move("required", req.clone());
    }
    Some(def)
}

fn parse_msg_schema(entry: &Value) -> Result<MsgSchema, Error> {
    if !entry.is_object() {
        return Err(Error::invalid_argument("msg schema entry is not an object"));
    }

    // An entry with no name is malformed: there is nothing to index it
    // under, and the reserved-empty fallback of older designs is not
    // reproduced here.
    let name = entry
        .object_peek("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::invalid_argument("msg schema entry has no 'name'"))?;

    let property = wrap_object_schema(entry.object_peek("property"), entry.object_peek("required"))
        .map(|def| Schema::from_value(&def))
        .transpose()
        .map_err(|e| e.with_context(format!("msg '{name}'")))?;

    let result = match entry.object_peek("result") {
        None => None,
        Some(result_def) => {
            wrap_object_schema(result_def.object_peek("property"), result_def.object_peek("required"))
                .map(|def| Schema::from_value(&def))
                .transpose()
                .map_err(|e| e.with_context(format!("msg '{name}' result")))?
        }
    };

    Ok(MsgSchema { name: name.to_string(), property, result })
}

impl SchemaStore {
    pub fn new() -> SchemaStore {
        SchemaStore::default()
    }

    /// Parse the manifest `api` object. Nothing is applied when any part
    /// of the definition is malformed.
    pub fn set_schema_definition(&mut self, api: &Value) -> Result<(), Error> {
        let mut fresh = SchemaStore::new();

        if !api.is_object() {
            return Err(Error::invalid_argument("api definition is not an object"));
        }

        if let Some(def) =
            wrap_object_schema(api.object_peek("property"), api.object_peek("required"))
        {
            fresh.property = Some(Schema::from_value(&def).map_err(|e| e.with_context("property"))?);
        }

        const SECTIONS: [(&str, MsgType, MsgDirection); 8] = [
            ("cmd_in", MsgType::Cmd, MsgDirection::In),
            ("cmd_out", MsgType::Cmd, MsgDirection::Out),
            ("data_in", MsgType::Data, MsgDirection::In),
            ("data_out", MsgType::Data, MsgDirection::Out),
            ("video_frame_in", MsgType::VideoFrame, MsgDirection::In),
            ("video_frame_out", MsgType::VideoFrame, MsgDirection::Out),
            ("audio_frame_in", MsgType::AudioFrame, MsgDirection::In),
            ("audio_frame_out", MsgType::AudioFrame, MsgDirection::Out),
        ];

        for (section, msg_type, direction) in SECTIONS {
            let Some(entries) = api.object_peek(section) else {
                continue;
            };
            let entries = entries
                .as_array()
                .ok_or_else(|| Error::invalid_argument(format!("'{section}' is not an array")))?;
            for entry in entries {
                let schema = parse_msg_schema(entry).map_err(|e| e.with_context(section))?;
                fresh.insert_msg_schema(msg_type, direction, schema)?;
            }
        }

        *self = fresh;
        Ok(())
    }

    /// Resolve `interface_in`/`interface_out` imports and merge the
    /// expanded message schemas into the per-message maps, then apply the
    /// rest of the definition.
    pub fn set_interface_schema_definition(
        &mut self,
        api: &Value,
        base_dir: &str,
        resolver: &dyn InterfaceResolver,
    ) -> Result<(), Error> {
        self.set_schema_definition(api)?;

        for (section, direction) in
            [("interface_in", MsgDirection::In), ("interface_out", MsgDirection::Out)]
        {
            let Some(entries) = api.object_peek(section) else {
                continue;
            };
            let entries = entries
                .as_array()
                .ok_or_else(|| Error::invalid_argument(format!("'{section}' is not an array")))?;

            for entry in entries {
                let interface_name = entry
                    .object_peek("name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        Error::invalid_argument(format!("'{section}' entry has no 'name'"))
                    })?
                    .to_string();

                let expanded = resolver
                    .resolve(entry, base_dir)
                    .map_err(|e| e.with_context(format!("interface '{interface_name}'")))?;

                let mut contributed = Vec::new();
                const GROUPS: [(&str, MsgType); 4] = [
                    ("cmd", MsgType::Cmd),
                    ("data", MsgType::Data),
                    ("video_frame", MsgType::VideoFrame),
                    ("audio_frame", MsgType::AudioFrame),
                ];
                for (group, msg_type) in GROUPS {
                    let Some(msgs) = expanded.object_peek(group) else {
                        continue;
                    };
                    let msgs = msgs.as_array().ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "interface '{interface_name}': '{group}' is not an array"
                        ))
                    })?;
                    for msg_entry in msgs {
                        let schema = parse_msg_schema(msg_entry)
                            .map_err(|e| e.with_context(format!("interface '{interface_name}'")))?;
                        contributed.push((msg_type, schema.name.clone()));
                        self.insert_msg_schema(msg_type, direction, schema)?;
                    }
                }

                let interfaces = match direction {
                    MsgDirection::In => &mut self.interface_in,
                    MsgDirection::Out => &mut self.interface_out,
                };
                if interfaces.insert(interface_name.clone(), contributed).is_some() {
                    return Err(Error::invalid_argument(format!(
                        "duplicate interface '{interface_name}'"
                    )));
                }
            }
        }

        Ok(())
    }

    fn insert_msg_schema(
        &mut self,
        msg_type: MsgType,
        direction: MsgDirection,
        schema: MsgSchema,
    ) -> Result<(), Error> {
        let map = match (msg_type, direction) {
            (MsgType::Cmd, MsgDirection::In) => &mut self.cmd_in,
            (MsgType::Cmd, MsgDirection::Out) => &mut self.cmd_out,
            (MsgType::Data, MsgDirection::In) => &mut self.data_in,
            (MsgType::Data, MsgDirection::Out) => &mut self.data_out,
            (MsgType::VideoFrame, MsgDirection::In) => &mut self.video_frame_in,
            (MsgType::VideoFrame, MsgDirection::Out) => &mut self.video_frame_out,
            (MsgType::AudioFrame, MsgDirection::In) => &mut self.audio_frame_in,
            (MsgType::AudioFrame, MsgDirection::Out) => &mut self.audio_frame_out,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "message type {msg_type:?} cannot carry a schema"
                )));
            }
        };
        let name = schema.name.clone();
        if map.insert(name.clone(), Arc::new(schema)).is_some() {
            return Err(Error::invalid_argument(format!(
                "duplicate msg schema for '{name}'"
            )));
        }
        Ok(())
    }

    /// Schema for `(msg_type, msg_name, direction)`, if declared.
    pub fn msg_schema(
        &self,
        msg_type: MsgType,
        msg_name: &str,
        direction: MsgDirection,
    ) -> Option<&Arc<MsgSchema>> {
        let map = match (msg_type, direction) {
            (MsgType::Cmd, MsgDirection::In) => &self.cmd_in,
            (MsgType::Cmd, MsgDirection::Out) => &self.cmd_out,
            (MsgType::Data, MsgDirection::In) => &self.data_in,
            (MsgType::Data, MsgDirection::Out) => &self.data_out,
            (MsgType::VideoFrame, MsgDirection::In) => &self.video_frame_in,
            (MsgType::VideoFrame, MsgDirection::Out) => &self.video_frame_out,
            (MsgType::AudioFrame, MsgDirection::In) => &self.audio_frame_in,
            (MsgType::AudioFrame, MsgDirection::Out) => &self.audio_frame_out,
            _ => return None,
        };
        map.get(msg_name)
    }

    /// Message names contributed by an expanded interface. Returns `None`
    /// when the interface is unknown.
    pub fn interface_msg_names(
        &self,
        direction: MsgDirection,
        interface_name: &str,
    ) -> Option<&[(MsgType, String)]> {
        let interfaces = match direction {
            MsgDirection::In => &self.interface_in,
            MsgDirection::Out => &self.interface_out,
        };
        interfaces.get(interface_name).map(Vec::as_slice)
    }

    // -- extension config properties ---------------------------------------

    pub fn adjust_properties(&self, props: &mut Value) -> Result<(), Error> {
        match &self.property {
            None => Ok(()),
            Some(schema) => schema.adjust(props),
        }
    }

    pub fn validate_properties(&self, props: &Value) -> Result<(), Error> {
        match &self.property {
            None => Ok(()),
            Some(schema) => schema.validate(props),
        }
    }

    /// Adjust a single top-level property as it is set.
    pub fn adjust_property_kv(&self, name: &str, value: &mut Value) -> Result<(), Error> {
        match self.property.as_ref().and_then(|p| p.property(name)) {
            None => Ok(()),
            Some(schema) => schema.adjust(value).map_err(|e| e.with_context(format!(".{name}"))),
        }
    }

    pub fn validate_property_kv(&self, name: &str, value: &Value) -> Result<(), Error> {
        match self.property.as_ref().and_then(|p| p.property(name)) {
            None => Ok(()),
            Some(schema) => schema.validate(value).map_err(|e| e.with_context(format!(".{name}"))),
        }
    }

    // -- ingress/egress ----------------------------------------------------

    /// Apply `adjust` then `validate` to the message's property tree,
    /// using the schema indexed under `(type, name, direction)`. Messages
    /// without a declared schema pass through.
    pub fn adjust_and_validate_msg(&self, msg: &mut Msg, direction: MsgDirection) -> Result<(), Error> {
        let Some(schema) = self.msg_schema(msg.msg_type(), msg.name(), direction).cloned() else {
            return Ok(());
        };
        let props = msg.properties_mut();
        schema
            .adjust_properties(props)
            .and_then(|()| schema.validate_properties(props))
            .map_err(|e| e.with_context(format!("msg '{}'", schema.name)))
    }
}

/// First segment of a property path: the top-level key the per-kv schema
/// operations index by.
pub fn top_level_key(path: &str) -> Result<String, Error> {
    match parse_path(path)?.into_iter().next() {
        Some(weft_api::value::PathSeg::Key(k)) => Ok(k),
        _ => Err(Error::invalid_argument(format!(
            "path '{path}' does not start with a property name"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(api_json: &str) -> SchemaStore {
        let api = Value::from_json_str(api_json).unwrap();
        let mut store = SchemaStore::new();
        store.set_schema_definition(&api).unwrap();
        store
    }

    const API: &str = r#"{
        "property": {
            "rate": { "type": "uint32" },
            "label": { "type": "string" }
        },
        "required": ["rate"],
        "cmd_in": [
            {
                "name": "configure",
                "property": { "mode": { "type": "string" } },
                "required": ["mode"],
                "result": { "property": { "applied": { "type": "bool" } } }
            }
        ],
        "cmd_out": [
            { "name": "query", "property": { "key": { "type": "string" } } }
        ],
        "data_in": [
            { "name": "samples", "property": { "count": { "type": "int32" } } }
        ]
    }"#;

    #[test]
    fn indexes_by_type_name_and_direction() {
        let store = store_with(API);

        assert!(store.msg_schema(MsgType::Cmd, "configure", MsgDirection::In).is_some());
        assert!(store.msg_schema(MsgType::Cmd, "configure", MsgDirection::Out).is_none());
        assert!(store.msg_schema(MsgType::Cmd, "query", MsgDirection::Out).is_some());
        assert!(store.msg_schema(MsgType::Data, "samples", MsgDirection::In).is_some());
        assert!(store.msg_schema(MsgType::Data, "unknown", MsgDirection::In).is_none());
    }

    #[test]
    fn cmd_result_schema_is_parsed() {
        let store = store_with(API);
        let schema = store.msg_schema(MsgType::Cmd, "configure", MsgDirection::In).unwrap();
        assert!(schema.result.is_some());

        let mut reply = Value::from_json_str(r#"{"applied":true}"#).unwrap();
        schema.result.as_ref().unwrap().adjust(&mut reply).unwrap();
        schema.result.as_ref().unwrap().validate(&reply).unwrap();
    }

    #[test]
    fn entry_without_name_is_rejected() {
        let api = Value::from_json_str(r#"{"cmd_in":[{"property":{}}]}"#).unwrap();
        let mut store = SchemaStore::new();
        assert!(store.set_schema_definition(&api).is_err());
    }

    #[test]
    fn property_kv_adjust_and_validate() {
        let store = store_with(API);

        let mut rate = Value::Uint64(44_100);
        store.adjust_property_kv("rate", &mut rate).unwrap();
        assert_eq!(rate, Value::Uint32(44_100));
        store.validate_property_kv("rate", &rate).unwrap();

        let mut bad = Value::Int32(-1);
        assert!(store.adjust_property_kv("rate", &mut bad).is_err());

        // Undeclared keys pass through.
        let mut free = Value::from("anything");
        store.adjust_property_kv("extra", &mut free).unwrap();
    }

    #[test]
    fn properties_roundtrip_with_required() {
        let store = store_with(API);
        let mut props = Value::from_json_str(r#"{"rate":8000,"label":"x"}"#).unwrap();
        store.adjust_properties(&mut props).unwrap();
        store.validate_properties(&props).unwrap();

        let missing = Value::from_json_str(r#"{"label":"x"}"#).unwrap();
        assert!(store.validate_properties(&missing).is_err());
    }

    #[test]
    fn ingress_adjusts_message_properties() {
        let store = store_with(API);
        let mut msg: Msg = weft_api::msg::Data::create("samples").unwrap().into();
        msg.set_property("count", Value::Uint64(5)).unwrap();

        store.adjust_and_validate_msg(&mut msg, MsgDirection::In).unwrap();
        assert_eq!(msg.get_property("count"), Some(Value::Int32(5)));

        // Unknown messages pass through untouched.
        let mut other: Msg = weft_api::msg::Data::create("other").unwrap().into();
        other.set_property("count", Value::from("str")).unwrap();
        store.adjust_and_validate_msg(&mut other, MsgDirection::In).unwrap();
    }

    struct InlineResolver;

    impl InterfaceResolver for InlineResolver {
        fn resolve(&self, interface_def: &Value, _base_dir: &str) -> Result<Value, Error> {
            // A real resolver loads the referenced package; this one
            // expands a fixed shape for the test.
            let name = interface_def.object_peek("name").and_then(Value::as_str).unwrap_or("");
            Value::from_json_str(&format!(
                r#"{{
                    "cmd": [ {{ "name": "{name}_ping", "property": {{ "seq": {{ "type": "uint64" }} }} }} ],
                    "data": [ {{ "name": "{name}_stream" }} ]
                }}"#
            ))
        }
    }

    #[test]
    fn interfaces_expand_into_msg_maps() {
        let api = Value::from_json_str(
            r#"{
                "cmd_in": [ { "name": "own" } ],
                "interface_in": [ { "name": "probe" } ]
            }"#,
        )
        .unwrap();

        let mut store = SchemaStore::new();
        store
            .set_interface_schema_definition(&api, "/base", &InlineResolver)
            .unwrap();

        assert!(store.msg_schema(MsgType::Cmd, "own", MsgDirection::In).is_some());
        assert!(store.msg_schema(MsgType::Cmd, "probe_ping", MsgDirection::In).is_some());
        assert!(store.msg_schema(MsgType::Data, "probe_stream", MsgDirection::In).is_some());

        let names = store.interface_msg_names(MsgDirection::In, "probe").unwrap();
        assert_eq!(
            names,
            &[
                (MsgType::Cmd, "probe_ping".to_string()),
                (MsgType::Data, "probe_stream".to_string()),
            ]
        );
        assert!(store.interface_msg_names(MsgDirection::Out, "probe").is_none());
    }

    #[test]
    fn duplicate_msg_names_are_rejected() {
        let api = Value::from_json_str(
            r#"{"cmd_in":[{"name":"dup"},{"name":"dup"}]}"#,
        )
        .unwrap();
        let mut store = SchemaStore::new();
        assert!(store.set_schema_definition(&api).is_err());
    }
}
