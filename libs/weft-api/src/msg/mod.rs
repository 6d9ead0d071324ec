//! Polymorphic message family.
//!
//! Every message carries the same header: type, name (empty for framed
//! data types), source/destination locations and a property value tree.
//! Each variant owns its payload fields and knows how to clone itself;
//! buffers deep-copy by default, shared buffers bump a refcount.

use crate::error::Error;
use crate::value::Value;

mod audio_frame;
mod cmd;
mod data;
mod video_frame;

pub use audio_frame::{AudioFrame, AudioFrameDataFmt};
pub use cmd::{Cmd, CmdKind, CmdResult, StatusCode};
pub use data::Data;
pub use video_frame::{PixelFmt, VideoFrame};

/// Message names starting with this prefix are reserved for
/// framework-internal messages; extension-authored names may not use it.
pub const RESERVED_MSG_NAME_PREFIX: &str = "weft:";

/// Reject extension-authored names that use the reserved prefix.
pub fn check_msg_name(name: &str) -> Result<(), Error> {
    if name.starts_with(RESERVED_MSG_NAME_PREFIX) {
        return Err(Error::invalid_argument(format!(
            "message name '{name}' uses the reserved '{RESERVED_MSG_NAME_PREFIX}' prefix"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Cmd,
    CmdResult,
    Data,
    AudioFrame,
    VideoFrame,
    CmdStartGraph,
    CmdStopGraph,
    CmdTimer,
    CmdCloseApp,
}

impl MsgType {
    /// The command family: messages that correlate with a result.
    pub fn is_cmd(self) -> bool {
        matches!(
            self,
            MsgType::Cmd
                | MsgType::CmdStartGraph
                | MsgType::CmdStopGraph
                | MsgType::CmdTimer
                | MsgType::CmdCloseApp
        )
    }
}

/// Location of a message endpoint inside the app/graph/group/extension
/// hierarchy. Empty fields are unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Loc {
    pub app_uri: String,
    pub graph_id: String,
    pub extension_group: String,
    pub extension: String,
}

impl Loc {
    pub fn extension(name: impl Into<String>) -> Loc {
        Loc { extension: name.into(), ..Loc::default() }
    }
}

/// Header fields common to every message variant.
#[derive(Debug, Clone)]
pub struct MsgHeader {
    pub name: String,
    pub src: Loc,
    pub dests: Vec<Loc>,
    /// Always an object value.
    pub properties: Value,
    /// Microseconds; meaning is variant-specific (e.g. presentation time).
    pub timestamp: Option<i64>,
    /// Set while a payload buffer is borrowed out; such a message may not
    /// be sent.
    pub has_locked_res: bool,
}

impl MsgHeader {
    pub fn new(name: impl Into<String>) -> MsgHeader {
        MsgHeader {
            name: name.into(),
            src: Loc::default(),
            dests: Vec::new(),
            properties: Value::empty_object(),
            timestamp: None,
            has_locked_res: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Msg {
    Cmd(Cmd),
    CmdResult(CmdResult),
    Data(Data),
    AudioFrame(AudioFrame),
    VideoFrame(VideoFrame),
}

impl Msg {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Msg::Cmd(cmd) => cmd.msg_type(),
            Msg::CmdResult(_) => MsgType::CmdResult,
            Msg::Data(_) => MsgType::Data,
            Msg::AudioFrame(_) => MsgType::AudioFrame,
            Msg::VideoFrame(_) => MsgType::VideoFrame,
        }
    }

    pub fn header(&self) -> &MsgHeader {
        match self {
            Msg::Cmd(m) => &m.header,
            Msg::CmdResult(m) => &m.header,
            Msg::Data(m) => &m.header,
            Msg::AudioFrame(m) => &m.header,
            Msg::VideoFrame(m) => &m.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut MsgHeader {
        match self {
            Msg::Cmd(m) => &mut m.header,
            Msg::CmdResult(m) => &mut m.header,
            Msg::Data(m) => &mut m.header,
            Msg::AudioFrame(m) => &mut m.header,
            Msg::VideoFrame(m) => &mut m.header,
        }
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    pub fn src(&self) -> &Loc {
        &self.header().src
    }

    pub fn set_src(&mut self, src: Loc) {
        self.header_mut().src = src;
    }

    pub fn dests(&self) -> &[Loc] {
        &self.header().dests
    }

    /// Replace the destination list atomically.
    pub fn set_dests(&mut self, dests: Vec<Loc>) {
        self.header_mut().dests = dests;
    }

    pub fn add_dest(&mut self, dest: Loc) {
        self.header_mut().dests.push(dest);
    }

    pub fn has_locked_res(&self) -> bool {
        self.header().has_locked_res
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.header().timestamp
    }

    pub fn set_timestamp(&mut self, us: i64) {
        self.header_mut().timestamp = Some(us);
    }

    // -- property tree -----------------------------------------------------

    pub fn properties(&self) -> &Value {
        &self.header().properties
    }

    pub fn properties_mut(&mut self) -> &mut Value {
        &mut self.header_mut().properties
    }

    /// Move `value` into the property tree at `path`.
    ///
    /// The callee always takes ownership: on failure the value is dropped
    /// and nothing is partially applied.
    pub fn set_property(&mut self, path: &str, value: Value) -> Result<(), Error> {
        self.header_mut().properties.set_from_path(path, value)
    }

    pub fn get_property(&self, path: &str) -> Option<Value> {
        self.header().properties.peek_from_path(path).ok().cloned()
    }

    /// Parse `json` and move the resulting value to `path`. A single
    /// failure path: invalid JSON returns `InvalidArgument` and nothing is
    /// retained.
    pub fn set_property_from_json(&mut self, path: &str, json: &str) -> Result<(), Error> {
        let value = Value::from_json_str(json)?;
        self.set_property(path, value)
    }

    pub fn get_property_to_json(&self, path: &str) -> Result<String, Error> {
        Ok(self.header().properties.peek_from_path(path)?.to_json_string())
    }

    /// Clone the message, dropping the listed top-level property keys.
    /// Everything else duplicates, payload buffers included.
    pub fn clone_excluding(&self, excluded_properties: &[&str]) -> Msg {
        let mut cloned = self.clone();
        if let Some(kv) = cloned.header_mut().properties.as_object_mut() {
            kv.retain(|(k, _)| !excluded_properties.contains(&k.as_str()));
        }
        cloned
    }
}

impl From<Cmd> for Msg {
    fn from(m: Cmd) -> Msg {
        Msg::Cmd(m)
    }
}

impl From<CmdResult> for Msg {
    fn from(m: CmdResult) -> Msg {
        Msg::CmdResult(m)
    }
}

impl From<Data> for Msg {
    fn from(m: Data) -> Msg {
        Msg::Data(m)
    }
}

impl From<AudioFrame> for Msg {
    fn from(m: AudioFrame) -> Msg {
        Msg::AudioFrame(m)
    }
}

impl From<VideoFrame> for Msg {
    fn from(m: VideoFrame) -> Msg {
        Msg::VideoFrame(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_prefix_is_rejected_for_user_messages() {
        assert!(Cmd::create("weft:do_it").is_err());
        assert!(Data::create("weft:bytes").is_err());
        assert!(Cmd::create("do_it").is_ok());
    }

    #[test]
    fn set_property_creates_nested_objects() {
        let mut msg: Msg = Cmd::create("demo").unwrap().into();
        msg.set_property("a.b", Value::from(5i64)).unwrap();
        assert_eq!(msg.get_property("a.b"), Some(Value::Int64(5)));
        assert_eq!(msg.get_property("a.missing"), None);
    }

    #[test]
    fn set_property_from_json_single_failure_path() {
        let mut msg: Msg = Data::create("d").unwrap().into();
        assert!(msg.set_property_from_json("k", "not json").is_err());
        assert_eq!(msg.get_property("k"), None);

        msg.set_property_from_json("k", r#"{"x":1}"#).unwrap();
        assert_eq!(msg.get_property("k.x"), Some(Value::Uint64(1)));
    }

    #[test]
    fn clone_excluding_drops_only_named_keys() {
        let mut msg: Msg = Cmd::create("demo").unwrap().into();
        msg.set_property("keep", Value::from(1i64)).unwrap();
        msg.set_property("drop", Value::from(2i64)).unwrap();

        let cloned = msg.clone_excluding(&["drop"]);
        assert_eq!(cloned.get_property("keep"), Some(Value::Int64(1)));
        assert_eq!(cloned.get_property("drop"), None);
        // The original is untouched.
        assert_eq!(msg.get_property("drop"), Some(Value::Int64(2)));
    }

    #[test]
    fn set_dests_replaces_atomically() {
        let mut msg: Msg = Cmd::create("demo").unwrap().into();
        msg.add_dest(Loc::extension("a"));
        msg.set_dests(vec![Loc::extension("b"), Loc::extension("c")]);
        assert_eq!(msg.dests().len(), 2);
        assert_eq!(msg.dests()[0].extension, "b");
    }
}
