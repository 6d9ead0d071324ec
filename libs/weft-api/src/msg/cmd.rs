//! Command and command-result messages.
//!
//! Commands are the only correlated messages: each carries a `cmd_id`
//! (synthesized at send time when absent) and results flow back under the
//! same id. A result sequence may stream intermediate results
//! (`is_final = false`) and always ends with a terminal result
//! (`is_completed = true`, which forces `is_final = true`).

use crate::error::Error;
use crate::msg::{MsgHeader, MsgType, check_msg_name};
use crate::value::Value;

/// Framework commands ride the same correlation machinery as custom
/// commands; the kind decides the message type and the reserved name.
#[derive(Debug, Clone, PartialEq)]
pub enum CmdKind {
    Custom,
    StartGraph {
        graph_json: String,
        long_running_mode: bool,
    },
    StopGraph {
        graph_id: String,
    },
    Timer {
        timer_id: u32,
        timeout_us: u64,
        times: i32,
    },
    CloseApp,
}

#[derive(Debug, Clone)]
pub struct Cmd {
    pub header: MsgHeader,
    /// Empty until assigned; the send path fills in a fresh UUID.
    pub cmd_id: String,
    pub kind: CmdKind,
}

impl Cmd {
    /// Custom command with a validated (non-reserved) name.
    pub fn create(name: &str) -> Result<Cmd, Error> {
        check_msg_name(name)?;
        Ok(Cmd {
            header: MsgHeader::new(name),
            cmd_id: String::new(),
            kind: CmdKind::Custom,
        })
    }

    pub fn create_empty() -> Cmd {
        Cmd {
            header: MsgHeader::new(""),
            cmd_id: String::new(),
            kind: CmdKind::Custom,
        }
    }

    pub fn start_graph(graph_json: impl Into<String>, long_running_mode: bool) -> Cmd {
        Cmd {
            header: MsgHeader::new("weft:start_graph"),
            cmd_id: String::new(),
            kind: CmdKind::StartGraph { graph_json: graph_json.into(), long_running_mode },
        }
    }

    pub fn stop_graph(graph_id: impl Into<String>) -> Cmd {
        Cmd {
            header: MsgHeader::new("weft:stop_graph"),
            cmd_id: String::new(),
            kind: CmdKind::StopGraph { graph_id: graph_id.into() },
        }
    }

    pub fn timer(timer_id: u32, timeout_us: u64, times: i32) -> Cmd {
        Cmd {
            header: MsgHeader::new("weft:timer"),
            cmd_id: String::new(),
            kind: CmdKind::Timer { timer_id, timeout_us, times },
        }
    }

    pub fn close_app() -> Cmd {
        Cmd {
            header: MsgHeader::new("weft:close_app"),
            cmd_id: String::new(),
            kind: CmdKind::CloseApp,
        }
    }

    pub fn msg_type(&self) -> MsgType {
        match self.kind {
            CmdKind::Custom => MsgType::Cmd,
            CmdKind::StartGraph { .. } => MsgType::CmdStartGraph,
            CmdKind::StopGraph { .. } => MsgType::CmdStopGraph,
            CmdKind::Timer { .. } => MsgType::CmdTimer,
            CmdKind::CloseApp => MsgType::CmdCloseApp,
        }
    }

    /// Assign a fresh UUID when no `cmd_id` is present yet; returns the
    /// effective id.
    pub fn ensure_cmd_id(&mut self) -> &str {
        if self.cmd_id.is_empty() {
            self.cmd_id = uuid::Uuid::new_v4().to_string();
        }
        &self.cmd_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Error,
    /// User-defined codes ride the same u32 space.
    Custom(u32),
}

impl StatusCode {
    pub fn as_u32(self) -> u32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Error => 1,
            StatusCode::Custom(v) => v,
        }
    }

    pub fn from_u32(v: u32) -> StatusCode {
        match v {
            0 => StatusCode::Ok,
            1 => StatusCode::Error,
            v => StatusCode::Custom(v),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CmdResult {
    pub header: MsgHeader,
    /// Correlates to the originating command.
    pub cmd_id: String,
    pub status_code: StatusCode,
    /// Marks the last partial result of a streamed sequence.
    pub is_final: bool,
    /// Marks the terminal result; implies `is_final`.
    pub is_completed: bool,
}

impl CmdResult {
    /// Terminal result for `cmd`, addressed back to its source.
    pub fn from_cmd(cmd: &Cmd, status_code: StatusCode) -> CmdResult {
        let mut header = MsgHeader::new(cmd.header.name.clone());
        header.dests = vec![cmd.header.src.clone()];
        CmdResult {
            header,
            cmd_id: cmd.cmd_id.clone(),
            status_code,
            is_final: true,
            is_completed: true,
        }
    }

    /// Intermediate (streamed) result; the sequence must later be closed
    /// by a terminal result.
    pub fn continued_from_cmd(cmd: &Cmd, status_code: StatusCode) -> CmdResult {
        let mut result = CmdResult::from_cmd(cmd, status_code);
        result.is_final = false;
        result.is_completed = false;
        result
    }

    pub fn error(cmd_id: impl Into<String>, detail: impl Into<String>) -> CmdResult {
        let mut header = MsgHeader::new("");
        let _ = header.properties.object_move("detail", Value::from(detail.into()));
        CmdResult {
            header,
            cmd_id: cmd_id.into(),
            status_code: StatusCode::Error,
            is_final: true,
            is_completed: true,
        }
    }

    /// A terminal result always has `is_final = true`.
    pub fn set_completed(&mut self) {
        self.is_completed = true;
        self.is_final = true;
    }
}
