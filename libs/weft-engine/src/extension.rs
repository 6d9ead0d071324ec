//! Extension host.
//!
//! An extension is user code bound to one runloop. The host owns the
//! extension's config properties, its schema store, its pending command
//! paths and the not-connected counter, and converges every outbound
//! message through one send function: invariant checks, cmd-id
//! assignment, egress schema, then routing. Inbound messages run the
//! ingress schema and placeholder resolution before the callback fires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use weft_api::error::{Error, ErrorCode};
use weft_api::msg::{AudioFrame, Cmd, CmdResult, Data, Loc, Msg, StatusCode, VideoFrame};
use weft_api::placeholder;
use weft_api::value::Value;

use crate::env::OwnerEnv;
use crate::graph::GraphRouter;
use crate::path_table::{PathTable, PathTimeouts, ResultReturn};
use crate::schema_store::{MsgDirection, SchemaStore, top_level_key};

/// User component. Callbacks run on the extension's runloop and get an
/// inline [`OwnerEnv`]; off-thread interaction goes through the async
/// `EnvHandle` instead.
pub trait Extension: Send + 'static {
    fn on_init(&mut self, _env: &mut OwnerEnv<'_>) {}

    /// Default: answer with an OK result so the command path resolves.
    fn on_cmd(&mut self, env: &mut OwnerEnv<'_>, cmd: Cmd) {
        let result = CmdResult::from_cmd(&cmd, StatusCode::Ok);
        if let Err(e) = env.return_result(result) {
            tracing::warn!(cmd = %cmd.header.name, error = %e, "default result failed");
        }
    }

    fn on_data(&mut self, _env: &mut OwnerEnv<'_>, _data: Data) {}

    fn on_audio_frame(&mut self, _env: &mut OwnerEnv<'_>, _frame: AudioFrame) {}

    fn on_video_frame(&mut self, _env: &mut OwnerEnv<'_>, _frame: VideoFrame) {}

    fn on_deinit(&mut self, _env: &mut OwnerEnv<'_>) {}
}

/// Per-msg-name miss counter behind the "not-connected" warning
/// throttle: a warning fires only when a name's count reaches a multiple
/// of the threshold.
#[derive(Default)]
pub struct NotConnectedCounter {
    counts: HashMap<String, u64>,
}

const NOT_CONNECTED_WARN_THRESHOLD: u64 = 1000;

impl NotConnectedCounter {
    /// Count one miss for `msg_name`; true when this miss should be
    /// logged.
    pub fn increment(&mut self, msg_name: &str) -> bool {
        let count = self.counts.entry(msg_name.to_string()).or_insert(0);
        *count += 1;
        *count % NOT_CONNECTED_WARN_THRESHOLD == 0
    }

    pub fn count(&self, msg_name: &str) -> u64 {
        self.counts.get(msg_name).copied().unwrap_or(0)
    }
}

pub(crate) struct ExtensionCore {
    pub loc: Loc,
    pub properties: Value,
    pub schema_store: SchemaStore,
    pub path_table: PathTable,
    pub timeouts: PathTimeouts,
    pub not_connected: NotConnectedCounter,
    pub router: Arc<GraphRouter>,
}

pub struct ExtensionSlot {
    pub(crate) core: ExtensionCore,
    pub(crate) ext: Box<dyn Extension>,
}

impl ExtensionCore {
    pub(crate) fn new(
        loc: Loc,
        properties: Value,
        schema_store: SchemaStore,
        timeouts: PathTimeouts,
        router: Arc<GraphRouter>,
    ) -> ExtensionCore {
        ExtensionCore {
            loc,
            properties,
            schema_store,
            path_table: PathTable::default(),
            timeouts,
            not_connected: NotConnectedCounter::default(),
            router,
        }
    }

    // -- send path ---------------------------------------------------------

    pub(crate) fn send_msg(&mut self, msg: Msg) -> Result<(), Error> {
        self.send_msg_internal(msg, None)
    }

    /// Send a command whose terminal (`is_completed`) result resolves the
    /// returned receiver; intermediate results are absorbed.
    pub(crate) fn send_cmd(&mut self, cmd: Cmd) -> Result<oneshot::Receiver<CmdResult>, Error> {
        let (tx, rx) = oneshot::channel();
        self.send_msg_internal(Msg::Cmd(cmd), Some(ResultReturn::OneShot(Some(tx))))?;
        Ok(rx)
    }

    /// Send a command and receive every result with a matching `cmd_id`;
    /// the caller inspects `is_final`/`is_completed` itself.
    pub(crate) fn send_cmd_ex(
        &mut self,
        cmd: Cmd,
    ) -> Result<mpsc::UnboundedReceiver<CmdResult>, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send_msg_internal(Msg::Cmd(cmd), Some(ResultReturn::Stream(tx)))?;
        Ok(rx)
    }

    /// All outbound paths converge here.
    fn send_msg_internal(
        &mut self,
        msg: Msg,
        return_to: Option<ResultReturn>,
    ) -> Result<(), Error> {
        let msg_name = msg.name().to_string();
        let outcome = self.try_send(msg, return_to);

        if let Err(e) = &outcome {
            // A missing downstream is throttled per msg name; every other
            // send failure logs each time.
            if e.code() == ErrorCode::MsgNotConnected {
                if self.not_connected.increment(&msg_name) {
                    tracing::warn!(
                        extension = %self.loc.extension,
                        msg = %msg_name,
                        error = %e,
                        "failed to send message"
                    );
                }
            } else {
                tracing::error!(
                    extension = %self.loc.extension,
                    msg = %msg_name,
                    error = %e,
                    "failed to send message"
                );
            }
        }

        outcome
    }

    fn try_send(&mut self, mut msg: Msg, return_to: Option<ResultReturn>) -> Result<(), Error> {
        if matches!(msg, Msg::CmdResult(_)) {
            // The only way to answer a command is the result pathway.
            return Err(Error::generic(
                "result commands are delivered through returning, not send",
            ));
        }
        if msg.has_locked_res() {
            return Err(Error::generic(
                "locked resources are not allowed in messages sent from an extension",
            ));
        }

        // Commands carry the correlation machinery: the id is assigned
        // here at the latest, and the pending path is registered before
        // dispatch so an early result cannot race past it.
        let mut registered_cmd_id = None;
        if let Msg::Cmd(cmd) = &mut msg {
            cmd.ensure_cmd_id();
            let result_schema = self
                .schema_store
                .msg_schema(cmd.msg_type(), &cmd.header.name, MsgDirection::Out)
                .and_then(|s| s.result.clone());
            self.path_table.add_out_path(
                &cmd.cmd_id,
                &cmd.header.name,
                return_to.unwrap_or(ResultReturn::OneShot(None)),
                result_schema,
                &self.timeouts,
            );
            registered_cmd_id = Some(cmd.cmd_id.clone());
        }

        msg.set_src(self.loc.clone());

        let routed = self
            .schema_store
            .adjust_and_validate_msg(&mut msg, MsgDirection::Out)
            .and_then(|()| self.router.route(msg));

        if routed.is_err() {
            // Dispatch failed: the pending path must not leak.
            if let Some(cmd_id) = registered_cmd_id {
                self.path_table.remove_out_path(&cmd_id);
            }
        }

        routed
    }

    /// Answer an inbound command. The result is validated against the
    /// command's declared reply schema and routed back to the source;
    /// the in-path is removed once the terminal result is returned.
    pub(crate) fn return_result(&mut self, mut result: CmdResult) -> Result<(), Error> {
        if result.cmd_id.is_empty() {
            return Err(Error::invalid_argument("result has no cmd_id"));
        }

        let Some(in_path) = self.path_table.in_path(&result.cmd_id) else {
            return Err(Error::generic(format!(
                "no pending command for result '{}'",
                result.cmd_id
            )));
        };
        let src = in_path.src.clone();
        let schema = in_path.result_schema.clone();

        if let Some(schema) = schema {
            schema
                .adjust(&mut result.header.properties)
                .and_then(|()| schema.validate(&result.header.properties))
                .map_err(|e| e.with_context("result"))?;
        }

        if result.is_completed {
            self.path_table.remove_in_path(&result.cmd_id);
        }

        result.header.src = self.loc.clone();
        result.header.dests = vec![src];
        self.router.route(Msg::CmdResult(result))
    }

    // -- properties --------------------------------------------------------

    pub(crate) fn get_property(&self, path: &str) -> Result<Value, Error> {
        Ok(self.properties.peek_from_path(path)?.clone())
    }

    /// Set a property, running the per-key schema adjust+validate. On
    /// failure the previous value is restored; nothing is partially
    /// applied.
    pub(crate) fn set_property(&mut self, path: &str, value: Value) -> Result<(), Error> {
        let key = top_level_key(path)?;
        let previous = self.properties.object_peek(&key).cloned();

        self.properties.set_from_path(path, value)?;

        let adjusted = {
            let slot = self
                .properties
                .object_peek_mut(&key)
                .expect("key just written");
            self.schema_store
                .adjust_property_kv(&key, slot)
                .and_then(|()| self.schema_store.validate_property_kv(&key, slot))
        };

        if let Err(e) = adjusted {
            match previous {
                Some(old) => {
                    let _ = self.properties.object_move(key, old);
                }
                None => {
                    if let Some(kv) = self.properties.as_object_mut() {
                        kv.retain(|(k, _)| *k != key);
                    }
                }
            }
            return Err(e);
        }
        Ok(())
    }

    // -- housekeeping ------------------------------------------------------

    pub(crate) fn sweep_paths(&mut self) {
        let (expired_out, expired_in) = self.path_table.sweep(Instant::now());
        for expired in expired_out {
            tracing::warn!(
                extension = %self.loc.extension,
                cmd = %expired.cmd_name,
                cmd_id = %expired.cmd_id,
                "out path timed out"
            );
            expired.notify();
        }
        for cmd_name in expired_in {
            tracing::warn!(
                extension = %self.loc.extension,
                cmd = %cmd_name,
                "in path timed out before a result was returned"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound delivery: runs as a task posted on the extension's runloop
// ---------------------------------------------------------------------------

pub(crate) fn deliver_msg(slot: &mut ExtensionSlot, msg: Msg) {
    match msg {
        Msg::CmdResult(result) => deliver_result(&mut slot.core, result),
        other => deliver_inbound(slot, other),
    }
}

/// Correlate a result with its pending out-path, validating the reply
/// tree against the `cmd_out` declaration first.
fn deliver_result(core: &mut ExtensionCore, mut result: CmdResult) {
    if let Some(schema) = core.path_table.out_path_result_schema(&result.cmd_id) {
        let checked = schema
            .adjust(&mut result.header.properties)
            .and_then(|()| schema.validate(&result.header.properties));
        if let Err(e) = checked {
            tracing::error!(
                extension = %core.loc.extension,
                cmd_id = %result.cmd_id,
                error = %e,
                "result failed reply schema, substituting error result"
            );
            result = CmdResult::error(
                result.cmd_id.clone(),
                format!("result validation failed: {e}"),
            );
        }
    }

    if !core.path_table.dispatch_result(result) {
        tracing::debug!(
            extension = %core.loc.extension,
            "dropping result with no pending path"
        );
    }
}

fn deliver_inbound(slot: &mut ExtensionSlot, mut msg: Msg) {
    let ExtensionSlot { core, ext } = slot;

    // Ingress: schema adjust+validate, then placeholder expansion over
    // the adjusted property tree.
    let prepared = core
        .schema_store
        .adjust_and_validate_msg(&mut msg, MsgDirection::In)
        .and_then(|()| placeholder::resolve_tree(msg.properties_mut()));

    if let Err(e) = prepared {
        match msg {
            Msg::Cmd(cmd) => {
                tracing::warn!(
                    extension = %core.loc.extension,
                    cmd = %cmd.header.name,
                    error = %e,
                    "inbound command failed ingress schema"
                );
                let mut result =
                    CmdResult::error(cmd.cmd_id.clone(), format!("ingress schema: {e}"));
                result.header.src = core.loc.clone();
                result.header.dests = vec![cmd.header.src.clone()];
                let _ = core.router.route(Msg::CmdResult(result));
            }
            other => {
                tracing::warn!(
                    extension = %core.loc.extension,
                    msg = %other.name(),
                    error = %e,
                    "dropping inbound message failing ingress schema"
                );
            }
        }
        return;
    }

    match msg {
        Msg::Cmd(cmd) => {
            let result_schema = core
                .schema_store
                .msg_schema(cmd.msg_type(), &cmd.header.name, MsgDirection::In)
                .and_then(|s| s.result.clone());
            core.path_table.add_in_path(
                &cmd.cmd_id,
                &cmd.header.name,
                cmd.header.src.clone(),
                result_schema,
                &core.timeouts,
            );
            ext.on_cmd(&mut OwnerEnv::new(core), cmd);
        }
        Msg::Data(data) => ext.on_data(&mut OwnerEnv::new(core), data),
        Msg::AudioFrame(frame) => ext.on_audio_frame(&mut OwnerEnv::new(core), frame),
        Msg::VideoFrame(frame) => ext.on_video_frame(&mut OwnerEnv::new(core), frame),
        Msg::CmdResult(_) => unreachable!("results are handled by deliver_result"),
    }
}
