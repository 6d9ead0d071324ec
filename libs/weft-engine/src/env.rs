//! Environment handles.
//!
//! [`OwnerEnv`] is the inline view an extension callback receives: it runs
//! on the owner's runloop, so every operation executes directly against
//! the extension state. [`EnvHandle`] is the cross-thread capability
//! object: it is call-safe from any thread because each operation posts a
//! task to the owner's runloop (with a oneshot reply for the synchronous
//! flavour). After the owner starts closing every operation fails with
//! `Closed`; that outcome is the caller's to handle and is not logged.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use weft_api::error::Error;
use weft_api::msg::{Cmd, CmdResult, Loc, Msg};
use weft_api::value::Value;

use crate::app::{AppState, EngineState, GroupState};
use crate::extension::{ExtensionCore, ExtensionSlot};
use crate::graph::GraphRouter;
use crate::runloop::Runloop;

/// What an env handle is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    App,
    Engine,
    ExtensionGroup,
    Extension,
}

// ---------------------------------------------------------------------------
// OwnerEnv: the inline, on-runloop view
// ---------------------------------------------------------------------------

pub struct OwnerEnv<'a> {
    core: &'a mut ExtensionCore,
}

impl<'a> OwnerEnv<'a> {
    pub(crate) fn new(core: &'a mut ExtensionCore) -> OwnerEnv<'a> {
        OwnerEnv { core }
    }

    pub fn loc(&self) -> &Loc {
        &self.core.loc
    }

    pub fn send_msg(&mut self, msg: impl Into<Msg>) -> Result<(), Error> {
        self.core.send_msg(msg.into())
    }

    /// Send a command; the receiver resolves on the terminal
    /// (`is_completed`) result, intermediate results are absorbed.
    pub fn send_cmd(&mut self, cmd: Cmd) -> Result<oneshot::Receiver<CmdResult>, Error> {
        self.core.send_cmd(cmd)
    }

    /// Send a command and stream every result with a matching `cmd_id`.
    pub fn send_cmd_ex(&mut self, cmd: Cmd) -> Result<mpsc::UnboundedReceiver<CmdResult>, Error> {
        self.core.send_cmd_ex(cmd)
    }

    /// Answer an inbound command.
    pub fn return_result(&mut self, result: CmdResult) -> Result<(), Error> {
        self.core.return_result(result)
    }

    pub fn get_property(&self, path: &str) -> Result<Value, Error> {
        self.core.get_property(path)
    }

    pub fn set_property(&mut self, path: &str, value: Value) -> Result<(), Error> {
        self.core.set_property(path, value)
    }

    pub fn set_property_from_json(&mut self, path: &str, json: &str) -> Result<(), Error> {
        let value = Value::from_json_str(json)?;
        self.core.set_property(path, value)
    }

    pub fn get_property_to_json(&self, path: &str) -> Result<String, Error> {
        Ok(self.core.get_property(path)?.to_json_string())
    }
}

// ---------------------------------------------------------------------------
// EnvHandle: the async proxy, bound to one owner
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum EnvAttachment {
    Extension(Runloop<ExtensionSlot>),
    ExtensionGroup {
        runloop: Runloop<GroupState>,
        router: Arc<GraphRouter>,
    },
    Engine {
        runloop: Runloop<EngineState>,
        router: Arc<GraphRouter>,
    },
    App(Runloop<AppState>),
}

#[derive(Clone)]
pub struct EnvHandle {
    inner: EnvAttachment,
}

impl EnvHandle {
    pub(crate) fn for_extension(runloop: Runloop<ExtensionSlot>) -> EnvHandle {
        EnvHandle { inner: EnvAttachment::Extension(runloop) }
    }

    pub(crate) fn for_group(
        runloop: Runloop<GroupState>,
        router: Arc<GraphRouter>,
    ) -> EnvHandle {
        EnvHandle { inner: EnvAttachment::ExtensionGroup { runloop, router } }
    }

    pub(crate) fn for_engine(
        runloop: Runloop<EngineState>,
        router: Arc<GraphRouter>,
    ) -> EnvHandle {
        EnvHandle { inner: EnvAttachment::Engine { runloop, router } }
    }

    pub(crate) fn for_app(runloop: Runloop<AppState>) -> EnvHandle {
        EnvHandle { inner: EnvAttachment::App(runloop) }
    }

    pub fn attachment(&self) -> Attachment {
        match &self.inner {
            EnvAttachment::Extension(_) => Attachment::Extension,
            EnvAttachment::ExtensionGroup { .. } => Attachment::ExtensionGroup,
            EnvAttachment::Engine { .. } => Attachment::Engine,
            EnvAttachment::App(_) => Attachment::App,
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.inner {
            EnvAttachment::Extension(rl) => rl.is_closed(),
            EnvAttachment::ExtensionGroup { runloop, .. } => runloop.is_closed(),
            EnvAttachment::Engine { runloop, .. } => runloop.is_closed(),
            EnvAttachment::App(rl) => rl.is_closed(),
        }
    }

    // -- send --------------------------------------------------------------

    /// Dispatch a message into the containing scheduler.
    ///
    /// - extension: full egress (schemas, correlation, routing);
    /// - extension group: bypasses per-extension schemas, engine routing;
    /// - engine: engine routing;
    /// - app: the in-process admin router.
    pub async fn send_msg(&self, msg: impl Into<Msg>) -> Result<(), Error> {
        let msg = msg.into();
        match &self.inner {
            EnvAttachment::Extension(rl) => {
                rl.call(move |slot| slot.core.send_msg(msg)).await?
            }
            EnvAttachment::ExtensionGroup { runloop, router } => {
                let router = router.clone();
                runloop
                    .call(move |group| route_raw(&router, group.loc.clone(), msg))
                    .await?
            }
            EnvAttachment::Engine { runloop, router } => {
                let router = router.clone();
                runloop
                    .call(move |engine| route_raw(&router, engine.loc.clone(), msg))
                    .await?
            }
            EnvAttachment::App(rl) => rl.call(move |app| app.dispatch_admin(msg)).await?,
        }
    }

    /// Send a command from an extension env; resolves on the terminal
    /// result. Correlation state lives in the extension, so the other
    /// attachments cannot use this flavour.
    pub async fn send_cmd(&self, cmd: Cmd) -> Result<oneshot::Receiver<CmdResult>, Error> {
        match &self.inner {
            EnvAttachment::Extension(rl) => rl.call(move |slot| slot.core.send_cmd(cmd)).await?,
            _ => Err(Error::invalid_argument(
                "send_cmd needs an extension env (results correlate per extension)",
            )),
        }
    }

    pub async fn send_cmd_ex(
        &self,
        cmd: Cmd,
    ) -> Result<mpsc::UnboundedReceiver<CmdResult>, Error> {
        match &self.inner {
            EnvAttachment::Extension(rl) => {
                rl.call(move |slot| slot.core.send_cmd_ex(cmd)).await?
            }
            _ => Err(Error::invalid_argument(
                "send_cmd_ex needs an extension env (results correlate per extension)",
            )),
        }
    }

    // -- properties --------------------------------------------------------

    pub async fn get_property(&self, path: &str) -> Result<Value, Error> {
        let path = path.to_string();
        match &self.inner {
            EnvAttachment::Extension(rl) => {
                rl.call(move |slot| slot.core.get_property(&path)).await?
            }
            EnvAttachment::ExtensionGroup { runloop, .. } => {
                runloop
                    .call(move |group| group.properties.peek_from_path(&path).map(Value::clone))
                    .await?
            }
            EnvAttachment::Engine { runloop, .. } => {
                runloop
                    .call(move |engine| engine.properties.peek_from_path(&path).map(Value::clone))
                    .await?
            }
            EnvAttachment::App(rl) => {
                rl.call(move |app| app.properties.peek_from_path(&path).map(Value::clone))
                    .await?
            }
        }
    }

    pub async fn set_property(&self, path: &str, value: Value) -> Result<(), Error> {
        let path = path.to_string();
        match &self.inner {
            EnvAttachment::Extension(rl) => {
                rl.call(move |slot| slot.core.set_property(&path, value)).await?
            }
            EnvAttachment::ExtensionGroup { runloop, .. } => {
                runloop
                    .call(move |group| group.properties.set_from_path(&path, value))
                    .await?
            }
            EnvAttachment::Engine { runloop, .. } => {
                runloop
                    .call(move |engine| engine.properties.set_from_path(&path, value))
                    .await?
            }
            EnvAttachment::App(rl) => {
                rl.call(move |app| app.properties.set_from_path(&path, value)).await?
            }
        }
    }

    pub async fn set_property_from_json(&self, path: &str, json: &str) -> Result<(), Error> {
        let value = Value::from_json_str(json)?;
        self.set_property(path, value).await
    }

    /// Async flavour: the callback fires on the owner's runloop with the
    /// value or the error record.
    pub fn get_property_async(
        &self,
        path: &str,
        callback: impl FnOnce(Result<Value, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        let path = path.to_string();
        match &self.inner {
            EnvAttachment::Extension(rl) => {
                rl.post(move |slot| callback(slot.core.get_property(&path)))
            }
            EnvAttachment::ExtensionGroup { runloop, .. } => runloop.post(move |group| {
                callback(group.properties.peek_from_path(&path).map(Value::clone))
            }),
            EnvAttachment::Engine { runloop, .. } => runloop.post(move |engine| {
                callback(engine.properties.peek_from_path(&path).map(Value::clone))
            }),
            EnvAttachment::App(rl) => {
                rl.post(move |app| callback(app.properties.peek_from_path(&path).map(Value::clone)))
            }
        }
    }

    pub fn set_property_async(
        &self,
        path: &str,
        value: Value,
        callback: impl FnOnce(Result<(), Error>) + Send + 'static,
    ) -> Result<(), Error> {
        let path = path.to_string();
        match &self.inner {
            EnvAttachment::Extension(rl) => {
                rl.post(move |slot| callback(slot.core.set_property(&path, value)))
            }
            EnvAttachment::ExtensionGroup { runloop, .. } => runloop.post(move |group| {
                callback(group.properties.set_from_path(&path, value))
            }),
            EnvAttachment::Engine { runloop, .. } => runloop.post(move |engine| {
                callback(engine.properties.set_from_path(&path, value))
            }),
            EnvAttachment::App(rl) => {
                rl.post(move |app| callback(app.properties.set_from_path(&path, value)))
            }
        }
    }
}

/// Group/engine dispatch: stamp the owner as source, make sure commands
/// carry an id, and hand straight to the router; per-extension schemas
/// do not apply.
fn route_raw(router: &GraphRouter, src: Loc, mut msg: Msg) -> Result<(), Error> {
    if matches!(msg, Msg::CmdResult(_)) {
        return Err(Error::generic(
            "result commands are delivered through returning, not send",
        ));
    }
    if msg.has_locked_res() {
        return Err(Error::generic("locked resources are not allowed in sent messages"));
    }
    if let Msg::Cmd(cmd) = &mut msg {
        cmd.ensure_cmd_id();
    }
    msg.set_src(src);
    router.route(msg)
}
