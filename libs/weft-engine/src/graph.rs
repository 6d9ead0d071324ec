//! Message routing inside one graph.
//!
//! The router maps extension locations to their runloops and posts
//! deliveries as tasks, so per-pair ordering follows from the single
//! mailbox. Multi-destination messages fan out as clones, one per
//! destination; resolution is all-or-nothing: when any destination is
//! unknown nothing is delivered and the send fails with
//! `MsgNotConnected`.

use std::collections::HashMap;
use std::sync::RwLock;

use weft_api::error::Error;
use weft_api::msg::{Loc, Msg};

use crate::extension::{ExtensionSlot, deliver_msg};
use crate::runloop::Runloop;

struct Route {
    loc: Loc,
    runloop: Runloop<ExtensionSlot>,
}

pub struct GraphRouter {
    app_uri: String,
    graph_id: String,
    /// Keyed by extension name; names are unique within a graph.
    routes: RwLock<HashMap<String, Route>>,
}

impl GraphRouter {
    pub(crate) fn new(app_uri: impl Into<String>, graph_id: impl Into<String>) -> GraphRouter {
        GraphRouter {
            app_uri: app_uri.into(),
            graph_id: graph_id.into(),
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn app_uri(&self) -> &str {
        &self.app_uri
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Route>> {
        match self.routes.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("graph route table read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Route>> {
        match self.routes.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("graph route table write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub(crate) fn register(
        &self,
        loc: Loc,
        runloop: Runloop<ExtensionSlot>,
    ) -> Result<(), Error> {
        let name = loc.extension.clone();
        let mut routes = self.write();
        if routes.contains_key(&name) {
            return Err(Error::invalid_argument(format!(
                "extension '{name}' is already registered in graph '{}'",
                self.graph_id
            )));
        }
        routes.insert(name, Route { loc, runloop });
        Ok(())
    }

    pub(crate) fn unregister(&self, extension: &str) {
        self.write().remove(extension);
    }

    pub fn extension_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn resolve(&self, dest: &Loc) -> Result<Runloop<ExtensionSlot>, Error> {
        if !dest.app_uri.is_empty() && dest.app_uri != self.app_uri {
            return Err(Error::msg_not_connected(format!(
                "no route to app '{}' (cross-app delivery needs a protocol adapter)",
                dest.app_uri
            )));
        }
        if !dest.graph_id.is_empty() && dest.graph_id != self.graph_id {
            return Err(Error::msg_not_connected(format!(
                "no route to graph '{}'",
                dest.graph_id
            )));
        }
        if dest.extension.is_empty() {
            return Err(Error::msg_not_connected("destination has no extension"));
        }

        let routes = self.read();
        let route = routes.get(&dest.extension).ok_or_else(|| {
            Error::msg_not_connected(format!("no route to extension '{}'", dest.extension))
        })?;
        if !dest.extension_group.is_empty() && dest.extension_group != route.loc.extension_group {
            return Err(Error::msg_not_connected(format!(
                "extension '{}' is not in group '{}'",
                dest.extension, dest.extension_group
            )));
        }
        Ok(route.runloop.clone())
    }

    /// Route `msg` to every destination in its header.
    pub(crate) fn route(&self, msg: Msg) -> Result<(), Error> {
        let dests = msg.dests().to_vec();
        if dests.is_empty() {
            return Err(Error::msg_not_connected(format!(
                "message '{}' has no destination",
                msg.name()
            )));
        }

        // Resolve everything up front so a miss delivers nothing.
        let mut targets = Vec::with_capacity(dests.len());
        for dest in &dests {
            targets.push(self.resolve(dest)?);
        }

        let total = targets.len();
        let mut remaining = Some(msg);
        for (i, (dest, target)) in dests.into_iter().zip(targets).enumerate() {
            // Fan-out: every destination but the last gets a clone.
            let mut copy = if i + 1 == total {
                remaining.take().expect("message still present for last dest")
            } else {
                remaining.as_ref().expect("message still present").clone()
            };
            copy.set_dests(vec![dest]);
            target
                .post(move |slot| deliver_msg(slot, copy))
                .map_err(|e| e.with_context("deliver"))?;
        }

        Ok(())
    }

    /// Deinit and cancel every registered extension runloop, clearing the
    /// table. Each runloop cancels itself right after the deinit callback
    /// so work already queued ahead of it still drains the normal way.
    pub(crate) fn close_all(&self) {
        let mut routes = self.write();
        for (_, route) in routes.drain() {
            let token = route.runloop.close_token();
            let posted = route.runloop.post(move |slot| {
                let ExtensionSlot { core, ext } = slot;
                ext.on_deinit(&mut crate::env::OwnerEnv::new(core));
                token.cancel();
            });
            if posted.is_err() {
                route.runloop.close();
            }
        }
    }
}
