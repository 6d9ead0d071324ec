//! App / engine / extension-group containers.
//!
//! Each container owns one runloop. The app is the process root: it
//! creates engines (one per running graph) and answers the in-process
//! admin commands (`weft:close_app`, `weft:stop_graph`, …). An engine
//! owns the graph router and the extensions registered into it; an
//! extension group is the organizational slice an extension is placed in.
//! Closing cascades top-down and cancels every runloop, so in-flight env
//! operations resolve with `Closed`.

use std::collections::HashMap;
use std::sync::Arc;

use weft_api::error::Error;
use weft_api::msg::{CmdKind, Loc, Msg};
use weft_api::placeholder;
use weft_api::value::Value;

use crate::env::EnvHandle;
use crate::error::EngineError;
use crate::extension::{Extension, ExtensionCore, ExtensionSlot};
use crate::graph::GraphRouter;
use crate::path_table::PathTimeouts;
use crate::runloop::Runloop;
use crate::schema_store::SchemaStore;

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub(crate) struct AppState {
    pub uri: String,
    pub properties: Value,
    pub engines: HashMap<String, Engine>,
    /// The app's own close token, so `weft:close_app` can cancel the
    /// runloop it is handled on.
    close_token: Option<tokio_util::sync::CancellationToken>,
}

impl AppState {
    /// In-process admin router: the app handles framework commands and
    /// nothing else; ordinary traffic never goes through the app env.
    pub(crate) fn dispatch_admin(&mut self, msg: Msg) -> Result<(), Error> {
        let Msg::Cmd(cmd) = msg else {
            return Err(Error::msg_not_connected(
                "the app only routes framework commands",
            ));
        };

        match &cmd.kind {
            CmdKind::CloseApp => {
                tracing::info!(app = %self.uri, "closing app");
                for (_, engine) in self.engines.drain() {
                    engine.shutdown();
                }
                if let Some(token) = &self.close_token {
                    token.cancel();
                }
                Ok(())
            }
            CmdKind::StopGraph { graph_id } => match self.engines.remove(graph_id) {
                Some(engine) => {
                    tracing::info!(app = %self.uri, graph = %graph_id, "stopping graph");
                    engine.shutdown();
                    Ok(())
                }
                None => Err(Error::invalid_argument(format!(
                    "graph '{graph_id}' is not running"
                ))),
            },
            CmdKind::StartGraph { graph_json, .. } => {
                let def = Value::from_json_str(graph_json)?;
                let graph_id = def
                    .object_peek("graph_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        Error::invalid_argument("start_graph definition has no 'graph_id'")
                    })?
                    .to_string();
                if self.engines.contains_key(&graph_id) {
                    return Err(Error::invalid_argument(format!(
                        "graph '{graph_id}' is already running"
                    )));
                }
                let engine = Engine::spawn(&self.uri, &graph_id);
                tracing::info!(app = %self.uri, graph = %graph_id, "started graph");
                self.engines.insert(graph_id, engine);
                Ok(())
            }
            CmdKind::Custom | CmdKind::Timer { .. } => Err(Error::msg_not_connected(format!(
                "no in-process route for command '{}'",
                cmd.header.name
            ))),
        }
    }
}

pub struct App {
    uri: String,
    runloop: Runloop<AppState>,
}

impl App {
    pub fn new(uri: impl Into<String>) -> App {
        let uri = uri.into();
        let state = AppState {
            uri: uri.clone(),
            properties: Value::empty_object(),
            engines: HashMap::new(),
            close_token: None,
        };
        let runloop = Runloop::spawn(format!("app:{uri}"), state);
        let token = runloop.close_token();
        let _ = runloop.post(move |app| app.close_token = Some(token));
        App { uri, runloop }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn env(&self) -> EnvHandle {
        EnvHandle::for_app(self.runloop.clone())
    }

    /// Create and register an engine for `graph_id`.
    pub async fn start_graph(&self, graph_id: &str) -> Result<Engine, EngineError> {
        let graph_id = graph_id.to_string();
        let uri = self.uri.clone();
        self.runloop
            .call(move |app| {
                if app.engines.contains_key(&graph_id) {
                    return Err(EngineError::Config(format!(
                        "graph '{graph_id}' is already running"
                    )));
                }
                let engine = Engine::spawn(&uri, &graph_id);
                app.engines.insert(graph_id, engine.clone());
                Ok(engine)
            })
            .await
            .map_err(EngineError::Api)?
    }

    pub async fn stop_graph(&self, graph_id: &str) -> Result<(), EngineError> {
        let graph_id = graph_id.to_string();
        self.runloop
            .call(move |app| match app.engines.remove(&graph_id) {
                Some(engine) => {
                    engine.shutdown();
                    Ok(())
                }
                None => Err(EngineError::GraphNotFound(graph_id.clone())),
            })
            .await
            .map_err(EngineError::Api)?
    }

    /// Close the app and everything below it. Pending env operations
    /// resolve with `Closed`.
    pub async fn close(&self) {
        let _ = self
            .runloop
            .call(|app| {
                for (_, engine) in app.engines.drain() {
                    engine.shutdown();
                }
            })
            .await;
        self.runloop.close();
    }
}

// ---------------------------------------------------------------------------
// Engine: one running graph
// ---------------------------------------------------------------------------

pub(crate) struct EngineState {
    pub loc: Loc,
    pub properties: Value,
    pub groups: HashMap<String, ExtensionGroup>,
    pub extensions: Vec<Runloop<ExtensionSlot>>,
}

#[derive(Clone)]
pub struct Engine {
    app_uri: String,
    graph_id: String,
    runloop: Runloop<EngineState>,
    router: Arc<GraphRouter>,
}

impl Engine {
    fn spawn(app_uri: &str, graph_id: &str) -> Engine {
        let router = Arc::new(GraphRouter::new(app_uri, graph_id));
        let loc = Loc {
            app_uri: app_uri.to_string(),
            graph_id: graph_id.to_string(),
            ..Loc::default()
        };
        let state = EngineState {
            loc,
            properties: Value::empty_object(),
            groups: HashMap::new(),
            extensions: Vec::new(),
        };
        let runloop = Runloop::spawn(format!("engine:{graph_id}"), state);
        Engine {
            app_uri: app_uri.to_string(),
            graph_id: graph_id.to_string(),
            runloop,
            router,
        }
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn router(&self) -> &Arc<GraphRouter> {
        &self.router
    }

    pub fn env(&self) -> EnvHandle {
        EnvHandle::for_engine(self.runloop.clone(), self.router.clone())
    }

    /// Get or create an extension group; `add_extension` calls this on
    /// demand, registering one explicitly is optional.
    pub async fn add_extension_group(&self, name: &str) -> Result<ExtensionGroup, EngineError> {
        let name = name.to_string();
        let app_uri = self.app_uri.clone();
        let graph_id = self.graph_id.clone();
        let router = self.router.clone();
        self.runloop
            .call(move |engine| {
                engine
                    .groups
                    .entry(name.clone())
                    .or_insert_with(|| ExtensionGroup::spawn(&app_uri, &graph_id, &name, router))
                    .clone()
            })
            .await
            .map_err(EngineError::Api)
    }

    /// Create an extension, wire it into the graph and run its init
    /// callback.
    ///
    /// `api_def` is the manifest `api` object for the extension's schema
    /// store. Properties go through placeholder resolution, schema adjust
    /// and validation before the extension sees them.
    pub async fn add_extension(
        &self,
        group: &str,
        name: &str,
        ext: Box<dyn Extension>,
        mut properties: Value,
        api_def: Option<&Value>,
    ) -> Result<EnvHandle, EngineError> {
        let ctx = format!("extension '{name}'");

        let mut schema_store = SchemaStore::new();
        if let Some(api) = api_def {
            schema_store
                .set_schema_definition(api)
                .map_err(|e| EngineError::Api(e.with_context(&ctx)))?;
        }

        if !properties.is_object() {
            return Err(EngineError::Config(format!("{ctx}: properties must be an object")));
        }
        placeholder::resolve_tree(&mut properties)
            .map_err(|e| EngineError::Api(e.with_context(&ctx)))?;
        schema_store
            .adjust_properties(&mut properties)
            .and_then(|()| schema_store.validate_properties(&properties))
            .map_err(|e| EngineError::Api(e.with_context(&ctx)))?;

        let timeouts = PathTimeouts::from_properties(&properties);

        let loc = Loc {
            app_uri: self.app_uri.clone(),
            graph_id: self.graph_id.clone(),
            extension_group: group.to_string(),
            extension: name.to_string(),
        };

        let core = ExtensionCore::new(loc.clone(), properties, schema_store, timeouts, self.router.clone());
        let runloop = Runloop::spawn(format!("extension:{name}"), ExtensionSlot { core, ext });

        self.router
            .register(loc, runloop.clone())
            .map_err(|e| EngineError::Api(e.with_context(&ctx)))?;

        self.add_extension_group(group).await?;
        let registered = runloop.clone();
        self.runloop
            .call(move |engine| engine.extensions.push(registered))
            .await
            .map_err(EngineError::Api)?;

        // Init runs on the extension's own runloop.
        runloop
            .post(|slot| {
                let ExtensionSlot { core, ext } = slot;
                ext.on_init(&mut crate::env::OwnerEnv::new(core));
            })
            .map_err(EngineError::Api)?;

        spawn_path_sweeper(&runloop, timeouts);

        Ok(EnvHandle::for_extension(runloop))
    }

    /// Cancel every extension in the graph, then the engine itself. The
    /// engine loop cancels itself from the cleanup task so queued work
    /// ahead of it still drains the normal way.
    fn shutdown(&self) {
        self.router.close_all();
        let token = self.runloop.close_token();
        let posted = self.runloop.post(move |engine| {
            for (_, group) in engine.groups.drain() {
                group.shutdown();
            }
            for ext in engine.extensions.drain(..) {
                ext.close();
            }
            token.cancel();
        });
        if posted.is_err() {
            self.runloop.close();
        }
    }

    pub async fn close(&self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Extension group
// ---------------------------------------------------------------------------

pub(crate) struct GroupState {
    pub loc: Loc,
    pub properties: Value,
}

#[derive(Clone)]
pub struct ExtensionGroup {
    name: String,
    runloop: Runloop<GroupState>,
    router: Arc<GraphRouter>,
}

impl ExtensionGroup {
    fn spawn(
        app_uri: &str,
        graph_id: &str,
        name: &str,
        router: Arc<GraphRouter>,
    ) -> ExtensionGroup {
        let loc = Loc {
            app_uri: app_uri.to_string(),
            graph_id: graph_id.to_string(),
            extension_group: name.to_string(),
            ..Loc::default()
        };
        let state = GroupState { loc, properties: Value::empty_object() };
        let runloop = Runloop::spawn(format!("group:{name}"), state);
        ExtensionGroup { name: name.to_string(), runloop, router }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> EnvHandle {
        EnvHandle::for_group(self.runloop.clone(), self.router.clone())
    }

    fn shutdown(&self) {
        self.runloop.close();
    }
}

fn spawn_path_sweeper(runloop: &Runloop<ExtensionSlot>, timeouts: PathTimeouts) {
    let sweeper = runloop.clone();
    let token = runloop.close_token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timeouts.check_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if sweeper.post(|slot| slot.core.sweep_paths()).is_err() {
                        break;
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    });
}
