pub mod app;
pub mod env;
pub mod error;
pub mod extension;
pub mod graph;
pub mod path_table;
pub mod runloop;
pub mod schema_store;

pub use app::{App, Engine, ExtensionGroup};
pub use env::{Attachment, EnvHandle, OwnerEnv};
pub use error::EngineError;
pub use extension::{Extension, NotConnectedCounter};
pub use graph::GraphRouter;
pub use path_table::PathTimeouts;
pub use schema_store::{InterfaceResolver, MsgDirection, MsgSchema, SchemaStore};
