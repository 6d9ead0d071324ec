pub mod error;
pub mod msg;
pub mod placeholder;
pub mod schema;
pub mod value;
pub mod wire;

pub use error::{Error, ErrorCode};
pub use msg::{Loc, Msg, MsgType};
pub use schema::Schema;
pub use value::{Buf, OpaqueHandle, Value, ValueType};
