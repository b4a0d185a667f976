//! Cross-thread call marshalling for a single-threaded visualization engine.
//!
//! Windows, script engines, and the native event loop all live on one
//! dedicated owner thread. Any number of client threads drive them through
//! [`Engine`]: each call is packed into an envelope, handed to the owner
//! thread through a single-slot channel, executed there, and the result is
//! routed back to the caller. Calls are serialised and bounded by an optional
//! timeout.
//!
//! The actual windows are supplied by a [`Backend`] implementation.

mod channel;
mod config;
mod dispatch;
mod engine;
mod envelope;
mod error;
mod handle;
mod owner;
mod session;
mod value;

pub use config::{ConfigError, EngineConfig, DEFAULT_STARTUP_TIMEOUT_MS};
pub use engine::Engine;
pub use envelope::{
    CreateParams, FullScreenMode, Operation, OperationKind, Reply, ScriptOutput, ScriptSource,
    WindowGeometry, WindowStyle,
};
pub use error::{EngineError, LastError, SessionError, TIMEOUT_MESSAGE};
pub use handle::Handle;
pub use owner::OwnerState;
pub use session::{Backend, EngineEnv, EventPump, IdlePump, PumpStatus, Session};
pub use value::{
    Image, ImageDataType, ImageFormat, PayloadError, Primitive, Rgba, Tensor, TensorShape, Value,
    ValueKind, VertexBuffer,
};
