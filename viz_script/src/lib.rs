//! Lua-scripted backend for `viz_marshal`.
//!
//! Each window owns a private Lua 5.1 state. Script variables are Lua
//! globals, `print` output is collected per window, and scripts can close
//! their own window with `CloseWindow()`.

mod backend;
mod convert;
mod error;
mod session;
mod window;

pub use backend::LuaBackend;
pub use error::ScriptError;
pub use session::LuaSession;
pub use window::WindowState;
