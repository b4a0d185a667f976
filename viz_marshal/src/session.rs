//! Contracts for the collaborators driven from the owner thread: the
//! window/session objects, the backend that builds them, and the native
//! event pump.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::envelope::{CreateParams, FullScreenMode, ScriptOutput, ScriptSource, WindowGeometry};
use crate::error::SessionError;
use crate::value::{Value, ValueKind};

/// Paths handed to the engine at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineEnv {
    pub env_root: PathBuf,
    pub module_path: PathBuf,
}

/// One window plus its script-engine binding.
///
/// Sessions are created and destroyed on the owner thread and never leave
/// it, so implementations are free to hold non-`Send` state.
pub trait Session {
    /// Releases the window. Called exactly once before the session is
    /// dropped.
    fn destroy(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn is_valid(&self) -> bool;

    fn show_window(&mut self) -> Result<(), SessionError>;

    fn hide_window(&mut self) -> Result<(), SessionError>;

    fn show_editor(&mut self) -> Result<(), SessionError> {
        Err(SessionError::new("this view has no script editor"))
    }

    fn hide_editor(&mut self) -> Result<(), SessionError> {
        Err(SessionError::new("this view has no script editor"))
    }

    fn set_window_geometry(&mut self, geometry: WindowGeometry) -> Result<(), SessionError>;

    fn set_script(&mut self, script: &str) -> Result<(), SessionError>;

    fn load_script(&mut self, source: &ScriptSource) -> Result<(), SessionError>;

    fn exec_tool(&mut self, tool: Option<&str>) -> Result<(), SessionError>;

    fn full_screen(&mut self, mode: FullScreenMode) -> Result<(), SessionError>;

    fn set_var(&mut self, name: &str, value: &Value) -> Result<(), SessionError>;

    fn get_var(&mut self, name: &str, kind: ValueKind) -> Result<Value, SessionError>;

    fn script_output(&mut self) -> Result<ScriptOutput, SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    Continue,
    /// The native loop asked to quit (e.g. the last top-level window closed).
    Quit,
}

/// Processes pending native GUI/graphics events.
pub trait EventPump {
    /// Handles pending events for at most `slice` and returns control.
    fn pump(&mut self, slice: Duration) -> PumpStatus;
}

/// Pump for hosts without a native event loop; returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdlePump;

impl EventPump for IdlePump {
    fn pump(&mut self, _slice: Duration) -> PumpStatus {
        PumpStatus::Continue
    }
}

/// Builds sessions and the event pump. Shared with the owner thread, but
/// every method is only ever invoked from it.
pub trait Backend: Send + Sync + 'static {
    /// Engine-wide initialisation (module loading, device setup).
    fn initialize(&self, _env: &EngineEnv) -> Result<(), SessionError> {
        Ok(())
    }

    fn finalize(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn create_pump(&self) -> Result<Box<dyn EventPump>, SessionError> {
        Ok(Box::new(IdlePump))
    }

    fn create_session(
        &self,
        env: &EngineEnv,
        params: &CreateParams,
    ) -> Result<Box<dyn Session>, SessionError>;
}
