//! Request envelopes passed from calling threads to the owner thread.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::error::EngineError;
use crate::handle::Handle;
use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowGeometry {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        WindowGeometry {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStyle {
    #[default]
    Standard,
    Borderless,
    Tool,
}

/// Everything the collaborator needs to build a new window/session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateParams {
    pub geometry: WindowGeometry,
    pub title: Option<String>,
    pub init_script: Option<String>,
    /// Environment root for the session; falls back to the engine's root.
    pub env_path: Option<PathBuf>,
    pub viz_only: bool,
    pub show_intro: bool,
    pub style: WindowStyle,
    pub licensee: String,
}

impl CreateParams {
    pub fn new(geometry: WindowGeometry) -> Self {
        CreateParams {
            geometry,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_init_script(mut self, script: impl Into<String>) -> Self {
        self.init_script = Some(script.into());
        self
    }
}

impl Default for CreateParams {
    fn default() -> Self {
        CreateParams {
            geometry: WindowGeometry::new(100, 100, 640, 480),
            title: None,
            init_script: None,
            env_path: None,
            viz_only: true,
            show_intro: true,
            style: WindowStyle::Standard,
            licensee: "Public".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptSource {
    pub path: PathBuf,
    pub passphrase: Option<String>,
    pub args: Vec<String>,
}

impl ScriptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ScriptSource {
            path: path.into(),
            passphrase: None,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FullScreenMode {
    pub enable: bool,
    pub user_toggle: bool,
}

/// Text produced by the last script run, flagged when it is an error report.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ScriptOutput {
    pub lines: Vec<String>,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    EngineInit,
    EngineFinalize,
    Create(CreateParams),
    Destroy(Handle),
    DestroyAll,
    IsValid(Handle),
    ShowWindow(Handle),
    HideWindow(Handle),
    ShowEditor(Handle),
    HideEditor(Handle),
    SetWindowGeometry(Handle, WindowGeometry),
    SetScript(Handle, String),
    LoadScript(Handle, ScriptSource),
    ExecTool(Handle, Option<String>),
    FullScreen(Handle, FullScreenMode),
    SetVar(Handle, String, Value),
    GetVar(Handle, String, ValueKind),
    GetScriptOutput(Handle),
    EnableUserEnd(bool),
    Shutdown,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::EngineInit => OperationKind::EngineInit,
            Operation::EngineFinalize => OperationKind::EngineFinalize,
            Operation::Create(_) => OperationKind::Create,
            Operation::Destroy(_) => OperationKind::Destroy,
            Operation::DestroyAll => OperationKind::DestroyAll,
            Operation::IsValid(_) => OperationKind::IsValid,
            Operation::ShowWindow(_) => OperationKind::ShowWindow,
            Operation::HideWindow(_) => OperationKind::HideWindow,
            Operation::ShowEditor(_) => OperationKind::ShowEditor,
            Operation::HideEditor(_) => OperationKind::HideEditor,
            Operation::SetWindowGeometry(..) => OperationKind::SetWindowGeometry,
            Operation::SetScript(..) => OperationKind::SetScript,
            Operation::LoadScript(..) => OperationKind::LoadScript,
            Operation::ExecTool(..) => OperationKind::ExecTool,
            Operation::FullScreen(..) => OperationKind::FullScreen,
            Operation::SetVar(..) => OperationKind::SetVar,
            Operation::GetVar(..) => OperationKind::GetVar,
            Operation::GetScriptOutput(_) => OperationKind::GetScriptOutput,
            Operation::EnableUserEnd(_) => OperationKind::EnableUserEnd,
            Operation::Shutdown => OperationKind::Shutdown,
        }
    }

    /// Target window, for operations that address one.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Operation::Destroy(handle)
            | Operation::IsValid(handle)
            | Operation::ShowWindow(handle)
            | Operation::HideWindow(handle)
            | Operation::ShowEditor(handle)
            | Operation::HideEditor(handle)
            | Operation::SetWindowGeometry(handle, _)
            | Operation::SetScript(handle, _)
            | Operation::LoadScript(handle, _)
            | Operation::ExecTool(handle, _)
            | Operation::FullScreen(handle, _)
            | Operation::SetVar(handle, ..)
            | Operation::GetVar(handle, ..)
            | Operation::GetScriptOutput(handle) => Some(*handle),
            Operation::EngineInit
            | Operation::EngineFinalize
            | Operation::Create(_)
            | Operation::DestroyAll
            | Operation::EnableUserEnd(_)
            | Operation::Shutdown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    None,
    Create,
    Destroy,
    DestroyAll,
    IsValid,
    ShowWindow,
    HideWindow,
    ShowEditor,
    HideEditor,
    SetWindowGeometry,
    SetScript,
    LoadScript,
    ExecTool,
    FullScreen,
    SetVar,
    GetVar,
    GetScriptOutput,
    EngineInit,
    EngineFinalize,
    EnableUserEnd,
    Shutdown,
}

impl OperationKind {
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::None => "none",
            OperationKind::Create => "create",
            OperationKind::Destroy => "destroy",
            OperationKind::DestroyAll => "destroy_all",
            OperationKind::IsValid => "is_valid",
            OperationKind::ShowWindow => "show_window",
            OperationKind::HideWindow => "hide_window",
            OperationKind::ShowEditor => "show_editor",
            OperationKind::HideEditor => "hide_editor",
            OperationKind::SetWindowGeometry => "set_window_geometry",
            OperationKind::SetScript => "set_script",
            OperationKind::LoadScript => "load_script",
            OperationKind::ExecTool => "exec_tool",
            OperationKind::FullScreen => "full_screen",
            OperationKind::SetVar => "set_var",
            OperationKind::GetVar => "get_var",
            OperationKind::GetScriptOutput => "get_script_output",
            OperationKind::EngineInit => "engine_init",
            OperationKind::EngineFinalize => "engine_finalize",
            OperationKind::EnableUserEnd => "enable_user_end",
            OperationKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Successful result written back by the owner thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Handle(Handle),
    Flag(bool),
    Value(Value),
    ScriptOutput(ScriptOutput),
}

pub type ReplyResult = Result<Reply, EngineError>;

/// One in-flight call: the operation plus the private path back to the
/// caller. Consumed by the owner thread exactly once.
pub(crate) struct Envelope {
    pub(crate) operation: Operation,
    pub(crate) reply: Sender<ReplyResult>,
    abandoned: Arc<AtomicBool>,
}

impl Envelope {
    pub(crate) fn new(operation: Operation, reply: Sender<ReplyResult>) -> Self {
        Envelope {
            operation,
            reply,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn abandon_flag(&self) -> Arc<AtomicBool> {
        self.abandoned.clone()
    }

    /// Set once the caller has given up waiting before the owner thread
    /// picked the envelope up.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    pub(crate) fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub(crate) fn into_parts(self) -> (Operation, Sender<ReplyResult>) {
        (self.operation, self.reply)
    }
}
