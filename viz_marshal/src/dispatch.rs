//! Owner-thread dispatch of one operation against the handle table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::envelope::{CreateParams, Operation, Reply, ReplyResult};
use crate::error::EngineError;
use crate::handle::{Handle, HandleCounter, HandleTable};
use crate::session::{Backend, EngineEnv, Session};
use crate::value::{Value, ValueKind};

pub(crate) struct Dispatcher {
    backend: Arc<dyn Backend>,
    env: EngineEnv,
    sessions: HandleTable<Box<dyn Session>>,
    initialized: bool,
    allow_user_end: bool,
    sequence: Arc<AtomicU64>,
}

impl Dispatcher {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        env: EngineEnv,
        counter: HandleCounter,
        sequence: Arc<AtomicU64>,
    ) -> Self {
        Dispatcher {
            backend,
            env,
            sessions: HandleTable::new(counter),
            initialized: false,
            allow_user_end: false,
            sequence,
        }
    }

    pub(crate) fn dispatch(&mut self, operation: Operation) -> ReplyResult {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        match operation.handle() {
            Some(handle) => debug!("dispatch #{seq}: {} on window {handle}", operation.kind()),
            None => debug!("dispatch #{seq}: {}", operation.kind()),
        }

        match operation {
            Operation::EngineInit => {
                self.backend.initialize(&self.env)?;
                self.initialized = true;
                Ok(Reply::Done)
            }
            Operation::EngineFinalize => {
                self.finalize()?;
                Ok(Reply::Done)
            }
            Operation::Create(params) => self.create(params).map(Reply::Handle),
            Operation::Destroy(handle) => {
                self.destroy(handle)?;
                Ok(Reply::Done)
            }
            Operation::DestroyAll => {
                self.destroy_all()?;
                Ok(Reply::Done)
            }
            Operation::IsValid(handle) => Ok(Reply::Flag(self.session(handle)?.is_valid())),
            Operation::ShowWindow(handle) => {
                self.session(handle)?.show_window()?;
                Ok(Reply::Done)
            }
            Operation::HideWindow(handle) => {
                self.session(handle)?.hide_window()?;
                Ok(Reply::Done)
            }
            Operation::ShowEditor(handle) => {
                self.session(handle)?.show_editor()?;
                Ok(Reply::Done)
            }
            Operation::HideEditor(handle) => {
                self.session(handle)?.hide_editor()?;
                Ok(Reply::Done)
            }
            Operation::SetWindowGeometry(handle, geometry) => {
                self.session(handle)?.set_window_geometry(geometry)?;
                Ok(Reply::Done)
            }
            Operation::SetScript(handle, script) => {
                self.session(handle)?.set_script(&script)?;
                Ok(Reply::Done)
            }
            Operation::LoadScript(handle, source) => {
                self.session(handle)?.load_script(&source)?;
                Ok(Reply::Done)
            }
            Operation::ExecTool(handle, tool) => {
                self.session(handle)?.exec_tool(tool.as_deref())?;
                Ok(Reply::Done)
            }
            Operation::FullScreen(handle, mode) => {
                self.session(handle)?.full_screen(mode)?;
                Ok(Reply::Done)
            }
            Operation::SetVar(handle, name, value) => {
                self.set_var(handle, &name, &value)?;
                Ok(Reply::Done)
            }
            Operation::GetVar(handle, name, kind) => {
                self.get_var(handle, &name, kind).map(Reply::Value)
            }
            Operation::GetScriptOutput(handle) => {
                let output = self.session(handle)?.script_output()?;
                Ok(Reply::ScriptOutput(output))
            }
            Operation::EnableUserEnd(enable) => {
                self.allow_user_end = enable;
                Ok(Reply::Done)
            }
            // The owner loop answers shutdown itself once draining is done.
            Operation::Shutdown => Ok(Reply::Done),
        }
    }

    fn session(&mut self, handle: Handle) -> Result<&mut Box<dyn Session>, EngineError> {
        self.sessions
            .get_mut(handle)
            .ok_or(EngineError::InvalidHandle(handle))
    }

    fn create(&mut self, mut params: CreateParams) -> Result<Handle, EngineError> {
        if params.env_path.is_none() {
            params.env_path = Some(self.env.env_root.clone());
        }
        let session = self.backend.create_session(&self.env, &params)?;
        match self.sessions.insert(session) {
            Ok(handle) => {
                info!("created window {handle} ({} open)", self.sessions.len());
                Ok(handle)
            }
            Err(mut session) => {
                if let Err(err) = session.destroy() {
                    warn!("releasing a window without a handle failed: {err}");
                }
                Err(EngineError::HandlesExhausted)
            }
        }
    }

    /// Single destroy path shared by client requests and draining.
    pub(crate) fn destroy(&mut self, handle: Handle) -> Result<(), EngineError> {
        let mut session = self
            .sessions
            .remove(handle)
            .ok_or(EngineError::InvalidHandle(handle))?;
        let outcome = session.destroy();
        drop(session);
        info!("destroyed window {handle} ({} open)", self.sessions.len());
        outcome.map_err(EngineError::from)
    }

    fn destroy_all(&mut self) -> Result<(), EngineError> {
        let mut first_error = None;
        for handle in self.sessions.handles() {
            if let Err(err) = self.destroy(handle) {
                warn!("destroying window {handle} failed: {err}");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn set_var(&mut self, handle: Handle, name: &str, value: &Value) -> Result<(), EngineError> {
        match value {
            Value::Int(_)
            | Value::Double(_)
            | Value::Text(_)
            | Value::TextList(_)
            | Value::Tensor(_)
            | Value::Image(_)
            | Value::Color(_)
            | Value::Vertices(_) => {}
            Value::TensorShape(_) => {
                return Err(EngineError::UnsupportedPayload {
                    operation: "set_var",
                    kind: value.kind(),
                })
            }
        }
        self.session(handle)?.set_var(name, value)?;
        Ok(())
    }

    fn get_var(&mut self, handle: Handle, name: &str, kind: ValueKind) -> Result<Value, EngineError> {
        match kind {
            ValueKind::Int
            | ValueKind::Double
            | ValueKind::Text
            | ValueKind::Tensor
            | ValueKind::TensorShape
            | ValueKind::Image
            | ValueKind::Color => {}
            ValueKind::TextList | ValueKind::Vertices => {
                return Err(EngineError::UnsupportedPayload {
                    operation: "get_var",
                    kind,
                })
            }
        }
        let value = self.session(handle)?.get_var(name, kind)?;
        if value.kind() != kind {
            return Err(EngineError::Session(format!(
                "variable '{name}' came back as {} instead of {kind}",
                value.kind()
            )));
        }
        Ok(value)
    }

    fn finalize(&mut self) -> Result<(), EngineError> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        self.backend.finalize()?;
        Ok(())
    }

    pub(crate) fn handles(&self) -> Vec<Handle> {
        self.sessions.handles()
    }

    pub(crate) fn user_end_allowed(&self) -> bool {
        self.allow_user_end
    }

    pub(crate) fn has_open_windows(&self) -> bool {
        self.sessions.values().any(|session| session.is_valid())
    }

    /// Releases engine-wide resources if `EngineFinalize` never ran.
    pub(crate) fn finalize_if_needed(&mut self) {
        if let Err(err) = self.finalize() {
            warn!("backend finalization failed: {err}");
        }
    }
}
