//! Client-facing engine object. Any thread may call into it; every call is
//! marshalled to the owner thread and its result handed back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::channel::{request_channel, CallChannel};
use crate::config::EngineConfig;
use crate::envelope::{
    CreateParams, FullScreenMode, Operation, Reply, ReplyResult, ScriptOutput, ScriptSource,
    WindowGeometry,
};
use crate::error::{EngineError, LastError};
use crate::handle::{Handle, HandleCounter};
use crate::owner::{self, OwnerContext, OwnerState, StateCell};
use crate::session::{Backend, EngineEnv};
use crate::value::{Image, Rgba, Tensor, TensorShape, Value, ValueKind};

/// One started owner thread and the channel leading to it.
struct Runtime {
    channel: CallChannel,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    state: StateCell,
    running: Arc<AtomicBool>,
}

impl Runtime {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn join(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("owner thread terminated with a panic");
        }
    }
}

/// Marshals window and script operations onto a single owner thread.
///
/// The engine starts stopped. [`Engine::start`] spawns the owner thread,
/// [`Engine::end`] drains and joins it, and the engine may be started again
/// afterwards. Handles stay unique across restarts.
///
/// Every failing call also stores its message in the engine's last-error
/// slot, see [`Engine::last_error`].
pub struct Engine {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
    call_timeout: Mutex<Option<Duration>>,
    counter: HandleCounter,
    sequence: Arc<AtomicU64>,
    last_error: LastError,
    script_path: Mutex<Option<PathBuf>>,
    /// Only held to clone or swap the current runtime, never across a wait.
    runtime: Mutex<Option<Arc<Runtime>>>,
    /// Serialises start and end against each other.
    lifecycle: Mutex<()>,
}

impl Engine {
    pub fn new(backend: impl Backend, config: EngineConfig) -> Self {
        Self::with_backend(Arc::new(backend), config)
    }

    pub fn with_backend(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        let call_timeout = config.call_timeout();
        Engine {
            backend,
            config,
            call_timeout: Mutex::new(call_timeout),
            counter: HandleCounter::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            last_error: LastError::new(),
            script_path: Mutex::new(None),
            runtime: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    // ----- lifecycle -------------------------------------------------------

    /// Spawns the owner thread, waits for it to come up, and runs the
    /// backend's engine-wide initialisation on it.
    pub fn start(
        &self,
        env_root: impl AsRef<Path>,
        module_path: impl AsRef<Path>,
    ) -> Result<(), EngineError> {
        let result = self.start_owner(env_root.as_ref(), module_path.as_ref());
        self.track(result)
    }

    fn start_owner(&self, env_root: &Path, module_path: &Path) -> Result<(), EngineError> {
        if env_root.as_os_str().is_empty() {
            return Err(EngineError::InvalidArgument(
                "environment root path is empty".to_string(),
            ));
        }
        if module_path.as_os_str().is_empty() {
            return Err(EngineError::InvalidArgument(
                "module path is empty".to_string(),
            ));
        }

        let _lifecycle = self.lifecycle.lock();
        if let Some(previous) = self.current_runtime() {
            if previous.is_running() {
                return Err(EngineError::AlreadyRunning);
            }
            debug!("reaping stopped owner thread before restart");
            previous.join();
            self.clear_runtime(&previous);
        }

        let (requests_tx, requests_rx) = request_channel();
        let state = StateCell::new(OwnerState::Stopped);
        let running = Arc::new(AtomicBool::new(false));
        let ctx = OwnerContext {
            backend: self.backend.clone(),
            env: EngineEnv {
                env_root: env_root.to_path_buf(),
                module_path: module_path.to_path_buf(),
            },
            config: self.config.clone(),
            counter: self.counter.clone(),
            sequence: self.sequence.clone(),
            state: state.clone(),
            running: running.clone(),
        };
        let starting = owner::spawn(ctx, requests_rx)?;
        let runtime = Arc::new(Runtime {
            channel: CallChannel::new(requests_tx),
            thread: Mutex::new(None),
            thread_id: starting.thread_id(),
            state,
            running,
        });
        // Published while still initializing: state queries see the owner,
        // calls get `NotRunning` until it flips its running flag.
        *self.runtime.lock() = Some(runtime.clone());
        match starting.wait_ready() {
            Ok(handle) => *runtime.thread.lock() = Some(handle),
            Err(err) => {
                self.clear_runtime(&runtime);
                return Err(err);
            }
        }

        if let Err(err) = runtime.channel.call(Operation::EngineInit, self.call_timeout()) {
            warn!("engine initialisation failed: {err}");
            if let Err(stop_err) = self.shutdown_runtime(&runtime) {
                warn!("stopping the half-started engine failed: {stop_err}");
            }
            self.clear_runtime(&runtime);
            return Err(EngineError::Startup(err.to_string()));
        }
        info!(
            "engine started (env root {}, modules {})",
            env_root.display(),
            module_path.display()
        );
        Ok(())
    }

    /// Finalises the backend, destroys every remaining window, and joins the
    /// owner thread. Succeeds without doing anything when not running.
    pub fn end(&self) -> Result<(), EngineError> {
        let result = self.stop_owner();
        self.track(result)
    }

    fn stop_owner(&self) -> Result<(), EngineError> {
        let Some(runtime) = self.current_runtime() else {
            return Ok(());
        };
        if thread::current().id() == runtime.thread_id {
            return Err(EngineError::InvalidArgument(
                "the engine cannot be stopped from its own thread".to_string(),
            ));
        }

        let _lifecycle = self.lifecycle.lock();
        // A concurrent end may have finished while we waited.
        let Some(runtime) = self.current_runtime() else {
            return Ok(());
        };
        self.shutdown_runtime(&runtime)?;
        self.clear_runtime(&runtime);
        info!("engine stopped");
        Ok(())
    }

    /// Finalises and shuts down a running owner, then joins its thread.
    fn shutdown_runtime(&self, runtime: &Runtime) -> Result<(), EngineError> {
        if runtime.is_running() {
            let timeout = self.call_timeout();
            if let Err(err) = runtime.channel.call(Operation::EngineFinalize, timeout) {
                warn!("engine finalisation failed: {err}");
            }
            match runtime.channel.call(Operation::Shutdown, timeout) {
                Ok(_) | Err(EngineError::NotRunning) => {}
                Err(err) => return Err(err),
            }
        }
        runtime.join();
        Ok(())
    }

    /// Hands shutdown to the user: the owner thread stops by itself once no
    /// window is left open. Blocks until that happens.
    pub fn wait_for_shutdown(&self) -> Result<(), EngineError> {
        let runtime = self.track(self.runtime())?;
        self.enable_user_end(true)?;
        runtime.join();
        self.clear_runtime(&runtime);
        info!("engine ended by the user");
        Ok(())
    }

    fn clear_runtime(&self, runtime: &Arc<Runtime>) {
        let mut slot = self.runtime.lock();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, runtime)) {
            *slot = None;
        }
    }

    pub fn is_running(&self) -> bool {
        self.current_runtime()
            .is_some_and(|runtime| runtime.is_running())
    }

    pub fn owner_state(&self) -> OwnerState {
        self.current_runtime()
            .map_or(OwnerState::Stopped, |runtime| runtime.state.get())
    }

    pub fn owner_thread_id(&self) -> Option<ThreadId> {
        self.current_runtime().map(|runtime| runtime.thread_id)
    }

    /// Number of operations dispatched on the owner thread since the engine
    /// was created.
    pub fn dispatch_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        *self.call_timeout.lock()
    }

    pub fn set_call_timeout(&self, timeout: Option<Duration>) {
        *self.call_timeout.lock() = timeout;
    }

    /// Message of the most recent failure, or an empty string.
    pub fn last_error(&self) -> String {
        self.last_error.get()
    }

    pub fn clear_last_error(&self) {
        self.last_error.clear();
    }

    /// Directory that relative paths passed to [`Engine::load_script`] are
    /// resolved against. An empty path clears it.
    pub fn set_script_path(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        *self.script_path.lock() = if path.as_os_str().is_empty() {
            None
        } else {
            Some(path.to_path_buf())
        };
    }

    pub fn script_path(&self) -> Option<PathBuf> {
        self.script_path.lock().clone()
    }

    // ----- windows ---------------------------------------------------------

    pub fn create(&self, params: CreateParams) -> Result<Handle, EngineError> {
        match self.call(Operation::Create(params))? {
            Reply::Handle(handle) => Ok(handle),
            other => self.unexpected("create", other),
        }
    }

    pub fn destroy(&self, handle: Handle) -> Result<(), EngineError> {
        self.call_done(Operation::Destroy(handle))
    }

    pub fn destroy_all(&self) -> Result<(), EngineError> {
        self.call_done(Operation::DestroyAll)
    }

    pub fn is_valid(&self, handle: Handle) -> Result<bool, EngineError> {
        match self.call(Operation::IsValid(handle))? {
            Reply::Flag(valid) => Ok(valid),
            other => self.unexpected("is_valid", other),
        }
    }

    pub fn show_window(&self, handle: Handle) -> Result<(), EngineError> {
        self.call_done(Operation::ShowWindow(handle))
    }

    pub fn hide_window(&self, handle: Handle) -> Result<(), EngineError> {
        self.call_done(Operation::HideWindow(handle))
    }

    pub fn show_editor(&self, handle: Handle) -> Result<(), EngineError> {
        self.call_done(Operation::ShowEditor(handle))
    }

    pub fn hide_editor(&self, handle: Handle) -> Result<(), EngineError> {
        self.call_done(Operation::HideEditor(handle))
    }

    pub fn set_window_geometry(
        &self,
        handle: Handle,
        geometry: WindowGeometry,
    ) -> Result<(), EngineError> {
        self.call_done(Operation::SetWindowGeometry(handle, geometry))
    }

    pub fn full_screen(
        &self,
        handle: Handle,
        enable: bool,
        user_toggle: bool,
    ) -> Result<(), EngineError> {
        self.call_done(Operation::FullScreen(
            handle,
            FullScreenMode {
                enable,
                user_toggle,
            },
        ))
    }

    pub fn enable_user_end(&self, enable: bool) -> Result<(), EngineError> {
        self.call_done(Operation::EnableUserEnd(enable))
    }

    // ----- scripts ---------------------------------------------------------

    pub fn set_script(&self, handle: Handle, script: impl Into<String>) -> Result<(), EngineError> {
        let script = script.into();
        if script.trim().is_empty() {
            return self.track(Err(EngineError::InvalidArgument(
                "script text is empty".to_string(),
            )));
        }
        self.call_done(Operation::SetScript(handle, script))
    }

    pub fn load_script(&self, handle: Handle, mut source: ScriptSource) -> Result<(), EngineError> {
        if source.path.as_os_str().is_empty() {
            return self.track(Err(EngineError::InvalidArgument(
                "script path is empty".to_string(),
            )));
        }
        if source.path.is_relative() {
            if let Some(base) = self.script_path() {
                source.path = base.join(&source.path);
            }
        }
        self.call_done(Operation::LoadScript(handle, source))
    }

    /// Re-runs the current script in tool mode, optionally naming the tool
    /// that triggered it.
    pub fn exec_tool(&self, handle: Handle, tool: Option<&str>) -> Result<(), EngineError> {
        self.call_done(Operation::ExecTool(handle, tool.map(str::to_string)))
    }

    pub fn get_script_output(&self, handle: Handle) -> Result<ScriptOutput, EngineError> {
        match self.call(Operation::GetScriptOutput(handle))? {
            Reply::ScriptOutput(output) => Ok(output),
            other => self.unexpected("get_script_output", other),
        }
    }

    // ----- variables -------------------------------------------------------

    pub fn set_var(
        &self,
        handle: Handle,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), EngineError> {
        let value = value.into();
        self.track(check_var_name(name))?;
        self.track(value.validate().map_err(EngineError::from))?;
        self.call_done(Operation::SetVar(handle, name.to_string(), value))
    }

    pub fn get_var(&self, handle: Handle, name: &str, kind: ValueKind) -> Result<Value, EngineError> {
        self.track(check_var_name(name))?;
        match self.call(Operation::GetVar(handle, name.to_string(), kind))? {
            Reply::Value(value) => Ok(value),
            other => self.unexpected("get_var", other),
        }
    }

    pub fn get_int(&self, handle: Handle, name: &str) -> Result<i32, EngineError> {
        match self.get_var(handle, name, ValueKind::Int)? {
            Value::Int(value) => Ok(value),
            other => self.unexpected("get_var", Reply::Value(other)),
        }
    }

    pub fn get_double(&self, handle: Handle, name: &str) -> Result<f64, EngineError> {
        match self.get_var(handle, name, ValueKind::Double)? {
            Value::Double(value) => Ok(value),
            other => self.unexpected("get_var", Reply::Value(other)),
        }
    }

    pub fn get_text(&self, handle: Handle, name: &str) -> Result<String, EngineError> {
        match self.get_var(handle, name, ValueKind::Text)? {
            Value::Text(value) => Ok(value),
            other => self.unexpected("get_var", Reply::Value(other)),
        }
    }

    pub fn get_tensor(&self, handle: Handle, name: &str) -> Result<Tensor, EngineError> {
        match self.get_var(handle, name, ValueKind::Tensor)? {
            Value::Tensor(value) => Ok(value),
            other => self.unexpected("get_var", Reply::Value(other)),
        }
    }

    pub fn get_tensor_shape(&self, handle: Handle, name: &str) -> Result<TensorShape, EngineError> {
        match self.get_var(handle, name, ValueKind::TensorShape)? {
            Value::TensorShape(value) => Ok(value),
            other => self.unexpected("get_var", Reply::Value(other)),
        }
    }

    pub fn get_image(&self, handle: Handle, name: &str) -> Result<Image, EngineError> {
        match self.get_var(handle, name, ValueKind::Image)? {
            Value::Image(value) => Ok(value),
            other => self.unexpected("get_var", Reply::Value(other)),
        }
    }

    pub fn get_color(&self, handle: Handle, name: &str) -> Result<Rgba, EngineError> {
        match self.get_var(handle, name, ValueKind::Color)? {
            Value::Color(value) => Ok(value),
            other => self.unexpected("get_var", Reply::Value(other)),
        }
    }

    // ----- plumbing --------------------------------------------------------

    fn current_runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.lock().clone()
    }

    fn runtime(&self) -> Result<Arc<Runtime>, EngineError> {
        self.current_runtime()
            .filter(|runtime| runtime.is_running())
            .ok_or(EngineError::NotRunning)
    }

    fn call(&self, operation: Operation) -> ReplyResult {
        let kind = operation.kind();
        let result = self.runtime().and_then(|runtime| {
            if thread::current().id() == runtime.thread_id {
                return Err(EngineError::InvalidArgument(format!(
                    "{kind} was issued from the visualization thread itself"
                )));
            }
            runtime.channel.call(operation, self.call_timeout())
        });
        if let Err(err) = &result {
            debug!("{kind} failed: {err}");
        }
        self.track(result)
    }

    fn call_done(&self, operation: Operation) -> Result<(), EngineError> {
        let name = operation.kind().name();
        match self.call(operation)? {
            Reply::Done => Ok(()),
            other => self.unexpected(name, other),
        }
    }

    fn unexpected<T>(&self, operation: &'static str, reply: Reply) -> Result<T, EngineError> {
        self.track(Err(EngineError::UnexpectedReply {
            operation,
            reply: format!("{reply:?}"),
        }))
    }

    fn track<T>(&self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            self.last_error.record(err);
        }
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.stop_owner() {
            warn!("engine did not stop cleanly: {err}");
        }
    }
}

fn check_var_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidArgument(
            "variable name is empty".to_string(),
        ));
    }
    Ok(())
}
