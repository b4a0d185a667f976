#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use viz_marshal::{
    Backend, CreateParams, Engine, EngineConfig, EngineEnv, EventPump, FullScreenMode, PumpStatus,
    ScriptOutput, ScriptSource, Session, SessionError, Value, ValueKind, WindowGeometry,
};

/// Shared instrumentation written by the mock sessions.
#[derive(Default)]
pub struct Recorder {
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub threads: Mutex<Vec<ThreadId>>,
    pub assignments: Mutex<Vec<(String, Value)>>,
    pub destroyed: Mutex<Vec<usize>>,
    pub created: AtomicUsize,
    pub initialized: AtomicUsize,
    pub finalized: AtomicUsize,
    pub fail_initialize: AtomicBool,
    pub fail_pump: AtomicBool,
    pub quit_pump: AtomicBool,
    /// Milliseconds `create_pump` sleeps before answering.
    pub pump_delay_ms: AtomicU64,
    /// Milliseconds `initialize` sleeps before answering.
    pub init_delay_ms: AtomicU64,
}

impl Recorder {
    fn enter<T>(&self, body: impl FnOnce() -> T) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.threads.lock().unwrap().push(thread::current().id());
        let out = body();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }

    pub fn destroyed(&self) -> Vec<usize> {
        self.destroyed.lock().unwrap().clone()
    }
}

pub struct MockBackend {
    pub recorder: Arc<Recorder>,
}

impl Backend for MockBackend {
    fn initialize(&self, _env: &EngineEnv) -> Result<(), SessionError> {
        thread::sleep(Duration::from_millis(
            self.recorder.init_delay_ms.load(Ordering::SeqCst),
        ));
        if self.recorder.fail_initialize.load(Ordering::SeqCst) {
            return Err(SessionError::new("module directory missing"));
        }
        self.recorder.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finalize(&self) -> Result<(), SessionError> {
        self.recorder.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_pump(&self) -> Result<Box<dyn EventPump>, SessionError> {
        thread::sleep(Duration::from_millis(
            self.recorder.pump_delay_ms.load(Ordering::SeqCst),
        ));
        if self.recorder.fail_pump.load(Ordering::SeqCst) {
            return Err(SessionError::new("no display"));
        }
        Ok(Box::new(MockPump {
            recorder: self.recorder.clone(),
        }))
    }

    fn create_session(
        &self,
        _env: &EngineEnv,
        params: &CreateParams,
    ) -> Result<Box<dyn Session>, SessionError> {
        if params.title.as_deref() == Some("reject") {
            return Err(SessionError::new("cannot create window"));
        }
        let id = self.recorder.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            id,
            recorder: self.recorder.clone(),
            vars: HashMap::new(),
            open: true,
            output: Vec::new(),
        }))
    }
}

struct MockPump {
    recorder: Arc<Recorder>,
}

impl EventPump for MockPump {
    fn pump(&mut self, _slice: Duration) -> PumpStatus {
        if self.recorder.quit_pump.load(Ordering::SeqCst) {
            PumpStatus::Quit
        } else {
            PumpStatus::Continue
        }
    }
}

struct MockSession {
    id: usize,
    recorder: Arc<Recorder>,
    vars: HashMap<String, Value>,
    open: bool,
    output: Vec<String>,
}

impl Session for MockSession {
    fn destroy(&mut self) -> Result<(), SessionError> {
        let recorder = self.recorder.clone();
        recorder.enter(|| recorder.destroyed.lock().unwrap().push(self.id));
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.recorder.enter(|| self.open)
    }

    fn show_window(&mut self) -> Result<(), SessionError> {
        self.recorder.clone().enter(|| Ok(()))
    }

    fn hide_window(&mut self) -> Result<(), SessionError> {
        self.recorder.clone().enter(|| Ok(()))
    }

    fn set_window_geometry(&mut self, _geometry: WindowGeometry) -> Result<(), SessionError> {
        self.recorder.clone().enter(|| Ok(()))
    }

    fn set_script(&mut self, script: &str) -> Result<(), SessionError> {
        let recorder = self.recorder.clone();
        recorder.enter(|| match script {
            "panic" => panic!("script engine exploded"),
            "close" => {
                self.open = false;
                Ok(())
            }
            "bad" => Err(SessionError::new("Script error in line 1")),
            other => {
                self.output.push(other.to_string());
                Ok(())
            }
        })
    }

    fn load_script(&mut self, source: &ScriptSource) -> Result<(), SessionError> {
        let recorder = self.recorder.clone();
        recorder.enter(|| {
            self.output.push(source.path.display().to_string());
            Ok(())
        })
    }

    /// `sleep:<ms>` blocks the owner thread for that long.
    fn exec_tool(&mut self, tool: Option<&str>) -> Result<(), SessionError> {
        let recorder = self.recorder.clone();
        recorder.enter(|| {
            if let Some(ms) = tool.and_then(|tool| tool.strip_prefix("sleep:")) {
                let ms: u64 = ms.parse().map_err(|_| SessionError::new("bad sleep"))?;
                thread::sleep(Duration::from_millis(ms));
            }
            self.output.push(format!("tool {}", tool.unwrap_or("-")));
            Ok(())
        })
    }

    fn full_screen(&mut self, _mode: FullScreenMode) -> Result<(), SessionError> {
        self.recorder.clone().enter(|| Ok(()))
    }

    fn set_var(&mut self, name: &str, value: &Value) -> Result<(), SessionError> {
        let recorder = self.recorder.clone();
        recorder.enter(|| {
            if name == "locked" {
                return Err(SessionError::new("Variable 'locked' is read-only"));
            }
            thread::sleep(Duration::from_micros(200));
            recorder
                .assignments
                .lock()
                .unwrap()
                .push((name.to_string(), value.clone()));
            self.vars.insert(name.to_string(), value.clone());
            Ok(())
        })
    }

    fn get_var(&mut self, name: &str, kind: ValueKind) -> Result<Value, SessionError> {
        let recorder = self.recorder.clone();
        recorder.enter(|| {
            let value = self
                .vars
                .get(name)
                .ok_or_else(|| SessionError::new(format!("Variable '{name}' not found")))?;
            match (kind, value) {
                (ValueKind::TensorShape, Value::Tensor(tensor)) => {
                    Ok(Value::TensorShape(tensor.shape()))
                }
                _ => Ok(value.clone()),
            }
        })
    }

    fn script_output(&mut self) -> Result<ScriptOutput, SessionError> {
        let recorder = self.recorder.clone();
        recorder.enter(|| {
            Ok(ScriptOutput {
                lines: self.output.clone(),
                is_error: false,
            })
        })
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 2,
        startup_timeout_ms: 5_000,
        thread_name: "viz_owner_test".to_string(),
        ..EngineConfig::default()
    }
}

pub fn engine() -> (Engine, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(
        MockBackend {
            recorder: recorder.clone(),
        },
        test_config(),
    );
    (engine, recorder)
}

pub fn started_engine() -> (Engine, Arc<Recorder>) {
    let (engine, recorder) = engine();
    engine.start("env", "modules").expect("engine starts");
    (engine, recorder)
}
