use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use log::{debug, info};
use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table, Value as LuaValue, Variadic};
use viz_marshal::{
    CreateParams, EngineEnv, FullScreenMode, ScriptOutput, ScriptSource, Session, SessionError,
    Value, ValueKind, WindowGeometry,
};

use crate::convert;
use crate::error::ScriptError;
use crate::window::WindowState;

/// Script currently bound to a window. Kept so tool invocations can re-run it.
#[derive(Debug, Clone)]
struct BoundScript {
    chunk_name: String,
    source: String,
    args: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum RunMode<'a> {
    Script,
    Tool(Option<&'a str>),
}

/// A headless window driven by its own Lua state.
pub struct LuaSession {
    lua: Lua,
    window: Rc<RefCell<WindowState>>,
    output: Rc<RefCell<ScriptOutput>>,
    script: Option<BoundScript>,
    viz_only: bool,
}

impl LuaSession {
    pub fn new(env: &EngineEnv, params: &CreateParams) -> Result<Self, ScriptError> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
        let title = params
            .title
            .clone()
            .unwrap_or_else(|| format!("Visualization ({})", params.licensee));
        let window = Rc::new(RefCell::new(WindowState::new(
            title,
            params.geometry,
            params.style,
        )));
        let output = Rc::new(RefCell::new(ScriptOutput::default()));

        install_package_path(&lua, &env.module_path)?;
        if let Some(env_path) = &params.env_path {
            lua.globals()
                .set("EnvPath", env_path.display().to_string())?;
        }
        install_print(&lua, output.clone())?;
        install_window_functions(&lua, window.clone())?;

        let mut session = LuaSession {
            lua,
            window,
            output,
            script: None,
            viz_only: params.viz_only,
        };
        match &params.init_script {
            Some(script) if params.show_intro => session.bind_and_run(BoundScript {
                chunk_name: "init".to_string(),
                source: script.clone(),
                args: Vec::new(),
            })?,
            Some(_) => debug!("intro disabled, init script not run"),
            None => {}
        }
        info!("created Lua window '{}'", session.window.borrow().title);
        Ok(session)
    }

    fn bind_and_run(&mut self, script: BoundScript) -> Result<(), ScriptError> {
        self.script = Some(script);
        self.run(RunMode::Script)
    }

    /// Runs the bound script, exposing the run mode as `ExecMode` and
    /// `ToolName` globals.
    fn run(&mut self, mode: RunMode<'_>) -> Result<(), ScriptError> {
        self.window.borrow().ensure_open()?;
        let script = self.script.clone().ok_or(ScriptError::NoScript)?;

        let globals = self.lua.globals();
        let (exec_mode, tool) = match mode {
            RunMode::Script => ("script", None),
            RunMode::Tool(tool) => ("tool", tool),
        };
        globals.set("ExecMode", exec_mode)?;
        globals.set("ToolName", tool)?;
        globals.set(
            "ScriptArgs",
            self.lua
                .create_sequence_from(script.args.iter().map(String::as_str))?,
        )?;

        *self.output.borrow_mut() = ScriptOutput::default();
        debug!("running script '{}' in {exec_mode} mode", script.chunk_name);
        let result = self
            .lua
            .load(&script.source)
            .set_name(script.chunk_name.as_str())
            .eval::<MultiValue>();
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mut output = self.output.borrow_mut();
                output.is_error = true;
                output.lines.push(err.to_string());
                // Outside viz-only mode errors are shown next to the source.
                if !self.viz_only {
                    let mut window = self.window.borrow_mut();
                    if window.is_open() {
                        window.editor_visible = true;
                    }
                }
                Err(ScriptError::Lua(err))
            }
        }
    }

    fn set_global(&self, name: &str, value: &Value) -> Result<(), ScriptError> {
        let converted = convert::to_lua(&self.lua, value)?;
        self.lua.globals().set(name, converted)?;
        Ok(())
    }

    fn get_global(&self, name: &str, kind: ValueKind) -> Result<Value, ScriptError> {
        let value: LuaValue = self.lua.globals().get(name)?;
        convert::from_lua(name, value, kind)
    }
}

fn install_package_path(lua: &Lua, module_path: &Path) -> Result<(), ScriptError> {
    let package: Table = lua.globals().get("package")?;
    let current_path: String = package.get("path")?;
    let new_path = format!(
        "{current_path};{}/?.lua;{}/?/init.lua",
        module_path.display(),
        module_path.display()
    );
    package.set("path", new_path)?;
    Ok(())
}

/// Replaces `print` so script output lands in the window's output buffer.
fn install_print(lua: &Lua, output: Rc<RefCell<ScriptOutput>>) -> Result<(), ScriptError> {
    let print = lua.create_function(move |lua_ctx, args: Variadic<LuaValue>| {
        let tostring: Function = lua_ctx.globals().get("tostring")?;
        let mut parts = Vec::with_capacity(args.len());
        for arg in args.iter() {
            parts.push(tostring.call::<_, String>(arg.clone())?);
        }
        let line = parts.join("\t");
        debug!("[lua] {line}");
        output.borrow_mut().lines.push(line);
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    Ok(())
}

fn install_window_functions(lua: &Lua, window: Rc<RefCell<WindowState>>) -> Result<(), ScriptError> {
    let globals = lua.globals();

    let close_state = window.clone();
    globals.set(
        "CloseWindow",
        lua.create_function(move |_, ()| {
            close_state.borrow_mut().close();
            Ok(())
        })?,
    )?;

    let title_state = window.clone();
    globals.set(
        "SetWindowTitle",
        lua.create_function(move |_, title: String| {
            title_state.borrow_mut().title = title;
            Ok(())
        })?,
    )?;

    let size_state = window;
    globals.set(
        "GetWindowSize",
        lua.create_function(move |_, ()| {
            let geometry = size_state.borrow().geometry;
            Ok((geometry.width, geometry.height))
        })?,
    )?;
    Ok(())
}

impl Session for LuaSession {
    fn destroy(&mut self) -> Result<(), SessionError> {
        self.window.borrow_mut().close();
        self.script = None;
        debug!("Lua window released");
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.window.borrow().is_open()
    }

    fn show_window(&mut self) -> Result<(), SessionError> {
        Ok(self.window.borrow_mut().set_visible(true)?)
    }

    fn hide_window(&mut self) -> Result<(), SessionError> {
        Ok(self.window.borrow_mut().set_visible(false)?)
    }

    fn show_editor(&mut self) -> Result<(), SessionError> {
        Ok(self.window.borrow_mut().set_editor_visible(true)?)
    }

    fn hide_editor(&mut self) -> Result<(), SessionError> {
        Ok(self.window.borrow_mut().set_editor_visible(false)?)
    }

    fn set_window_geometry(&mut self, geometry: WindowGeometry) -> Result<(), SessionError> {
        Ok(self.window.borrow_mut().set_geometry(geometry)?)
    }

    fn set_script(&mut self, script: &str) -> Result<(), SessionError> {
        Ok(self.bind_and_run(BoundScript {
            chunk_name: "script".to_string(),
            source: script.to_string(),
            args: Vec::new(),
        })?)
    }

    fn load_script(&mut self, source: &ScriptSource) -> Result<(), SessionError> {
        if source.passphrase.is_some() {
            return Err(ScriptError::Passphrase(source.path.clone()).into());
        }
        let text = fs::read_to_string(&source.path).map_err(|err| ScriptError::Io {
            path: source.path.clone(),
            source: err,
        })?;
        let chunk_name = source
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("script")
            .to_string();
        Ok(self.bind_and_run(BoundScript {
            chunk_name,
            source: text,
            args: source.args.clone(),
        })?)
    }

    fn exec_tool(&mut self, tool: Option<&str>) -> Result<(), SessionError> {
        Ok(self.run(RunMode::Tool(tool))?)
    }

    fn full_screen(&mut self, mode: FullScreenMode) -> Result<(), SessionError> {
        Ok(self.window.borrow_mut().set_full_screen(mode)?)
    }

    fn set_var(&mut self, name: &str, value: &Value) -> Result<(), SessionError> {
        self.window.borrow().ensure_open()?;
        Ok(self.set_global(name, value)?)
    }

    fn get_var(&mut self, name: &str, kind: ValueKind) -> Result<Value, SessionError> {
        self.window.borrow().ensure_open()?;
        Ok(self.get_global(name, kind)?)
    }

    fn script_output(&mut self) -> Result<ScriptOutput, SessionError> {
        Ok(self.output.borrow().clone())
    }
}
