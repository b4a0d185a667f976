use std::fs;

use anyhow::{Context, Result};
use tempfile::{tempdir, TempDir};
use viz_marshal::{
    CreateParams, Engine, EngineConfig, EngineError, Image, ImageDataType, ImageFormat, Rgba,
    ScriptSource, Tensor, ValueKind,
};
use viz_script::LuaBackend;

struct Fixture {
    engine: Engine,
    modules: TempDir,
}

fn fixture() -> Result<Fixture> {
    let modules = tempdir().context("creating module directory")?;
    let engine = Engine::new(
        LuaBackend::new(),
        EngineConfig {
            poll_interval_ms: 2,
            ..EngineConfig::default()
        },
    );
    engine.start(modules.path(), modules.path())?;
    Ok(Fixture { engine, modules })
}

#[test]
fn missing_module_directory_fails_startup() -> Result<()> {
    let scratch = tempdir()?;
    let engine = Engine::new(LuaBackend::new(), EngineConfig::default());
    let err = engine
        .start(scratch.path(), scratch.path().join("nope"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Startup(message) if message.contains("is not a directory")));
    assert!(!engine.is_running());
    Ok(())
}

#[test]
fn variables_round_trip_through_lua_globals() -> Result<()> {
    let Fixture { engine, .. } = fixture()?;
    let view = engine.create(CreateParams::default())?;

    engine.set_var(view, "count", 12)?;
    engine.set_var(view, "ratio", 0.75)?;
    engine.set_var(view, "label", "axis")?;
    engine.set_var(view, "tint", Rgba::new(0.0, 0.25, 0.5, 1.0))?;
    let tensor = Tensor::new(vec![2, 2], vec![1.0, 0.0, 0.0, 1.0])?;
    engine.set_var(view, "m", tensor.clone())?;
    let image = Image::new(1, 2, ImageFormat::Rgb, ImageDataType::U8, vec![1, 2, 3, 4, 5, 6])?;
    engine.set_var(view, "img", image.clone())?;

    assert_eq!(engine.get_int(view, "count")?, 12);
    assert_eq!(engine.get_double(view, "ratio")?, 0.75);
    assert_eq!(engine.get_text(view, "label")?, "axis");
    assert_eq!(engine.get_color(view, "tint")?, Rgba::new(0.0, 0.25, 0.5, 1.0));
    assert_eq!(engine.get_tensor(view, "m")?, tensor);
    assert_eq!(engine.get_tensor_shape(view, "m")?.element_count, 4);
    assert_eq!(engine.get_image(view, "img")?, image);

    engine.end()?;
    Ok(())
}

#[test]
fn scripts_compute_values_and_print_output() -> Result<()> {
    let Fixture { engine, .. } = fixture()?;
    let view = engine.create(CreateParams::default())?;
    engine.set_var(view, "n", 6)?;
    engine.set_script(
        view,
        "square = n * n\nprint('square', square)\npoints = {1, 2, 3}",
    )?;

    assert_eq!(engine.get_int(view, "square")?, 36);
    assert_eq!(engine.get_tensor_shape(view, "points")?.dim_count, 1);
    let output = engine.get_script_output(view)?;
    assert!(!output.is_error);
    assert_eq!(output.lines, vec!["square\t36".to_string()]);

    let err = engine.get_int(view, "points").unwrap_err();
    assert!(err.to_string().contains("expected int"), "{err}");
    let err = engine
        .get_var(view, "points", ValueKind::TextList)
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedPayload { .. }));
    engine.end()?;
    Ok(())
}

#[test]
fn script_errors_are_reported_and_flagged() -> Result<()> {
    let Fixture { engine, .. } = fixture()?;
    let view = engine.create(CreateParams::default())?;
    let err = engine.set_script(view, "error('bad geometry')").unwrap_err();
    assert!(err.to_string().contains("bad geometry"), "{err}");
    assert!(engine.last_error().contains("bad geometry"));

    let output = engine.get_script_output(view)?;
    assert!(output.is_error);
    assert!(output.lines[0].contains("bad geometry"));
    engine.end()?;
    Ok(())
}

#[test]
fn loaded_scripts_see_their_arguments_and_modules() -> Result<()> {
    let Fixture { engine, modules } = fixture()?;
    fs::write(
        modules.path().join("helpers.lua"),
        "local M = {}\nfunction M.double(x) return 2 * x end\nreturn M\n",
    )?;
    let scripts = tempdir()?;
    fs::write(
        scripts.path().join("scene.lua"),
        "local helpers = require('helpers')\nresult = helpers.double(#ScriptArgs)\nfirst = ScriptArgs[1]\n",
    )?;
    engine.set_script_path(scripts.path());

    let view = engine.create(CreateParams::default())?;
    let mut source = ScriptSource::new("scene.lua");
    source.args = vec!["alpha".to_string(), "beta".to_string()];
    engine.load_script(view, source)?;

    assert_eq!(engine.get_int(view, "result")?, 4);
    assert_eq!(engine.get_text(view, "first")?, "alpha");

    let mut locked = ScriptSource::new("scene.lua");
    locked.passphrase = Some("secret".to_string());
    let err = engine.load_script(view, locked).unwrap_err();
    assert!(err.to_string().contains("passphrase"), "{err}");

    let err = engine
        .load_script(view, ScriptSource::new("missing.lua"))
        .unwrap_err();
    assert!(err.to_string().contains("failed to read script"), "{err}");
    engine.end()?;
    Ok(())
}

#[test]
fn tools_rerun_the_current_script() -> Result<()> {
    let Fixture { engine, .. } = fixture()?;
    let view = engine.create(CreateParams::default())?;
    engine.exec_tool(view, Some("slider")).unwrap_err();

    engine.set_script(
        view,
        "runs = (runs or 0) + 1\nmode = ExecMode\ntool = ToolName or 'none'",
    )?;
    assert_eq!(engine.get_text(view, "mode")?, "script");
    engine.exec_tool(view, Some("slider"))?;
    assert_eq!(engine.get_int(view, "runs")?, 2);
    assert_eq!(engine.get_text(view, "mode")?, "tool");
    assert_eq!(engine.get_text(view, "tool")?, "slider");
    engine.end()?;
    Ok(())
}

#[test]
fn window_state_operations_apply_to_open_windows() -> Result<()> {
    let Fixture { engine, .. } = fixture()?;
    let view = engine.create(CreateParams::default().with_init_script("w, h = GetWindowSize()"))?;
    assert_eq!(engine.get_int(view, "w")?, 640);
    engine.show_editor(view)?;
    engine.hide_editor(view)?;
    engine.full_screen(view, true, false)?;
    engine.hide_window(view)?;
    engine.show_window(view)?;

    engine.set_script(view, "CloseWindow()")?;
    assert_eq!(engine.is_valid(view), Ok(false));
    assert!(engine.show_window(view).is_err());
    assert_eq!(engine.last_error(), "window has been closed");
    engine.end()?;
    Ok(())
}

#[test]
fn closing_every_window_ends_a_user_driven_session() -> Result<()> {
    let Fixture { engine, .. } = fixture()?;
    let first = engine.create(CreateParams::default())?;
    let second = engine.create(CreateParams::default())?;
    engine.set_script(first, "CloseWindow()")?;
    engine.set_script(second, "CloseWindow()")?;

    engine.wait_for_shutdown()?;
    assert!(!engine.is_running());
    Ok(())
}
