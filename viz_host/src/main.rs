mod cli;
mod report;

use std::path::Path;

use anyhow::{anyhow, ensure, Context, Result};
use clap::Parser;
use log::warn;
use viz_marshal::{CreateParams, Engine, EngineConfig, Image, ImageDataType, ImageFormat, ScriptSource};
use viz_script::LuaBackend;

use crate::cli::Args;
use crate::report::{describe_value, persist_report, RunReport, WindowReport};

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::init();

    ensure!(args.windows > 0, "--windows must be at least 1");

    let mut config =
        EngineConfig::from_json_file(args.config.as_deref()).context("loading engine config")?;
    if let Some(timeout) = args.call_timeout_ms {
        config.call_timeout_ms = Some(timeout);
    }

    let engine = Engine::new(LuaBackend::new(), config);
    let module_path = args
        .module_path
        .clone()
        .unwrap_or_else(|| args.env_root.clone());
    engine
        .start(&args.env_root, &module_path)
        .context("starting visualization engine")?;
    if let Some(script_path) = &args.script_path {
        engine.set_script_path(script_path);
    }

    let outcome = drive_windows(&engine, &args);
    let stopped = if args.wait && outcome.is_ok() {
        println!("Waiting for all windows to close...");
        engine.wait_for_shutdown()
    } else {
        engine.end()
    };

    let windows = outcome?;
    stopped.map_err(|err| anyhow!("stopping visualization engine: {err}"))?;

    if let Some(path) = &args.report_json {
        let report = RunReport {
            windows,
            dispatched: engine.dispatch_count(),
            final_state: engine.owner_state(),
        };
        persist_report(path, &report)?;
    }
    Ok(())
}

fn drive_windows(engine: &Engine, args: &Args) -> Result<Vec<WindowReport>> {
    let images = args
        .images
        .iter()
        .map(|(name, path)| Ok((name.clone(), load_png(path)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut reports = Vec::with_capacity(args.windows);
    for index in 0..args.windows {
        let mut params = CreateParams::default();
        params.title = Some(match &args.title {
            Some(title) if args.windows > 1 => format!("{title} {}", index + 1),
            Some(title) => title.clone(),
            None => format!("viz_host {}", index + 1),
        });
        let handle = engine.create(params).context("creating window")?;
        println!("Created window {handle}");
        let mut window = WindowReport::new(handle);

        for assignment in &args.assignments {
            engine
                .set_var(handle, &assignment.name, assignment.value.clone())
                .with_context(|| format!("setting {} on window {handle}", assignment.name))?;
        }
        for (name, image) in &images {
            engine
                .set_var(handle, name, image.clone())
                .with_context(|| format!("setting image {name} on window {handle}"))?;
        }

        let ran = if let Some(script) = &args.script {
            engine.set_script(handle, script.as_str())
        } else if let Some(path) = &args.load {
            let mut source = ScriptSource::new(path);
            source.args = args.script_args.clone();
            engine.load_script(handle, source)
        } else {
            Ok(())
        };
        window.output = engine.get_script_output(handle)?;
        for line in &window.output.lines {
            println!("[{handle}] {line}");
        }
        ran.with_context(|| format!("running script in window {handle}"))?;

        if let Some(tool) = &args.tool {
            engine
                .exec_tool(handle, Some(tool))
                .with_context(|| format!("running tool {tool} in window {handle}"))?;
            window.output = engine.get_script_output(handle)?;
            for line in &window.output.lines {
                println!("[{handle}] {line}");
            }
        }

        for query in &args.queries {
            if !engine.is_valid(handle).unwrap_or(false) {
                warn!("window {handle} closed before {} could be read", query.name);
                break;
            }
            let value = engine
                .get_var(handle, &query.name, query.kind)
                .with_context(|| format!("reading {} from window {handle}", query.name))?;
            println!("{handle} {} = {}", query.name, describe_value(&value));
            window.values.insert(query.name.clone(), value);
        }
        reports.push(window);
    }
    Ok(reports)
}

fn load_png(path: &Path) -> Result<Image> {
    let decoded = image::open(path)
        .with_context(|| format!("decoding image {}", path.display()))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    Image::new(
        width,
        height,
        ImageFormat::Rgba,
        ImageDataType::U8,
        decoded.into_raw(),
    )
    .with_context(|| format!("wrapping image {}", path.display()))
}
