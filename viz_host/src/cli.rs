use std::path::PathBuf;

use clap::Parser;
use viz_marshal::{Rgba, Value, ValueKind};

#[derive(Parser, Debug)]
#[command(
    about = "Drives Lua visualization windows through the cross-thread engine",
    version
)]
pub struct Args {
    /// Engine environment root
    #[arg(long, default_value = ".")]
    pub env_root: PathBuf,

    /// Directory searched by `require` (defaults to the environment root)
    #[arg(long)]
    pub module_path: Option<PathBuf>,

    /// Optional JSON engine config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Per-call timeout in milliseconds (overrides the config file)
    #[arg(long)]
    pub call_timeout_ms: Option<u64>,

    /// Number of windows to create
    #[arg(long, default_value_t = 1)]
    pub windows: usize,

    /// Window title
    #[arg(long)]
    pub title: Option<String>,

    /// Directory that relative --load paths are resolved against
    #[arg(long)]
    pub script_path: Option<PathBuf>,

    /// Inline Lua script to run in every window
    #[arg(long, conflicts_with = "load")]
    pub script: Option<String>,

    /// Lua script file to load into every window
    #[arg(long)]
    pub load: Option<PathBuf>,

    /// Argument exposed to loaded scripts through ScriptArgs (repeatable)
    #[arg(long = "arg", value_name = "ARG")]
    pub script_args: Vec<String>,

    /// Assign a variable before the script runs: int, float, #rrggbb[aa] or text
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub assignments: Vec<Assignment>,

    /// Assign a PNG image variable before the script runs
    #[arg(long = "image", value_name = "NAME=FILE", value_parser = parse_image_assignment)]
    pub images: Vec<(String, PathBuf)>,

    /// Re-run the script in tool mode with this tool name afterwards
    #[arg(long)]
    pub tool: Option<String>,

    /// Read a variable back after the script ran
    #[arg(long = "get", value_name = "NAME[:KIND]", value_parser = parse_query)]
    pub queries: Vec<Query>,

    /// Keep the engine up until every window has been closed by its script
    #[arg(long)]
    pub wait: bool,

    /// Path to write a JSON report of script output and queried variables
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub name: String,
    pub kind: ValueKind,
}

fn split_name<'a>(raw: &'a str, separator: char, what: &str) -> Result<(&'a str, &'a str), String> {
    let (name, rest) = raw
        .split_once(separator)
        .ok_or_else(|| format!("expected {what}, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    Ok((name, rest))
}

fn parse_assignment(raw: &str) -> Result<Assignment, String> {
    let (name, value) = split_name(raw, '=', "NAME=VALUE")?;
    Ok(Assignment {
        name: name.to_string(),
        value: parse_value(value)?,
    })
}

fn parse_value(raw: &str) -> Result<Value, String> {
    if let Ok(number) = raw.parse::<i32>() {
        return Ok(Value::Int(number));
    }
    if let Ok(number) = raw.parse::<f64>() {
        return Ok(Value::Double(number));
    }
    if let Some(hex) = raw.strip_prefix('#') {
        return parse_color(hex).map(Value::Color);
    }
    Ok(Value::Text(raw.to_string()))
}

fn parse_color(hex: &str) -> Result<Rgba, String> {
    if !hex.is_ascii() || !matches!(hex.len(), 6 | 8) {
        return Err(format!("color '#{hex}' must have 6 or 8 hex digits"));
    }
    let mut channels = [1.0; 4];
    for (index, slot) in channels.iter_mut().enumerate().take(hex.len() / 2) {
        let byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16)
            .map_err(|_| format!("color '#{hex}' is not valid hex"))?;
        *slot = f64::from(byte) / 255.0;
    }
    Ok(Rgba::new(channels[0], channels[1], channels[2], channels[3]))
}

fn parse_image_assignment(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = split_name(raw, '=', "NAME=FILE")?;
    if path.is_empty() {
        return Err(format!("missing image path in '{raw}'"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn parse_query(raw: &str) -> Result<Query, String> {
    let (name, kind) = match raw.split_once(':') {
        Some((name, kind)) => {
            let kind = ValueKind::from_name(kind.trim())
                .ok_or_else(|| format!("unknown variable kind '{kind}'"))?;
            (name.trim(), kind)
        }
        None => (raw.trim(), ValueKind::Text),
    };
    if name.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    Ok(Query {
        name: name.to_string(),
        kind,
    })
}
