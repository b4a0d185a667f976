use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use viz_marshal::{Handle, OwnerState, ScriptOutput, Value};

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub windows: Vec<WindowReport>,
    pub dispatched: u64,
    pub final_state: OwnerState,
}

#[derive(Debug, Serialize)]
pub struct WindowReport {
    pub handle: Handle,
    pub output: ScriptOutput,
    pub values: BTreeMap<String, Value>,
}

impl WindowReport {
    pub fn new(handle: Handle) -> Self {
        WindowReport {
            handle,
            output: ScriptOutput::default(),
            values: BTreeMap::new(),
        }
    }
}

pub fn persist_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("serializing run report to JSON")?;
    fs::write(path, json).with_context(|| format!("writing run report to {}", path.display()))?;
    println!("Saved run report to {}", path.display());
    Ok(())
}

/// One-line rendering of a variable for the console.
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Int(number) => number.to_string(),
        Value::Double(number) => number.to_string(),
        Value::Text(text) => text.clone(),
        Value::TextList(items) => items.join(", "),
        Value::Tensor(tensor) => format!("tensor {:?} {:?}", tensor.dims(), tensor.data()),
        Value::TensorShape(shape) => format!(
            "{} dims, {} elements",
            shape.dim_count, shape.element_count
        ),
        Value::Image(image) => format!(
            "image {}x{} {}/{}",
            image.width(),
            image.height(),
            image.format().name(),
            image.data_type().name()
        ),
        Value::Color(color) => format!(
            "rgba({:.3}, {:.3}, {:.3}, {:.3})",
            color.red, color.green, color.blue, color.alpha
        ),
        Value::Vertices(buffer) => format!(
            "{} vertices ({})",
            buffer.positions.len(),
            buffer.primitive.name()
        ),
    }
}
