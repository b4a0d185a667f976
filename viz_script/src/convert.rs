//! Conversion between engine values and Lua values.
//!
//! Scalars and strings map onto their Lua counterparts. Structured payloads
//! become tables tagged with a `__viztype` field so they survive a round trip
//! through script code unchanged.

use mlua::{Lua, Result as LuaResult, Table, Value as LuaValue};
use viz_marshal::{Image, ImageDataType, ImageFormat, Rgba, Tensor, Value, ValueKind, VertexBuffer};

use crate::error::ScriptError;

const TYPE_TAG: &str = "__viztype";

pub(crate) fn to_lua<'lua>(lua: &'lua Lua, value: &Value) -> LuaResult<LuaValue<'lua>> {
    match value {
        Value::Int(number) => Ok(LuaValue::Number(f64::from(*number))),
        Value::Double(number) => Ok(LuaValue::Number(*number)),
        Value::Text(text) => Ok(LuaValue::String(lua.create_string(text)?)),
        Value::TextList(items) => Ok(LuaValue::Table(
            lua.create_sequence_from(items.iter().map(String::as_str))?,
        )),
        Value::Tensor(tensor) => {
            let table = tagged(lua, "tensor")?;
            table.set("dims", lua.create_sequence_from(tensor.dims().iter().copied())?)?;
            table.set("data", lua.create_sequence_from(tensor.data().iter().copied())?)?;
            Ok(LuaValue::Table(table))
        }
        Value::TensorShape(shape) => {
            let table = tagged(lua, "tensor_shape")?;
            table.set("dim_count", shape.dim_count)?;
            table.set("element_count", shape.element_count)?;
            Ok(LuaValue::Table(table))
        }
        Value::Image(image) => {
            let table = tagged(lua, "image")?;
            table.set("width", image.width())?;
            table.set("height", image.height())?;
            table.set("format", image.format().name())?;
            table.set("data_type", image.data_type().name())?;
            table.set("data", lua.create_string(image.data())?)?;
            Ok(LuaValue::Table(table))
        }
        Value::Color(color) => {
            let table = tagged(lua, "color")?;
            table.set("r", color.red)?;
            table.set("g", color.green)?;
            table.set("b", color.blue)?;
            table.set("a", color.alpha)?;
            Ok(LuaValue::Table(table))
        }
        Value::Vertices(buffer) => vertices_to_lua(lua, buffer).map(LuaValue::Table),
    }
}

fn tagged<'lua>(lua: &'lua Lua, tag: &str) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;
    table.set(TYPE_TAG, tag)?;
    Ok(table)
}

fn vertices_to_lua<'lua>(lua: &'lua Lua, buffer: &VertexBuffer) -> LuaResult<Table<'lua>> {
    let table = tagged(lua, "vertices")?;
    table.set("primitive", buffer.primitive.name())?;
    table.set("positions", attribute_rows(lua, &buffer.positions)?)?;
    if let Some(normals) = &buffer.normals {
        table.set("normals", attribute_rows(lua, normals)?)?;
    }
    if let Some(colors) = &buffer.colors {
        table.set("colors", attribute_rows(lua, colors)?)?;
    }
    if let Some(tex_coords) = &buffer.tex_coords {
        table.set("tex_coords", attribute_rows(lua, tex_coords)?)?;
    }
    // Lua indices are 1-based.
    table.set(
        "indices",
        lua.create_sequence_from(buffer.indices.iter().map(|index| index + 1))?,
    )?;
    Ok(table)
}

/// One inner sequence per vertex.
fn attribute_rows<'lua, const N: usize>(
    lua: &'lua Lua,
    rows: &[[f32; N]],
) -> LuaResult<Table<'lua>> {
    let list = lua.create_table()?;
    for (index, row) in rows.iter().enumerate() {
        list.set(index + 1, lua.create_sequence_from(row.iter().copied())?)?;
    }
    Ok(list)
}

/// Name of the Lua type for error messages.
pub(crate) fn lua_type_name(value: &LuaValue) -> &'static str {
    match value {
        LuaValue::Table(table) => match table.get::<_, Option<String>>(TYPE_TAG) {
            Ok(Some(tag)) => match tag.as_str() {
                "tensor" => "tensor",
                "tensor_shape" => "tensor_shape",
                "image" => "image",
                "color" => "color",
                "vertices" => "vertices",
                _ => "table",
            },
            _ => "table",
        },
        other => other.type_name(),
    }
}

pub(crate) fn from_lua(name: &str, value: LuaValue, kind: ValueKind) -> Result<Value, ScriptError> {
    if let LuaValue::Nil = value {
        return Err(ScriptError::MissingVariable(name.to_string()));
    }
    let mismatch = |value: &LuaValue| ScriptError::TypeMismatch {
        name: name.to_string(),
        expected: kind,
        found: lua_type_name(value),
    };

    match kind {
        ValueKind::Int => match number(&value) {
            Some(number)
                if number.fract() == 0.0
                    && number >= f64::from(i32::MIN)
                    && number <= f64::from(i32::MAX) =>
            {
                Ok(Value::Int(number as i32))
            }
            _ => Err(mismatch(&value)),
        },
        ValueKind::Double => number(&value).map(Value::Double).ok_or_else(|| mismatch(&value)),
        ValueKind::Text => match &value {
            LuaValue::String(text) => Ok(Value::Text(text.to_str()?.to_string())),
            LuaValue::Integer(number) => Ok(Value::Text(number.to_string())),
            LuaValue::Number(number) => Ok(Value::Text(number.to_string())),
            _ => Err(mismatch(&value)),
        },
        ValueKind::Tensor => tensor(&value)?.map(Value::Tensor).ok_or_else(|| mismatch(&value)),
        ValueKind::TensorShape => tensor(&value)?
            .map(|tensor| Value::TensorShape(tensor.shape()))
            .ok_or_else(|| mismatch(&value)),
        ValueKind::Image => image(&value)?.map(Value::Image).ok_or_else(|| mismatch(&value)),
        ValueKind::Color => color(&value)?.map(Value::Color).ok_or_else(|| mismatch(&value)),
        ValueKind::TextList | ValueKind::Vertices => Err(ScriptError::Unsupported(kind)),
    }
}

fn number(value: &LuaValue) -> Option<f64> {
    match value {
        LuaValue::Integer(number) => Some(*number as f64),
        LuaValue::Number(number) => Some(*number),
        _ => None,
    }
}

fn tagged_table<'lua>(value: &LuaValue<'lua>) -> LuaResult<Option<(Table<'lua>, Option<String>)>> {
    match value {
        LuaValue::Table(table) => {
            let tag = table.get::<_, Option<String>>(TYPE_TAG)?;
            Ok(Some((table.clone(), tag)))
        }
        _ => Ok(None),
    }
}

/// Tagged tensor tables, or plain number sequences read as 1-D tensors.
fn tensor(value: &LuaValue) -> Result<Option<Tensor>, ScriptError> {
    let Some((table, tag)) = tagged_table(value)? else {
        return Ok(None);
    };
    match tag.as_deref() {
        Some("tensor") => {
            let dims_table: Table = table.get("dims")?;
            let data_table: Table = table.get("data")?;
            let dims = dims_table
                .sequence_values::<usize>()
                .collect::<LuaResult<Vec<_>>>()?;
            let data = data_table
                .sequence_values::<f64>()
                .collect::<LuaResult<Vec<_>>>()?;
            Ok(Some(Tensor::new(dims, data)?))
        }
        Some(_) => Ok(None),
        None => {
            let data = table
                .sequence_values::<f64>()
                .collect::<LuaResult<Vec<_>>>()?;
            Ok(Some(Tensor::new(vec![data.len()], data)?))
        }
    }
}

fn image(value: &LuaValue) -> Result<Option<Image>, ScriptError> {
    let Some((table, Some(tag))) = tagged_table(value)? else {
        return Ok(None);
    };
    if tag != "image" {
        return Ok(None);
    }
    let format_name: String = table.get("format")?;
    let data_type_name: String = table.get("data_type")?;
    let Some(format) = ImageFormat::from_name(&format_name) else {
        return Ok(None);
    };
    let Some(data_type) = ImageDataType::from_name(&data_type_name) else {
        return Ok(None);
    };
    let data: mlua::String = table.get("data")?;
    Ok(Some(Image::new(
        table.get("width")?,
        table.get("height")?,
        format,
        data_type,
        data.as_bytes().to_vec(),
    )?))
}

/// Tagged color tables, or `{r, g, b[, a]}` sequences.
fn color(value: &LuaValue) -> Result<Option<Rgba>, ScriptError> {
    let Some((table, tag)) = tagged_table(value)? else {
        return Ok(None);
    };
    match tag.as_deref() {
        Some("color") => Ok(Some(Rgba::new(
            table.get("r")?,
            table.get("g")?,
            table.get("b")?,
            table.get::<_, Option<f64>>("a")?.unwrap_or(1.0),
        ))),
        Some(_) => Ok(None),
        None => {
            let parts = table
                .sequence_values::<f64>()
                .collect::<LuaResult<Vec<_>>>()?;
            match parts.as_slice() {
                [r, g, b] => Ok(Some(Rgba::new(*r, *g, *b, 1.0))),
                [r, g, b, a] => Ok(Some(Rgba::new(*r, *g, *b, *a))),
                _ => Ok(None),
            }
        }
    }
}
