//! Typed variable payloads carried by `SetVar` / `GetVar` requests.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Shape problems detected before a payload ever leaves the calling thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("tensor declares {expected} elements but carries {actual}")]
    TensorLength { expected: usize, actual: usize },
    #[error("tensor must have at least one dimension")]
    TensorRank,
    #[error("image {width}x{height} {format:?}/{data_type:?} needs {expected} bytes, got {actual}")]
    ImageLength {
        width: u32,
        height: u32,
        format: ImageFormat,
        data_type: ImageDataType,
        expected: usize,
        actual: usize,
    },
    #[error("vertex buffer {field} has {actual} entries for {vertices} vertices")]
    VertexAttribute {
        field: &'static str,
        vertices: usize,
        actual: usize,
    },
    #[error("vertex index {index} is out of range for {vertices} vertices")]
    VertexIndex { index: u32, vertices: usize },
    #[error("{what} size overflows the address space")]
    TooLarge { what: &'static str },
}

/// N-dimensional array of doubles, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tensor {
    dims: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    pub fn new(dims: Vec<usize>, data: Vec<f64>) -> Result<Self, PayloadError> {
        if dims.is_empty() {
            return Err(PayloadError::TensorRank);
        }
        let expected = dims
            .iter()
            .try_fold(1usize, |total, &dim| total.checked_mul(dim))
            .ok_or(PayloadError::TooLarge { what: "tensor" })?;
        if expected != data.len() {
            return Err(PayloadError::TensorLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Tensor { dims, data })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn shape(&self) -> TensorShape {
        TensorShape {
            dim_count: self.dims.len(),
            element_count: self.data.len(),
        }
    }

    pub fn into_parts(self) -> (Vec<usize>, Vec<f64>) {
        (self.dims, self.data)
    }
}

/// Dimension and element counts of a tensor variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TensorShape {
    pub dim_count: usize,
    pub element_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImageFormat {
    Luminance,
    LuminanceAlpha,
    Rgb,
    Rgba,
    Bgr,
    Bgra,
}

impl ImageFormat {
    pub fn components(self) -> usize {
        match self {
            ImageFormat::Luminance => 1,
            ImageFormat::LuminanceAlpha => 2,
            ImageFormat::Rgb | ImageFormat::Bgr => 3,
            ImageFormat::Rgba | ImageFormat::Bgra => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Luminance => "luminance",
            ImageFormat::LuminanceAlpha => "luminance_alpha",
            ImageFormat::Rgb => "rgb",
            ImageFormat::Rgba => "rgba",
            ImageFormat::Bgr => "bgr",
            ImageFormat::Bgra => "bgra",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "luminance" => Some(ImageFormat::Luminance),
            "luminance_alpha" => Some(ImageFormat::LuminanceAlpha),
            "rgb" => Some(ImageFormat::Rgb),
            "rgba" => Some(ImageFormat::Rgba),
            "bgr" => Some(ImageFormat::Bgr),
            "bgra" => Some(ImageFormat::Bgra),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImageDataType {
    U8,
    U16,
    F32,
}

impl ImageDataType {
    pub fn bytes(self) -> usize {
        match self {
            ImageDataType::U8 => 1,
            ImageDataType::U16 => 2,
            ImageDataType::F32 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageDataType::U8 => "u8",
            ImageDataType::U16 => "u16",
            ImageDataType::F32 => "f32",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "u8" => Some(ImageDataType::U8),
            "u16" => Some(ImageDataType::U16),
            "f32" => Some(ImageDataType::F32),
            _ => None,
        }
    }
}

/// Tightly packed image buffer plus the descriptor needed to interpret it.
#[derive(Clone, PartialEq, Serialize)]
pub struct Image {
    width: u32,
    height: u32,
    format: ImageFormat,
    data_type: ImageDataType,
    #[serde(skip)]
    data: Vec<u8>,
}

impl Image {
    pub fn new(
        width: u32,
        height: u32,
        format: ImageFormat,
        data_type: ImageDataType,
        data: Vec<u8>,
    ) -> Result<Self, PayloadError> {
        let expected = [
            height as usize,
            format.components(),
            data_type.bytes(),
        ]
        .into_iter()
        .try_fold(width as usize, usize::checked_mul)
        .ok_or(PayloadError::TooLarge { what: "image" })?;
        if data.len() != expected {
            return Err(PayloadError::ImageLength {
                width,
                height,
                format,
                data_type,
                expected,
                actual: data.len(),
            });
        }
        Ok(Image {
            width,
            height,
            format,
            data_type,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn data_type(&self) -> ImageDataType {
        self.data_type
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.format.components() * self.data_type.bytes()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("data_type", &self.data_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rgba {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl Rgba {
    pub fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Rgba {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.red, self.green, self.blue, self.alpha]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Primitive {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Points => "points",
            Primitive::Lines => "lines",
            Primitive::LineStrip => "line_strip",
            Primitive::LineLoop => "line_loop",
            Primitive::Triangles => "triangles",
            Primitive::TriangleStrip => "triangle_strip",
            Primitive::TriangleFan => "triangle_fan",
        }
    }
}

/// Vertex array handed to the renderer. Optional attributes must have one
/// entry per vertex; indices must stay in range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VertexBuffer {
    pub primitive: Primitive,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub colors: Option<Vec<[f32; 4]>>,
    pub tex_coords: Option<Vec<[f32; 2]>>,
    pub indices: Vec<u32>,
}

impl VertexBuffer {
    pub fn validate(&self) -> Result<(), PayloadError> {
        let vertices = self.positions.len();
        check_attribute("normals", vertices, self.normals.as_ref().map(Vec::len))?;
        check_attribute("colors", vertices, self.colors.as_ref().map(Vec::len))?;
        check_attribute("tex_coords", vertices, self.tex_coords.as_ref().map(Vec::len))?;
        if let Some(&index) = self.indices.iter().find(|&&idx| idx as usize >= vertices) {
            return Err(PayloadError::VertexIndex { index, vertices });
        }
        Ok(())
    }
}

fn check_attribute(
    field: &'static str,
    vertices: usize,
    len: Option<usize>,
) -> Result<(), PayloadError> {
    match len {
        Some(actual) if actual != vertices => Err(PayloadError::VertexAttribute {
            field,
            vertices,
            actual,
        }),
        _ => Ok(()),
    }
}

/// Value assigned to, or read from, a script variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Int(i32),
    Double(f64),
    Text(String),
    TextList(Vec<String>),
    Tensor(Tensor),
    TensorShape(TensorShape),
    Image(Image),
    Color(Rgba),
    Vertices(VertexBuffer),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Double(_) => ValueKind::Double,
            Value::Text(_) => ValueKind::Text,
            Value::TextList(_) => ValueKind::TextList,
            Value::Tensor(_) => ValueKind::Tensor,
            Value::TensorShape(_) => ValueKind::TensorShape,
            Value::Image(_) => ValueKind::Image,
            Value::Color(_) => ValueKind::Color,
            Value::Vertices(_) => ValueKind::Vertices,
        }
    }

    /// Checks internal consistency of the payload. Runs on the calling
    /// thread so malformed data never reaches the owner thread. Tensors and
    /// images are checked by their constructors already.
    pub fn validate(&self) -> Result<(), PayloadError> {
        match self {
            Value::Vertices(buffer) => buffer.validate(),
            _ => Ok(()),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::TextList(value)
    }
}

impl From<Tensor> for Value {
    fn from(value: Tensor) -> Self {
        Value::Tensor(value)
    }
}

impl From<Image> for Value {
    fn from(value: Image) -> Self {
        Value::Image(value)
    }
}

impl From<Rgba> for Value {
    fn from(value: Rgba) -> Self {
        Value::Color(value)
    }
}

impl From<VertexBuffer> for Value {
    fn from(value: VertexBuffer) -> Self {
        Value::Vertices(value)
    }
}

/// Tag selecting which representation a `GetVar` request wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Int,
    Double,
    Text,
    TextList,
    Tensor,
    TensorShape,
    Image,
    Color,
    Vertices,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Double => "double",
            ValueKind::Text => "text",
            ValueKind::TextList => "text_list",
            ValueKind::Tensor => "tensor",
            ValueKind::TensorShape => "tensor_shape",
            ValueKind::Image => "image",
            ValueKind::Color => "color",
            ValueKind::Vertices => "vertices",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(ValueKind::Int),
            "double" | "float" => Some(ValueKind::Double),
            "text" | "string" => Some(ValueKind::Text),
            "text_list" => Some(ValueKind::TextList),
            "tensor" => Some(ValueKind::Tensor),
            "tensor_shape" => Some(ValueKind::TensorShape),
            "image" => Some(ValueKind::Image),
            "color" => Some(ValueKind::Color),
            "vertices" => Some(ValueKind::Vertices),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
