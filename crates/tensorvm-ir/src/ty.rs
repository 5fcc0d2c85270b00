//! Type language: tensor types with static shapes and element dtypes.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Element type code, following the `{code, bits, lanes}` descriptor
/// convention of dense tensor frameworks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DTypeCode {
    /// Signed integer.
    Int,
    /// Unsigned integer. Booleans are `uint` with 1 bit.
    UInt,
    /// IEEE float.
    Float,
}

impl fmt::Display for DTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DTypeCode::Int => write!(f, "int"),
            DTypeCode::UInt => write!(f, "uint"),
            DTypeCode::Float => write!(f, "float"),
        }
    }
}

/// Element data type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    /// Type code (int/uint/float).
    pub code: DTypeCode,
    /// Bits per lane.
    pub bits: u8,
    /// Vector lanes (1 for scalar element types).
    pub lanes: u16,
}

impl DataType {
    pub const fn new(code: DTypeCode, bits: u8, lanes: u16) -> Self {
        Self { code, bits, lanes }
    }

    /// 32-bit float, the workhorse element type.
    pub const fn float32() -> Self {
        Self::new(DTypeCode::Float, 32, 1)
    }

    /// 32-bit signed integer.
    pub const fn int32() -> Self {
        Self::new(DTypeCode::Int, 32, 1)
    }

    /// Boolean, represented as a 1-bit unsigned integer.
    pub const fn bool_() -> Self {
        Self::new(DTypeCode::UInt, 1, 1)
    }

    pub fn is_bool(&self) -> bool {
        *self == Self::bool_()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bool() {
            return write!(f, "bool");
        }
        write!(f, "{}{}", self.code, self.bits)?;
        if self.lanes != 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

/// Error parsing a dtype from its textual form.
#[derive(Debug, Error)]
#[error("malformed dtype: {0}")]
pub struct DTypeParseError(pub String);

impl FromStr for DataType {
    type Err = DTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "bool" {
            return Ok(DataType::bool_());
        }
        let (code, rest) = if let Some(rest) = s.strip_prefix("uint") {
            (DTypeCode::UInt, rest)
        } else if let Some(rest) = s.strip_prefix("int") {
            (DTypeCode::Int, rest)
        } else if let Some(rest) = s.strip_prefix("float") {
            (DTypeCode::Float, rest)
        } else {
            return Err(DTypeParseError(s.to_string()));
        };
        let (bits, lanes) = match rest.split_once('x') {
            Some((b, l)) => (b, Some(l)),
            None => (rest, None),
        };
        let bits: u8 = bits.parse().map_err(|_| DTypeParseError(s.to_string()))?;
        let lanes: u16 = match lanes {
            Some(l) => l.parse().map_err(|_| DTypeParseError(s.to_string()))?,
            None => 1,
        };
        Ok(DataType { code, bits, lanes })
    }
}

/// A single tensor dimension. Symbolic dimensions type-check but cannot
/// reach the bytecode compiler, which demands fully static shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShapeDim {
    /// Statically known extent.
    Fixed(i64),
    /// Named symbolic extent.
    Sym(String),
}

impl fmt::Display for ShapeDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeDim::Fixed(d) => write!(f, "{}", d),
            ShapeDim::Sym(name) => write!(f, "{}", name),
        }
    }
}

/// Error raised when a symbolic dimension reaches a context that needs a
/// static shape.
#[derive(Debug, Error)]
#[error("shape dimension `{0}` is not statically known")]
pub struct DynamicShapeError(pub String);

/// The type of a tensor value: shape plus element dtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    /// Ordered dimensions, outermost first.
    pub shape: Vec<ShapeDim>,
    /// Element data type.
    pub dtype: DataType,
}

impl TensorType {
    pub fn new(shape: Vec<i64>, dtype: DataType) -> Self {
        Self {
            shape: shape.into_iter().map(ShapeDim::Fixed).collect(),
            dtype,
        }
    }

    /// A rank-0 boolean tensor, the shape of branch conditions.
    pub fn scalar_bool() -> Self {
        Self::new(vec![], DataType::bool_())
    }

    /// Resolve the shape to concrete extents, erroring on symbolic dims.
    pub fn static_shape(&self) -> Result<Vec<i64>, DynamicShapeError> {
        self.shape
            .iter()
            .map(|dim| match dim {
                ShapeDim::Fixed(d) => Ok(*d),
                ShapeDim::Sym(name) => Err(DynamicShapeError(name.clone())),
            })
            .collect()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor[(")?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "), {}]", self.dtype)
    }
}

/// The type of a function value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    /// Parameter types, in order.
    pub params: Vec<Type>,
    /// Return type.
    pub ret: Box<Type>,
}

/// An IR type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Tensor type.
    Tensor(TensorType),
    /// Function type.
    Func(FuncType),
}

impl Type {
    /// Shorthand for a fixed-shape tensor type.
    pub fn tensor(shape: Vec<i64>, dtype: DataType) -> Self {
        Type::Tensor(TensorType::new(shape, dtype))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(tt) => Some(tt),
            Type::Func(_) => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tt) => write!(f, "{}", tt),
            Type::Func(ft) => {
                write!(f, "fn(")?;
                for (i, p) in ft.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ft.ret)
            }
        }
    }
}
