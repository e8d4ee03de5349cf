//! Variant-typed numeric arrays.
//!
//! A `VariantArray` is a homogeneous buffer whose element kind is
//! fixed at creation. The kind tag travels with the data and drives
//! stream decoding, so every operation here preserves it.

use num_traits::NumCast;

use crate::error::{CfError, CfResult};

/// Element kinds a variant array can hold. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Str,
}

impl ElementKind {
    /// Stable integer tag used in the binary stream encoding.
    pub fn type_code(self) -> u8 {
        match self {
            ElementKind::I8 => 1,
            ElementKind::I16 => 2,
            ElementKind::I32 => 3,
            ElementKind::I64 => 4,
            ElementKind::U8 => 5,
            ElementKind::U16 => 6,
            ElementKind::U32 => 7,
            ElementKind::U64 => 8,
            ElementKind::F32 => 9,
            ElementKind::F64 => 10,
            ElementKind::Str => 11,
        }
    }

    /// Inverse of [`type_code`](Self::type_code).
    pub fn from_type_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => ElementKind::I8,
            2 => ElementKind::I16,
            3 => ElementKind::I32,
            4 => ElementKind::I64,
            5 => ElementKind::U8,
            6 => ElementKind::U16,
            7 => ElementKind::U32,
            8 => ElementKind::U64,
            9 => ElementKind::F32,
            10 => ElementKind::F64,
            11 => ElementKind::Str,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElementKind::I8 => "i8",
            ElementKind::I16 => "i16",
            ElementKind::I32 => "i32",
            ElementKind::I64 => "i64",
            ElementKind::U8 => "u8",
            ElementKind::U16 => "u16",
            ElementKind::U32 => "u32",
            ElementKind::U64 => "u64",
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
            ElementKind::Str => "str",
        };
        f.write_str(name)
    }
}

/// Type-erased array over the closed set of element kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantArray {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

/// Instantiate an operation for each numeric element kind, plus a
/// string arm. The second form binds a named alias for the concrete
/// element type.
macro_rules! dispatch {
    ($value:expr, |$v:ident| $body:expr, |$s:ident| $str_body:expr) => {
        match $value {
            VariantArray::I8($v) => $body,
            VariantArray::I16($v) => $body,
            VariantArray::I32($v) => $body,
            VariantArray::I64($v) => $body,
            VariantArray::U8($v) => $body,
            VariantArray::U16($v) => $body,
            VariantArray::U32($v) => $body,
            VariantArray::U64($v) => $body,
            VariantArray::F32($v) => $body,
            VariantArray::F64($v) => $body,
            VariantArray::Str($s) => $str_body,
        }
    };
    ($value:expr, |$v:ident : $t:ident| $body:expr, |$s:ident| $str_body:expr) => {
        match $value {
            VariantArray::I8($v) => {
                type $t = i8;
                $body
            }
            VariantArray::I16($v) => {
                type $t = i16;
                $body
            }
            VariantArray::I32($v) => {
                type $t = i32;
                $body
            }
            VariantArray::I64($v) => {
                type $t = i64;
                $body
            }
            VariantArray::U8($v) => {
                type $t = u8;
                $body
            }
            VariantArray::U16($v) => {
                type $t = u16;
                $body
            }
            VariantArray::U32($v) => {
                type $t = u32;
                $body
            }
            VariantArray::U64($v) => {
                type $t = u64;
                $body
            }
            VariantArray::F32($v) => {
                type $t = f32;
                $body
            }
            VariantArray::F64($v) => {
                type $t = f64;
                $body
            }
            VariantArray::Str($s) => $str_body,
        }
    };
}

impl VariantArray {
    /// Create an empty array of the given kind.
    pub fn new(kind: ElementKind) -> Self {
        match kind {
            ElementKind::I8 => VariantArray::I8(Vec::new()),
            ElementKind::I16 => VariantArray::I16(Vec::new()),
            ElementKind::I32 => VariantArray::I32(Vec::new()),
            ElementKind::I64 => VariantArray::I64(Vec::new()),
            ElementKind::U8 => VariantArray::U8(Vec::new()),
            ElementKind::U16 => VariantArray::U16(Vec::new()),
            ElementKind::U32 => VariantArray::U32(Vec::new()),
            ElementKind::U64 => VariantArray::U64(Vec::new()),
            ElementKind::F32 => VariantArray::F32(Vec::new()),
            ElementKind::F64 => VariantArray::F64(Vec::new()),
            ElementKind::Str => VariantArray::Str(Vec::new()),
        }
    }

    /// Create a zero-filled array of the given kind and length.
    pub fn with_len(kind: ElementKind, n: usize) -> Self {
        let mut arr = Self::new(kind);
        arr.resize(n);
        arr
    }

    /// The element kind chosen at creation.
    pub fn kind(&self) -> ElementKind {
        match self {
            VariantArray::I8(_) => ElementKind::I8,
            VariantArray::I16(_) => ElementKind::I16,
            VariantArray::I32(_) => ElementKind::I32,
            VariantArray::I64(_) => ElementKind::I64,
            VariantArray::U8(_) => ElementKind::U8,
            VariantArray::U16(_) => ElementKind::U16,
            VariantArray::U32(_) => ElementKind::U32,
            VariantArray::U64(_) => ElementKind::U64,
            VariantArray::F32(_) => ElementKind::F32,
            VariantArray::F64(_) => ElementKind::F64,
            VariantArray::Str(_) => ElementKind::Str,
        }
    }

    /// Stable integer tag for the element kind.
    pub fn type_code(&self) -> u8 {
        self.kind().type_code()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        dispatch!(self, |v| v.len(), |s| s.len())
    }

    /// Check if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resize in place, zero/empty filling on growth.
    pub fn resize(&mut self, n: usize) {
        dispatch!(self, |v: T| v.resize(n, T::default()), |s| s
            .resize(n, String::new()))
    }

    /// Append the contents of `other`. The kinds must match.
    pub fn append(&mut self, other: &VariantArray) -> CfResult<()> {
        if self.kind() != other.kind() {
            return Err(CfError::Contract(format!(
                "cannot append {} array to {} array",
                other.kind(),
                self.kind()
            )));
        }
        match (self, other) {
            (VariantArray::I8(a), VariantArray::I8(b)) => a.extend_from_slice(b),
            (VariantArray::I16(a), VariantArray::I16(b)) => a.extend_from_slice(b),
            (VariantArray::I32(a), VariantArray::I32(b)) => a.extend_from_slice(b),
            (VariantArray::I64(a), VariantArray::I64(b)) => a.extend_from_slice(b),
            (VariantArray::U8(a), VariantArray::U8(b)) => a.extend_from_slice(b),
            (VariantArray::U16(a), VariantArray::U16(b)) => a.extend_from_slice(b),
            (VariantArray::U32(a), VariantArray::U32(b)) => a.extend_from_slice(b),
            (VariantArray::U64(a), VariantArray::U64(b)) => a.extend_from_slice(b),
            (VariantArray::F32(a), VariantArray::F32(b)) => a.extend_from_slice(b),
            (VariantArray::F64(a), VariantArray::F64(b)) => a.extend_from_slice(b),
            (VariantArray::Str(a), VariantArray::Str(b)) => a.extend_from_slice(b),
            _ => unreachable!("kind equality checked above"),
        }
        Ok(())
    }

    /// Fetch element `i`, coerced to `T`. `None` if out of bounds,
    /// not representable, or the array holds strings.
    pub fn get<T: NumCast>(&self, i: usize) -> Option<T> {
        dispatch!(self, |v| v.get(i).and_then(|x| T::from(*x)), |_s| None)
    }

    /// Store `value` at index `i` with numeric coercion.
    pub fn set<T: NumCast + Copy>(&mut self, i: usize, value: T) -> CfResult<()> {
        let kind = self.kind();
        let n = self.len();
        if i >= n {
            return Err(CfError::Range(format!(
                "index {} out of bounds for array of length {}",
                i, n
            )));
        }
        dispatch!(
            self,
            |v: E| {
                let cast: E = NumCast::from(value).ok_or_else(|| {
                    CfError::Contract(format!("value is not representable as {}", kind))
                })?;
                v[i] = cast;
                Ok(())
            },
            |_s| Err(CfError::Contract(
                "cannot store a numeric value in a string array".to_string()
            ))
        )
    }

    /// Fetch string element `i`. `None` for numeric arrays.
    pub fn get_str(&self, i: usize) -> Option<&str> {
        match self {
            VariantArray::Str(s) => s.get(i).map(|x| x.as_str()),
            _ => None,
        }
    }

    /// Store a string at index `i`.
    pub fn set_str(&mut self, i: usize, value: &str) -> CfResult<()> {
        match self {
            VariantArray::Str(s) => {
                let slot = s.get_mut(i).ok_or_else(|| {
                    CfError::Range(format!("index {} out of bounds", i))
                })?;
                *slot = value.to_string();
                Ok(())
            }
            _ => Err(CfError::Contract(
                "cannot store a string in a numeric array".to_string(),
            )),
        }
    }

    /// Clone the inclusive index range `[lo, hi]` into a new array of
    /// the same kind.
    pub fn new_copy(&self, lo: usize, hi: usize) -> CfResult<VariantArray> {
        let n = self.len();
        if lo > hi || hi >= n {
            return Err(CfError::Range(format!(
                "range [{}, {}] out of bounds for array of length {}",
                lo, hi, n
            )));
        }
        Ok(dispatch!(
            self,
            |v| v[lo..=hi].to_vec().into(),
            |s| VariantArray::Str(s[lo..=hi].to_vec())
        ))
    }

    /// Collect the values coerced to f64. `None` for string arrays.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        dispatch!(
            self,
            |v| v.iter().map(|x| NumCast::from(*x)).collect(),
            |_s| None
        )
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<Vec<$ty>> for VariantArray {
            fn from(v: Vec<$ty>) -> Self {
                VariantArray::$variant(v)
            }
        })*
    };
}

impl_from_vec!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, String => Str,
);
