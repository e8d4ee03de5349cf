//! NetCDF element-kind mapping and windowed reads.
//!
//! The NetCDF numeric kinds form a closed set; reads dispatch over it
//! once per call and land in a variant array of the matching kind.

use std::ops::Range;

use cf_common::{CfError, CfResult, ElementKind, VariantArray};

/// Wrap a NetCDF library error with call-site context.
pub fn nc_error(context: &str, err: netcdf::error::Error) -> CfError {
    CfError::NetCdf(format!("{}: {}", context, err))
}

/// Map a NetCDF variable type onto an element kind. `None` for
/// non-numeric types.
pub fn element_kind(vartype: &netcdf::types::VariableType) -> Option<ElementKind> {
    use netcdf::types::{BasicType, VariableType};
    match vartype {
        VariableType::Basic(basic) => match basic {
            BasicType::Byte => Some(ElementKind::I8),
            BasicType::Ubyte => Some(ElementKind::U8),
            BasicType::Short => Some(ElementKind::I16),
            BasicType::Ushort => Some(ElementKind::U16),
            BasicType::Int => Some(ElementKind::I32),
            BasicType::Uint => Some(ElementKind::U32),
            BasicType::Int64 => Some(ElementKind::I64),
            BasicType::Uint64 => Some(ElementKind::U64),
            BasicType::Float => Some(ElementKind::F32),
            BasicType::Double => Some(ElementKind::F64),
            _ => None,
        },
        _ => None,
    }
}

/// Read the window `(starts, counts)` of `var`, in the variable's
/// declared dimension order, as a variant array of its kind.
///
/// The caller must hold the file's mutex across this call.
pub fn read_window(
    var: &netcdf::Variable<'_>,
    starts: &[usize],
    counts: &[usize],
) -> CfResult<VariantArray> {
    let kind = element_kind(&var.vartype()).ok_or_else(|| {
        CfError::Contract(format!(
            "variable \"{}\" has an unsupported element type",
            var.name()
        ))
    })?;

    let extents: Vec<Range<usize>> = starts
        .iter()
        .zip(counts)
        .map(|(&start, &count)| start..start + count)
        .collect();

    macro_rules! read {
        ($ty:ty) => {
            VariantArray::from(var.get_values::<$ty, _>(extents.clone()).map_err(|e| {
                nc_error(&format!("failed to read variable \"{}\"", var.name()), e)
            })?)
        };
    }

    Ok(match kind {
        ElementKind::I8 => read!(i8),
        ElementKind::I16 => read!(i16),
        ElementKind::I32 => read!(i32),
        ElementKind::I64 => read!(i64),
        ElementKind::U8 => read!(u8),
        ElementKind::U16 => read!(u16),
        ElementKind::U32 => read!(u32),
        ElementKind::U64 => read!(u64),
        ElementKind::F32 => read!(f32),
        ElementKind::F64 => read!(f64),
        ElementKind::Str => {
            return Err(CfError::Contract(format!(
                "variable \"{}\" is not numeric",
                var.name()
            )))
        }
    })
}

/// Read a variable in full.
pub fn read_all(var: &netcdf::Variable<'_>) -> CfResult<VariantArray> {
    let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let starts = vec![0; dims.len()];
    read_window(var, &starts, &dims)
}

/// Trim trailing ASCII whitespace and NULs from a text attribute.
/// Fortran writers pad fixed-length strings with blanks or leave them
/// unterminated.
pub fn trim_text(s: &str) -> String {
    s.trim_end_matches(&['\0', ' ', '\t', '\r', '\n'][..]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_text() {
        assert_eq!(trim_text("degrees_north \t\r\n\0"), "degrees_north");
        assert_eq!(trim_text("K"), "K");
        assert_eq!(trim_text(""), "");
        // leading whitespace is significant
        assert_eq!(trim_text(" K "), " K");
    }
}
