//! Property access generation: `.length`, `.capacity`, `.size`, and bitmap
//! field reads. The policy here decides, per receiver shape, whether a
//! property folds to a constant, a dimension, or a `strlen` call.

use crate::error::CompileError;
use crate::generate::Effect;
use crate::registry::{bit_width, TypeInfo};
use crate::symbol::{BitFieldInfo, StructFieldInfo};
use std::collections::HashMap;

/// Everything known about the receiver of a property access at generation
/// time.
pub(crate) struct PropertyCtx<'a> {
    /// Generated C for the receiver expression
    pub current_result_text: String,
    /// The base identifier the chain hangs off
    pub primary_id: String,
    /// Number of subscripts applied to the receiver
    pub subscript_depth: usize,
    /// Qualified struct type, when the receiver is a struct field
    pub previous_struct_type: Option<String>,
    /// Field name, when the receiver is a struct field
    pub previous_member_name: Option<String>,
    /// Registry entry for the base identifier, when one exists
    pub type_info: Option<TypeInfo>,
    /// The parameter name of `main`'s argument array, if inside `main`
    pub main_args_name: Option<String>,
    /// Reusable `strlen` results for single-dimension strings
    pub length_cache: &'a mut HashMap<String, String>,
}

/// The outcome of a property emission: text plus any required effects.
pub(crate) struct PropertyOutput {
    pub text: String,
    pub effects: Vec<Effect>,
}

impl PropertyOutput {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            effects: Vec::new(),
        }
    }

    fn strlen(receiver: &str) -> Self {
        Self {
            text: format!("strlen({})", receiver),
            effects: vec![Effect::IncludeHeader("string.h".to_owned())],
        }
    }

    /// The fallback for receivers whose width the table doesn't know.
    fn placeholder() -> Self {
        Self::plain("/* unsupported type */ 0")
    }
}

fn width_or_placeholder(type_name: &str) -> PropertyOutput {
    match bit_width(type_name) {
        Some(width) => PropertyOutput::plain(width.to_string()),
        None => PropertyOutput::placeholder(),
    }
}

/// Emit `.length` for the receiver described by `ctx`. `field_lookup`
/// resolves struct fields, including fields of transitively included
/// structs.
pub(crate) fn gen_length(
    ctx: &mut PropertyCtx<'_>,
    field_lookup: &dyn Fn(&str, &str) -> Option<StructFieldInfo>,
) -> PropertyOutput {
    // `main`'s argument array reflects the argument count
    if ctx.main_args_name.as_deref() == Some(ctx.primary_id.as_str())
        && ctx.previous_struct_type.is_none()
    {
        return PropertyOutput::plain("argc");
    }

    // Receiver is a struct field
    if let (Some(struct_type), Some(member)) = (
        ctx.previous_struct_type.as_deref(),
        ctx.previous_member_name.as_deref(),
    ) {
        let field = match field_lookup(struct_type, member) {
            Some(field) => field,
            None => return PropertyOutput::placeholder(),
        };
        if field.is_string {
            // A string array has the capacity dimension last; more than one
            // dimension means an array of strings
            if field.dimensions.len() > 1 {
                return if ctx.subscript_depth == 0 {
                    PropertyOutput::plain(field.dimensions[0].to_string())
                } else {
                    PropertyOutput::strlen(&ctx.current_result_text)
                };
            }
            return PropertyOutput::strlen(&ctx.current_result_text);
        }
        if field.is_array {
            return if ctx.subscript_depth < field.dimensions.len() {
                PropertyOutput::plain(
                    field.dimensions[ctx.subscript_depth].to_string(),
                )
            } else {
                width_or_placeholder(&field.base.display_name())
            };
        }
        return width_or_placeholder(&field.base.display_name());
    }

    // Receiver is a plain identifier with registry info
    let info = match ctx.type_info.as_ref() {
        Some(info) => info.clone(),
        None => return PropertyOutput::placeholder(),
    };

    if info.is_string {
        if !info.is_array {
            // Single-dimension string: reuse a precomputed length if one
            // exists for this identifier
            if let Some(cached) = ctx.length_cache.get(&ctx.primary_id) {
                return PropertyOutput::plain(cached.clone());
            }
            let output = PropertyOutput::strlen(&ctx.primary_id);
            ctx.length_cache
                .insert(ctx.primary_id.clone(), output.text.clone());
            return output;
        }
        return if ctx.subscript_depth == 0 {
            PropertyOutput::plain(info.array_dimensions[0].to_string())
        } else {
            PropertyOutput::strlen(&ctx.current_result_text)
        };
    }

    if info.is_array {
        if ctx.subscript_depth < info.array_dimensions.len() {
            return PropertyOutput::plain(
                info.array_dimensions[ctx.subscript_depth].to_string(),
            );
        }
        // Fully subscripted: the element decides
        if info.is_enum {
            return PropertyOutput::plain("32");
        }
        return width_or_placeholder(&info.base_type);
    }

    if info.is_enum {
        return PropertyOutput::plain("32");
    }

    width_or_placeholder(&info.base_type)
}

/// Emit `.capacity` or `.size`. Only string receivers have these; `.size`
/// counts the null terminator, `.capacity` doesn't.
pub(crate) fn gen_capacity_or_size(
    ctx: &PropertyCtx<'_>,
    property: &'static str,
    field_lookup: &dyn Fn(&str, &str) -> Option<StructFieldInfo>,
) -> Result<PropertyOutput, CompileError> {
    let capacity = if let (Some(struct_type), Some(member)) = (
        ctx.previous_struct_type.as_deref(),
        ctx.previous_member_name.as_deref(),
    ) {
        field_lookup(struct_type, member)
            .filter(|field| field.is_string)
            .and_then(|field| field.string_capacity)
    } else {
        ctx.type_info
            .as_ref()
            .filter(|info| info.is_string)
            .and_then(|info| info.string_capacity)
    };

    match capacity {
        Some(capacity) => {
            let value = match property {
                "size" => capacity + 1,
                _ => capacity,
            };
            Ok(PropertyOutput::plain(value.to_string()))
        }
        None => Err(CompileError::CapacitySizeOnNonString { property }),
    }
}

/// The mask covering `width` low bits, safe up to a full 64-bit field.
pub(crate) fn low_bit_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Emit a bitmap field read: a shift plus a mask, single bits without the
/// hex spelling.
pub(crate) fn bitmap_field_read(expr: &str, field: BitFieldInfo) -> String {
    if field.width == 1 {
        format!("(({} >> {}) & 1)", expr, field.offset)
    } else {
        format!(
            "(({} >> {}) & 0x{:X})",
            expr,
            field.offset,
            low_bit_mask(field.width)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeInfo;

    fn no_fields(_: &str, _: &str) -> Option<StructFieldInfo> {
        None
    }

    fn ctx<'a>(
        cache: &'a mut HashMap<String, String>,
        info: Option<TypeInfo>,
    ) -> PropertyCtx<'a> {
        PropertyCtx {
            current_result_text: "arr[2]".to_owned(),
            primary_id: "arr".to_owned(),
            subscript_depth: 0,
            previous_struct_type: None,
            previous_member_name: None,
            type_info: info,
            main_args_name: None,
            length_cache: cache,
        }
    }

    #[test]
    fn test_length_of_array_is_dimension() {
        let mut cache = HashMap::new();
        let info = TypeInfo::plain("u32").with_dimensions(&[5]);
        let mut ctx = ctx(&mut cache, Some(info));
        assert_eq!(gen_length(&mut ctx, &no_fields).text, "5");
    }

    #[test]
    fn test_length_of_subscripted_array_is_bit_width() {
        let mut cache = HashMap::new();
        let info = TypeInfo::plain("u32").with_dimensions(&[5]);
        let mut ctx = ctx(&mut cache, Some(info));
        ctx.subscript_depth = 1;
        assert_eq!(gen_length(&mut ctx, &no_fields).text, "32");
    }

    #[test]
    fn test_length_of_subscripted_enum_array_is_32() {
        let mut cache = HashMap::new();
        let mut info = TypeInfo::plain("Mode").with_dimensions(&[3]);
        info.is_enum = true;
        let mut ctx = ctx(&mut cache, Some(info));
        ctx.subscript_depth = 1;
        assert_eq!(gen_length(&mut ctx, &no_fields).text, "32");
    }

    #[test]
    fn test_length_of_string_uses_strlen_and_cache() {
        let mut cache = HashMap::new();
        let info = TypeInfo::string(16);
        {
            let mut ctx = ctx(&mut cache, Some(info.clone()));
            ctx.primary_id = "name".to_owned();
            let output = gen_length(&mut ctx, &no_fields);
            assert_eq!(output.text, "strlen(name)");
            assert_eq!(
                output.effects,
                vec![Effect::IncludeHeader("string.h".to_owned())]
            );
        }
        // Second access reuses the cached text without a new effect
        {
            let mut ctx = ctx(&mut cache, Some(info));
            ctx.primary_id = "name".to_owned();
            let output = gen_length(&mut ctx, &no_fields);
            assert_eq!(output.text, "strlen(name)");
            assert!(output.effects.is_empty());
        }
    }

    #[test]
    fn test_length_of_main_args_is_argc() {
        let mut cache = HashMap::new();
        let mut ctx = ctx(&mut cache, None);
        ctx.primary_id = "args".to_owned();
        ctx.main_args_name = Some("args".to_owned());
        assert_eq!(gen_length(&mut ctx, &no_fields).text, "argc");
    }

    #[test]
    fn test_size_and_capacity() {
        let mut cache = HashMap::new();
        let info = TypeInfo::string(64);
        let ctx = ctx(&mut cache, Some(info));
        assert_eq!(
            gen_capacity_or_size(&ctx, "size", &no_fields).unwrap().text,
            "65"
        );
        assert_eq!(
            gen_capacity_or_size(&ctx, "capacity", &no_fields)
                .unwrap()
                .text,
            "64"
        );
    }

    #[test]
    fn test_capacity_on_non_string_fails() {
        let mut cache = HashMap::new();
        let info = TypeInfo::plain("u8");
        let ctx = ctx(&mut cache, Some(info));
        assert!(matches!(
            gen_capacity_or_size(&ctx, "capacity", &no_fields),
            Err(CompileError::CapacitySizeOnNonString { .. })
        ));
    }

    #[test]
    fn test_bitmap_field_read() {
        assert_eq!(
            bitmap_field_read(
                "flags",
                BitFieldInfo {
                    offset: 3,
                    width: 1
                }
            ),
            "((flags >> 3) & 1)"
        );
        assert_eq!(
            bitmap_field_read(
                "flags",
                BitFieldInfo {
                    offset: 4,
                    width: 4
                }
            ),
            "((flags >> 4) & 0xF)"
        );
    }
}
