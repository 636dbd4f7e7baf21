//! The code-generation-local type registry: identifier → type info for one
//! translation unit. Never a module global; the generator owns one per run
//! and passes it around explicitly.

use crate::ast::OverflowBehavior;
use crate::symbol::{BaseType, ParamInfo, SymbolIndex, VariableSymbol};
use std::collections::HashMap;

/// The fixed bit-width table. Source spellings and their C spellings map
/// identically; `bool` is one bit.
pub fn bit_width(type_name: &str) -> Option<u32> {
    match type_name {
        "u8" | "i8" | "uint8_t" | "int8_t" => Some(8),
        "u16" | "i16" | "uint16_t" | "int16_t" => Some(16),
        "u32" | "i32" | "f32" | "uint32_t" | "int32_t" | "float" => Some(32),
        "u64" | "i64" | "f64" | "uint64_t" | "int64_t" | "double" => Some(64),
        "bool" => Some(1),
        _ => None,
    }
}

/// Everything the generator knows about one identifier in scope. Exactly
/// one of enum / bitmap / string / plain holds per entry.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeInfo {
    /// Source spelling of the base type (`u8`, an enum name, `char` for
    /// strings)
    pub base_type: String,
    pub bit_width: Option<u32>,
    pub is_array: bool,
    pub array_dimensions: Vec<u64>,
    pub is_const: bool,
    pub is_enum: bool,
    pub enum_type_name: Option<String>,
    pub is_bitmap: bool,
    pub bitmap_type_name: Option<String>,
    pub is_string: bool,
    pub string_capacity: Option<u64>,
    pub overflow: OverflowBehavior,
    pub is_atomic: bool,
}

impl TypeInfo {
    /// A plain integer/bool/float entry.
    pub fn plain(base_type: impl Into<String>) -> Self {
        let base_type = base_type.into();
        Self {
            bit_width: bit_width(&base_type),
            base_type,
            is_array: false,
            array_dimensions: Vec::new(),
            is_const: false,
            is_enum: false,
            enum_type_name: None,
            is_bitmap: false,
            bitmap_type_name: None,
            is_string: false,
            string_capacity: None,
            overflow: OverflowBehavior::Wrap,
            is_atomic: false,
        }
    }

    pub fn with_dimensions(mut self, dimensions: &[u64]) -> Self {
        self.is_array = !dimensions.is_empty();
        self.array_dimensions = dimensions.to_vec();
        self
    }

    pub fn string(capacity: u64) -> Self {
        let mut info = Self::plain("char");
        info.is_string = true;
        info.string_capacity = Some(capacity);
        info
    }
}

/// The registry proper: a small map with two registration helpers that
/// every syntactic position (scoped, global, qualified, user-named types)
/// funnels through, so the handling is identical everywhere.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    entries: HashMap<String, TypeInfo>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, info: TypeInfo) {
        self.entries.insert(name.into(), info);
    }

    pub fn get(&self, name: &str) -> Option<&TypeInfo> {
        self.entries.get(name)
    }

    /// Insert an enum-typed entry iff `base` names a known enum. Returns
    /// whether it registered.
    pub fn try_register_enum_type(
        &mut self,
        name: &str,
        base: &str,
        symbols: &SymbolIndex,
        is_const: bool,
    ) -> bool {
        if !symbols.is_known_enum(base) {
            return false;
        }
        let mut info = TypeInfo::plain(base);
        // Enums lower to int in the emitted C
        info.bit_width = Some(32);
        info.is_enum = true;
        info.enum_type_name = Some(base.to_owned());
        info.is_const = is_const;
        self.set(name, info);
        true
    }

    /// Insert a bitmap-typed entry iff `base` names a known bitmap,
    /// recording array dimensions when present. Returns whether it
    /// registered.
    pub fn try_register_bitmap_type(
        &mut self,
        name: &str,
        base: &str,
        dimensions: &[u64],
        symbols: &SymbolIndex,
        is_const: bool,
    ) -> bool {
        let bitmap = match symbols.bitmap(base) {
            Some(bitmap) => bitmap,
            None => return false,
        };
        let mut info = TypeInfo::plain(bitmap.backing.name());
        info.is_bitmap = true;
        info.bitmap_type_name = Some(base.to_owned());
        info.is_const = is_const;
        info.is_array = !dimensions.is_empty();
        info.array_dimensions = dimensions.to_vec();
        self.set(name, info);
        true
    }

    /// Register a collected variable under its name. Enum and bitmap bases
    /// go through the shared helpers; everything else registers directly.
    pub fn register_variable(
        &mut self,
        symbol: &VariableSymbol,
        symbols: &SymbolIndex,
    ) {
        let name = symbol.meta.qualified_name();
        if symbol.is_string {
            let mut info =
                TypeInfo::string(symbol.string_capacity.unwrap_or(0));
            info.is_array = !symbol.dimensions.is_empty();
            info.array_dimensions = symbol.dimensions.clone();
            info.is_const = symbol.is_const;
            info.overflow = symbol.overflow;
            info.is_atomic = symbol.is_atomic;
            self.set(name, info);
            return;
        }
        if let BaseType::Named(base) = &symbol.base {
            if self.try_register_enum_type(
                &name,
                base,
                symbols,
                symbol.is_const,
            ) {
                let entry = self.entries.get_mut(&name).expect("registered");
                entry.is_array = !symbol.dimensions.is_empty();
                entry.array_dimensions = symbol.dimensions.clone();
                entry.overflow = symbol.overflow;
                entry.is_atomic = symbol.is_atomic;
                return;
            }
            if self.try_register_bitmap_type(
                &name,
                base,
                &symbol.dimensions,
                symbols,
                symbol.is_const,
            ) {
                let entry = self.entries.get_mut(&name).expect("registered");
                entry.overflow = symbol.overflow;
                entry.is_atomic = symbol.is_atomic;
                return;
            }
        }
        let mut info = TypeInfo::plain(symbol.base.display_name())
            .with_dimensions(&symbol.dimensions);
        info.is_const = symbol.is_const;
        info.overflow = symbol.overflow;
        info.is_atomic = symbol.is_atomic;
        self.set(name, info);
    }

    /// Register a function parameter for the duration of its body.
    pub fn register_param(
        &mut self,
        param: &ParamInfo,
        symbols: &SymbolIndex,
    ) {
        if param.is_string {
            let mut info =
                TypeInfo::string(param.string_capacity.unwrap_or(0));
            info.is_array = param.is_array;
            info.is_const = param.is_const;
            self.set(param.name.clone(), info);
            return;
        }
        if let BaseType::Named(base) = &param.base {
            if self.try_register_enum_type(
                &param.name,
                base,
                symbols,
                param.is_const,
            ) {
                return;
            }
            if self.try_register_bitmap_type(
                &param.name,
                base,
                &[],
                symbols,
                param.is_const,
            ) {
                return;
            }
        }
        let mut info = TypeInfo::plain(param.base.display_name());
        info.is_array = param.is_array;
        info.is_const = param.is_const;
        self.set(param.name.clone(), info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{BitmapSymbol, EnumSymbol, SymbolMeta, SymbolTable};
    use crate::ast::PrimitiveType;
    use std::path::Path;

    fn index_with_enum_and_bitmap() -> SymbolIndex {
        let mut table = SymbolTable::new(Path::new("a.cnx"));
        table.enums.push(EnumSymbol {
            meta: SymbolMeta::new("Mode", Path::new("a.cnx"), 1),
            members: vec![("AUTO".into(), 0)],
        });
        table.bitmaps.push(BitmapSymbol {
            meta: SymbolMeta::new("Status", Path::new("a.cnx"), 2),
            backing: PrimitiveType::U8,
            bit_width: 8,
            fields: vec![],
        });
        SymbolIndex::new(vec![table])
    }

    #[test]
    fn test_bit_width_table() {
        assert_eq!(bit_width("u8"), Some(8));
        assert_eq!(bit_width("uint8_t"), Some(8));
        assert_eq!(bit_width("i16"), Some(16));
        assert_eq!(bit_width("f32"), Some(32));
        assert_eq!(bit_width("u64"), Some(64));
        assert_eq!(bit_width("double"), Some(64));
        assert_eq!(bit_width("bool"), Some(1));
        assert_eq!(bit_width("Mode"), None);
    }

    #[test]
    fn test_register_enum_type() {
        let symbols = index_with_enum_and_bitmap();
        let mut registry = TypeRegistry::new();
        assert!(registry.try_register_enum_type(
            "mode", "Mode", &symbols, false
        ));
        assert!(!registry.try_register_enum_type(
            "other", "Missing", &symbols, false
        ));
        let info = registry.get("mode").unwrap();
        assert!(info.is_enum);
        assert_eq!(info.enum_type_name.as_deref(), Some("Mode"));
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn test_register_bitmap_type_with_dimensions() {
        let symbols = index_with_enum_and_bitmap();
        let mut registry = TypeRegistry::new();
        assert!(registry.try_register_bitmap_type(
            "flags",
            "Status",
            &[4],
            &symbols,
            false
        ));
        let info = registry.get("flags").unwrap();
        assert!(info.is_bitmap);
        assert!(info.is_array);
        assert_eq!(info.array_dimensions, vec![4]);
        assert_eq!(info.base_type, "u8");
    }
}
