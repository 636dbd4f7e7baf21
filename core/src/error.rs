//! All error-related transpiler types.

use crate::util::{self, Span};
use serde::Serialize;
use std::fmt::{self, Debug, Display, Formatter};
use thiserror::Error;

/// A trait for any error that originates in source code. [SourceError]s rely
/// on having source code present in order to display themselves.
pub trait SourceError: 'static + Send + Sync + Debug + Serialize {
    /// A simple type label for this error, e.g. `"Syntax"` or `"Validation"`.
    fn type_label(&self) -> &'static str;

    /// Format this error into a simple message. `spanned_src` is the slice of
    /// the source code that corresponds to this error's [Span]. This needs to
    /// be provided by the caller in order to create a proper error message.
    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result;
}

/// An error that occurs while transpiling a unit. The error will be due to a
/// flaw in the input program. This indicates a user error, _not_ an internal
/// transpiler error. Transpiler bugs will always cause a panic.
#[derive(Clone, Debug, Serialize)]
pub enum CompileError {
    /// Failed to parse the program because of a syntax error. `expected` is
    /// the name of the type of element that was expected where the error
    /// occurred.
    Syntax { expected: &'static str },
    /// An enum member resolved to a negative value
    EnumNegative { member: String, value: i64 },
    /// Bitmap field widths don't sum to the declared width
    BitmapWidthMismatch {
        name: String,
        actual: u32,
        declared: u32,
    },
    /// `.capacity` or `.size` applied to a non-string
    CapacitySizeOnNonString { property: &'static str },
    /// Assignment target is a register member with `ro` access
    RegisterReadOnly { member: String },
    /// A type name that isn't in the symbol table
    UnknownTypeReference { name: String },
    /// A context requiring a constant got something unparseable
    InvalidConstantExpression { text: String },
    /// Assignment target is const
    ConstAssignment,
}

impl SourceError for CompileError {
    fn type_label(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "Syntax",
            _ => "Validation",
        }
    }

    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result {
        match self {
            // the source span for syntax errors is just the remaining source,
            // so not very helpful
            Self::Syntax { expected } => write!(f, "Expected {}", expected),
            Self::EnumNegative { member, value } => write!(
                f,
                "Enum member `{}` resolved to negative value {}",
                member, value
            ),
            Self::BitmapWidthMismatch {
                name,
                actual,
                declared,
            } => write!(
                f,
                "Bitmap '{}' has {} bits but bitmap{} requires exactly {} bits",
                name, actual, declared, declared
            ),
            Self::CapacitySizeOnNonString { property } => write!(
                f,
                "Cannot take .{} of non-string `{}`",
                property, spanned_src
            ),
            Self::RegisterReadOnly { member } => write!(
                f,
                "Cannot write to read-only register member `{}`",
                member
            ),
            Self::UnknownTypeReference { name } => {
                write!(f, "Unknown type `{}`", name)
            }
            Self::InvalidConstantExpression { text } => {
                write!(f, "Invalid constant expression `{}`", text)
            }
            Self::ConstAssignment => {
                write!(f, "Cannot assign to const `{}`", spanned_src)
            }
        }
    }
}

// Standalone rendering, without any source attached. This is what front-ends
// print when they don't want the positional framing.
impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Error: ")?;
        self.fmt_msg(f, "")
    }
}

/// A diagnostic that does not stop the pipeline. These are logged and
/// reported alongside the outputs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Warning {
    /// An include directive that didn't resolve to a file. Traversal
    /// continues without it.
    IncludeNotFound { path: String, from: String },
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncludeNotFound { path, from } => write!(
                f,
                "Warning: include `{}` (from {}) not found",
                path, from
            ),
        }
    }
}

/// A wrapper around a [SourceError], that holds some extra data:
/// - The [Span] of the source code that caused the error
/// - The offending chunk of source code itself
///
/// This type on its own can be formatted, without any external data.
#[derive(Clone, Debug, Error, Serialize)]
pub struct SourceErrorWrapper<E: SourceError> {
    error: E,
    span: Span,
    spanned_source: String,
}

impl<E: SourceError> SourceErrorWrapper<E> {
    pub fn new(error: E, span: Span, src: &str) -> Self {
        Self {
            error,
            span,
            spanned_source: span.get_source_slice(src).into(),
        }
    }

    pub fn error(&self) -> &E {
        &self.error
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

impl<E: SourceError> Display for SourceErrorWrapper<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error at {}:{}: ",
            self.error.type_label(),
            self.span.start_line,
            self.span.start_col,
        )?;
        self.error.fmt_msg(f, &self.spanned_source)?;
        Ok(())
    }
}

/// A wrapper around a collection of errors. This holds the errors as well as
/// the source code, and can be used to render associated source code with
/// each error.
#[derive(Clone, Debug, Error, Serialize)]
pub struct WithSource<E: SourceError> {
    errors: Vec<SourceErrorWrapper<E>>,
    #[serde(skip)]
    source_code: String,
}

impl<E: SourceError> WithSource<E> {
    /// Wrap a collection of errors with its source code.
    pub(crate) fn new(
        errors: impl IntoIterator<Item = SourceErrorWrapper<E>>,
        source: String,
    ) -> Self {
        Self {
            errors: errors.into_iter().collect(),
            source_code: source,
        }
    }

    /// Get a reference to the errors wrapped by this type.
    pub fn errors(&self) -> &[SourceErrorWrapper<E>] {
        &self.errors
    }
}

impl<E: SourceError> Display for WithSource<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Write each error, separated by a newline
        for (i, error) in self.errors.iter().enumerate() {
            // Prefix with a newline for all errors but the first
            if i > 0 {
                writeln!(f)?;
            }

            write!(f, "{}", error)?;
            if f.alternate() {
                util::fmt_src_highlights(f, &error.span, &self.source_code)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_width_mismatch_message() {
        let error = CompileError::BitmapWidthMismatch {
            name: "X".into(),
            actual: 10,
            declared: 8,
        };
        assert_eq!(
            error.to_string(),
            "Error: Bitmap 'X' has 10 bits but bitmap8 requires exactly 8 bits"
        );
    }

    #[test]
    fn test_wrapped_error_format() {
        let src = "bitmap8 X { a[5], b[5] }";
        let span = Span {
            offset: 8,
            length: 1,
            start_line: 1,
            start_col: 9,
            end_line: 1,
            end_col: 10,
        };
        let wrapped = SourceErrorWrapper::new(
            CompileError::BitmapWidthMismatch {
                name: "X".into(),
                actual: 10,
                declared: 8,
            },
            span,
            src,
        );
        assert_eq!(
            wrapped.to_string(),
            "Validation error at 1:9: \
             Bitmap 'X' has 10 bits but bitmap8 requires exactly 8 bits"
        );
    }
}
