//! Constant-expression utilities: numeric literal parsing, left-to-right
//! constant folding, and array-initializer size inference.

use crate::ast::{BinaryOp, Expression, UnaryOp};

/// Parse a numeric literal: decimal, `0x`/`0X` hex, or `0b`/`0B` binary,
/// with an optional leading minus. Surrounding whitespace is ignored.
/// Returns `None` for anything else (floats, malformed digits).
pub fn try_parse_numeric_literal(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    if body.is_empty() {
        return None;
    }

    let value = if let Some(hex) =
        body.strip_prefix("0x").or_else(|| body.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) =
        body.strip_prefix("0b").or_else(|| body.strip_prefix("0B"))
    {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        body.parse::<i64>().ok()?
    };

    Some(if negative { -value } else { value })
}

/// Apply one folding step. Division and modulo truncate toward zero (i64
/// semantics); a zero divisor or an overflow aborts the fold.
fn apply_op(acc: i64, op: &str, value: i64) -> Option<i64> {
    match op {
        "+" => acc.checked_add(value),
        "-" => acc.checked_sub(value),
        "*" => acc.checked_mul(value),
        "/" => {
            if value == 0 {
                None
            } else {
                acc.checked_div(value)
            }
        }
        "%" => {
            if value == 0 {
                None
            } else {
                acc.checked_rem(value)
            }
        }
        // Bitwise, shift and comparison operators are never folded
        _ => None,
    }
}

/// Fold an alternating sequence `v0 op0 v1 op1 v2 …` left to right. Returns
/// `None` ("not foldable") unless every operand is a numeric literal and
/// every operator is one of `+ - * / %`.
pub fn fold_literal_sequence(parts: &[&str]) -> Option<i64> {
    if parts.is_empty() || parts.len() % 2 == 0 {
        return None;
    }
    let mut acc = try_parse_numeric_literal(parts[0])?;
    for pair in parts[1..].chunks(2) {
        let value = try_parse_numeric_literal(pair[1])?;
        acc = apply_op(acc, pair[0], value)?;
    }
    Some(acc)
}

/// Fold an expression tree down to an integer, if the whole tree consists of
/// integer literals combined with foldable operators. Parentheses and unary
/// minus are transparent.
pub fn fold_expression(expr: &Expression) -> Option<i64> {
    match expr {
        Expression::IntLiteral { value, .. } => Some(*value),
        Expression::Paren(inner) => fold_expression(inner.value()),
        Expression::Unary {
            op: UnaryOp::Neg,
            operand,
        } => fold_expression(operand.value())?.checked_neg(),
        Expression::Binary { op, lhs, rhs } if op.is_foldable() => {
            let left = fold_expression(lhs.value())?;
            let right = fold_expression(rhs.value())?;
            apply_op(left, op.c_op(), right)
        }
        _ => None,
    }
}

/// Infer an array dimension from an initializer expression, descending to
/// the primary. A list initializer's size is its element count; the fill-all
/// form carries no size of its own.
pub fn infer_array_size(expr: &Expression) -> Option<u64> {
    match expr {
        Expression::Paren(inner) => infer_array_size(inner.value()),
        Expression::ArrayInit(elements) => Some(elements.len() as u64),
        Expression::ArrayFill(_) => None,
        _ => None,
    }
}

/// Infer the second dimension of a nested initializer: the arity of the
/// first row. Inner dimensions omitted from the declaration default to this.
pub fn infer_inner_size(expr: &Expression) -> Option<u64> {
    match expr {
        Expression::Paren(inner) => infer_inner_size(inner.value()),
        Expression::ArrayInit(elements) => {
            infer_array_size(elements.first()?.value())
        }
        _ => None,
    }
}

/// Infer the dimension at `depth`: the outer dimension is the initializer's
/// element count; any omitted inner dimension defaults to the first row's
/// arity.
pub fn infer_dimension(expr: &Expression, depth: usize) -> Option<u64> {
    if depth == 0 {
        infer_array_size(expr)
    } else {
        infer_inner_size(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::SpanNode, util::Span};

    fn int(value: i64) -> SpanNode<Expression> {
        crate::ast::Node(
            Expression::IntLiteral {
                value,
                raw: value.to_string(),
            },
            Span::default(),
        )
    }

    #[test]
    fn test_parse_numeric_literals() {
        assert_eq!(try_parse_numeric_literal("42"), Some(42));
        assert_eq!(try_parse_numeric_literal("0xFF"), Some(255));
        assert_eq!(try_parse_numeric_literal("0b1010"), Some(10));
        assert_eq!(try_parse_numeric_literal("  42  "), Some(42));
        assert_eq!(try_parse_numeric_literal("-17"), Some(-17));
        assert_eq!(try_parse_numeric_literal("12.5"), None);
        assert_eq!(try_parse_numeric_literal("0xGG"), None);
        assert_eq!(try_parse_numeric_literal(""), None);
        assert_eq!(try_parse_numeric_literal("-"), None);
    }

    #[test]
    fn test_fold_left_to_right() {
        assert_eq!(fold_literal_sequence(&["1", "+", "2", "*", "3"]), Some(9));
        assert_eq!(fold_literal_sequence(&["10", "-", "4"]), Some(6));
        assert_eq!(fold_literal_sequence(&["0x10", "+", "0b1"]), Some(17));
    }

    #[test]
    fn test_fold_division_truncates_toward_zero() {
        assert_eq!(fold_literal_sequence(&["-7", "/", "2"]), Some(-3));
        assert_eq!(fold_literal_sequence(&["7", "/", "2"]), Some(3));
    }

    #[test]
    fn test_fold_aborts() {
        // Division and modulo by zero
        assert_eq!(fold_literal_sequence(&["1", "/", "0"]), None);
        assert_eq!(fold_literal_sequence(&["1", "%", "0"]), None);
        // Unsupported operators
        assert_eq!(fold_literal_sequence(&["1", "<<", "2"]), None);
        assert_eq!(fold_literal_sequence(&["1", "&", "2"]), None);
        // Non-literal operand
        assert_eq!(fold_literal_sequence(&["x", "+", "2"]), None);
    }

    #[test]
    fn test_fold_expression_tree() {
        let expr = Expression::Binary {
            op: BinaryOp::Mul,
            lhs: Box::new(int(6)),
            rhs: Box::new(int(7)),
        };
        assert_eq!(fold_expression(&expr), Some(42));

        let unfoldable = Expression::Binary {
            op: BinaryOp::Shl,
            lhs: Box::new(int(1)),
            rhs: Box::new(int(3)),
        };
        assert_eq!(fold_expression(&unfoldable), None);
    }

    #[test]
    fn test_infer_array_size() {
        let list = Expression::ArrayInit(vec![int(1), int(2), int(3)]);
        assert_eq!(infer_array_size(&list), Some(3));

        let fill = Expression::ArrayFill(Box::new(int(0)));
        assert_eq!(infer_array_size(&fill), None);

        let nested = Expression::ArrayInit(vec![crate::ast::Node(
            Expression::ArrayInit(vec![int(1), int(2)]),
            Span::default(),
        )]);
        assert_eq!(infer_array_size(&nested), Some(1));
        assert_eq!(infer_inner_size(&nested), Some(2));
    }
}
