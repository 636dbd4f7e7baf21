use crate::{
    ast::{
        AccessMode, ArraySize, AssignOp, Assignment, AssignTarget, BinaryOp,
        BitmapDecl, BitmapField, BitmapWidth, Block, Declaration, EnumDecl,
        EnumMember, Expression, FunctionDecl, Ident, IncludeDirective,
        IncludeStyle, Node, Param, PrimitiveType, Program, RegisterDecl,
        RegisterMember, ScopeDecl, ScopeMember, SpanNode, Statement,
        StructDecl, StructField, TargetOp, TypeName, UnaryOp, VarQualifiers,
        VariableDecl, Visibility,
    },
    error::{CompileError, SourceErrorWrapper, WithSource},
    util::{RawSpan, Span},
    Transpiler,
};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while1},
    character::complete::{char, digit1, hex_digit1, multispace1, none_of},
    combinator::{
        all_consuming, cut, map, map_opt, opt, peek, recognize, value, verify,
    },
    error::{context, VerboseError, VerboseErrorKind},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult, Offset, Slice,
};

type ParseResult<'a, T> = IResult<RawSpan<'a>, T, VerboseError<RawSpan<'a>>>;

/// A trait for parsing into AST nodes. Any AST node that can be parsed from
/// the source should implement this trait.
trait Parse<'a>: Sized {
    /// Attempt to parse the input into the AST node. This is generally not
    /// called directly, only from `parse_node`.
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self>;

    /// Attempt to parse the input into the AST node, and include source span
    /// metadata as well. Leading trivia is consumed before the span starts.
    fn parse_node(input: RawSpan<'a>) -> ParseResult<'a, SpanNode<Self>> {
        let (input, _) = sc(input)?;
        let new_input = input; // need to copy so we can compare old pos vs new
        let (i, parsed) = Self::parse(new_input)?;

        let index = input.offset(&i);
        let raw_span = input.slice(..index);

        Ok((i, Node(parsed, Span::from_raw_span(&raw_span))))
    }
}

// ===== Trivia and tokens =====

fn line_comment(input: RawSpan) -> ParseResult<'_, RawSpan> {
    recognize(preceded(tag("//"), opt(is_not("\r\n"))))(input)
}

fn block_comment(input: RawSpan) -> ParseResult<'_, RawSpan> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

/// Consume any amount of whitespace and comments.
fn sc(input: RawSpan) -> ParseResult<'_, ()> {
    value(
        (),
        many0(alt((multispace1, line_comment, block_comment))),
    )(input)
}

/// Wrap a parser so that it skips leading trivia first. All token-level
/// parsers go through this.
fn tok<'a, O>(
    parser: impl FnMut(RawSpan<'a>) -> ParseResult<'a, O>,
) -> impl FnMut(RawSpan<'a>) -> ParseResult<'a, O> {
    preceded(sc, parser)
}

/// A punctuation token.
fn sym<'a>(
    symbol: &'static str,
) -> impl FnMut(RawSpan<'a>) -> ParseResult<'a, RawSpan<'a>> {
    tok(tag(symbol))
}

/// A keyword token: the exact word, not followed by an identifier
/// character.
fn kw<'a>(
    word: &'static str,
) -> impl FnMut(RawSpan<'a>) -> ParseResult<'a, RawSpan<'a>> {
    tok(terminated(
        tag(word),
        peek(nom::combinator::not(verify(
            nom::character::complete::anychar,
            |c: &char| c.is_alphanumeric() || *c == '_',
        ))),
    ))
}

fn identifier(input: RawSpan) -> ParseResult<'_, Ident> {
    map(
        tok(verify(
            take_while1(|c: char| c.is_alphanumeric() || c == '_'),
            |s: &RawSpan| {
                !s.fragment()
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(true)
            },
        )),
        |s: RawSpan| (*s.fragment()).to_owned(),
    )(input)
}

impl<'a> Parse<'a> for Ident {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        identifier(input)
    }
}

fn identifier_node(input: RawSpan) -> ParseResult<'_, SpanNode<Ident>> {
    context("identifier", Ident::parse_node)(input)
}

// ===== Literals =====

fn int_literal(input: RawSpan) -> ParseResult<'_, Expression> {
    map_opt(
        tok(alt((
            recognize(preceded(alt((tag("0x"), tag("0X"))), hex_digit1)),
            recognize(preceded(
                alt((tag("0b"), tag("0B"))),
                take_while1(|c| c == '0' || c == '1'),
            )),
            recognize(digit1),
        ))),
        |s: RawSpan| {
            let raw: &str = s.fragment();
            crate::eval::try_parse_numeric_literal(raw).map(|parsed| {
                Expression::IntLiteral {
                    value: parsed,
                    raw: raw.to_owned(),
                }
            })
        },
    )(input)
}

fn float_literal(input: RawSpan) -> ParseResult<'_, Expression> {
    map(
        tok(recognize(tuple((digit1, char('.'), digit1)))),
        |s: RawSpan| Expression::FloatLiteral((*s.fragment()).to_owned()),
    )(input)
}

fn string_literal(input: RawSpan) -> ParseResult<'_, Expression> {
    map(
        tok(delimited(
            char('"'),
            recognize(many0(alt((
                recognize(preceded(
                    char('\\'),
                    nom::character::complete::anychar,
                )),
                recognize(none_of("\"\\")),
            )))),
            char('"'),
        )),
        |s: RawSpan| Expression::StringLiteral((*s.fragment()).to_owned()),
    )(input)
}

fn char_literal(input: RawSpan) -> ParseResult<'_, Expression> {
    map(
        tok(recognize(delimited(
            char('\''),
            alt((
                recognize(preceded(
                    char('\\'),
                    nom::character::complete::anychar,
                )),
                recognize(none_of("'\\")),
            )),
            char('\''),
        ))),
        |s: RawSpan| Expression::CharLiteral((*s.fragment()).to_owned()),
    )(input)
}

fn bool_literal(input: RawSpan) -> ParseResult<'_, Expression> {
    alt((
        map(kw("true"), |_| Expression::BoolLiteral(true)),
        map(kw("false"), |_| Expression::BoolLiteral(false)),
    ))(input)
}

// ===== Types =====

fn primitive_type(input: RawSpan) -> ParseResult<'_, PrimitiveType> {
    alt((
        map(kw("u8"), |_| PrimitiveType::U8),
        map(kw("u16"), |_| PrimitiveType::U16),
        map(kw("u32"), |_| PrimitiveType::U32),
        map(kw("u64"), |_| PrimitiveType::U64),
        map(kw("i8"), |_| PrimitiveType::I8),
        map(kw("i16"), |_| PrimitiveType::I16),
        map(kw("i32"), |_| PrimitiveType::I32),
        map(kw("i64"), |_| PrimitiveType::I64),
        map(kw("f32"), |_| PrimitiveType::F32),
        map(kw("f64"), |_| PrimitiveType::F64),
        map(kw("bool"), |_| PrimitiveType::Bool),
        map(kw("void"), |_| PrimitiveType::Void),
    ))(input)
}

fn array_size(input: RawSpan) -> ParseResult<'_, ArraySize> {
    alt((
        map_opt(tok(digit1), |s: RawSpan| {
            s.fragment().parse::<u64>().ok().map(ArraySize::Literal)
        }),
        map(identifier, ArraySize::Named),
    ))(input)
}

impl<'a> Parse<'a> for ArraySize {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        array_size(input)
    }
}

impl<'a> Parse<'a> for TypeName {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        alt((
            map(primitive_type, TypeName::Primitive),
            map(
                preceded(
                    kw("string"),
                    opt(delimited(
                        sym("<"),
                        context("string capacity", array_size),
                        sym(">"),
                    )),
                ),
                |capacity| {
                    // A bare `string` is unsized; parameters use it
                    TypeName::String(
                        capacity.unwrap_or(ArraySize::Inferred),
                    )
                },
            ),
            map(
                pair(identifier, opt(preceded(sym("."), identifier))),
                |(first, second)| match second {
                    Some(name) => TypeName::User {
                        scope: Some(first),
                        name,
                    },
                    None => TypeName::User {
                        scope: None,
                        name: first,
                    },
                },
            ),
        ))(input)
    }
}

fn type_node(input: RawSpan) -> ParseResult<'_, SpanNode<TypeName>> {
    context("type", TypeName::parse_node)(input)
}

/// `[n]`, `[NAME]`, or `[]` dimension suffixes.
fn dimension_suffixes(
    input: RawSpan,
) -> ParseResult<'_, Vec<SpanNode<ArraySize>>> {
    many0(alt((
        delimited(sym("["), ArraySize::parse_node, sym("]")),
        map(pair(sym("["), sym("]")), |(open, _)| {
            Node(ArraySize::Inferred, Span::from_position(&open))
        }),
    )))(input)
}

// ===== Expressions =====

fn join_spans(start: &Span, end: &Span) -> Span {
    Span {
        offset: start.offset,
        length: end.offset + end.length - start.offset,
        start_line: start.start_line,
        start_col: start.start_col,
        end_line: end.end_line,
        end_col: end.end_col,
    }
}

fn paren_expr(input: RawSpan) -> ParseResult<'_, Expression> {
    map(
        delimited(sym("("), Expression::parse_node, sym(")")),
        |inner| Expression::Paren(Box::new(inner)),
    )(input)
}

fn array_fill(input: RawSpan) -> ParseResult<'_, Expression> {
    map(
        delimited(
            sym("["),
            terminated(Expression::parse_node, sym("*")),
            sym("]"),
        ),
        |fill| Expression::ArrayFill(Box::new(fill)),
    )(input)
}

fn array_init(input: RawSpan) -> ParseResult<'_, Expression> {
    map(
        delimited(
            sym("["),
            separated_list0(sym(","), Expression::parse_node),
            sym("]"),
        ),
        Expression::ArrayInit,
    )(input)
}

fn primary(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    let (input, _) = sc(input)?;
    let start = input;
    let (i, expr) = alt((
        float_literal,
        int_literal,
        string_literal,
        char_literal,
        bool_literal,
        array_fill,
        array_init,
        paren_expr,
        map(identifier, Expression::Identifier),
    ))(input)?;
    let index = start.offset(&i);
    let raw_span = start.slice(..index);
    Ok((i, Node(expr, Span::from_raw_span(&raw_span))))
}

enum PostfixOp {
    Call(Vec<SpanNode<Expression>>),
    Member(SpanNode<Ident>),
    Index(Vec<SpanNode<Expression>>),
}

fn postfix_op(input: RawSpan) -> ParseResult<'_, PostfixOp> {
    alt((
        map(
            delimited(
                sym("("),
                separated_list0(sym(","), Expression::parse_node),
                sym(")"),
            ),
            PostfixOp::Call,
        ),
        map(preceded(sym("."), identifier_node), PostfixOp::Member),
        map(
            delimited(
                sym("["),
                verify(
                    separated_list1(sym(","), Expression::parse_node),
                    |indices: &Vec<_>| indices.len() <= 2,
                ),
                sym("]"),
            ),
            PostfixOp::Index,
        ),
    ))(input)
}

fn postfix(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    let (mut rest, mut expr) = primary(input)?;
    loop {
        // Track the end position so the span grows with each postfix op
        match postfix_op(rest) {
            Ok((after, op)) => {
                let index = rest.offset(&after);
                let op_span =
                    Span::from_raw_span(&rest.slice(..index));
                let span = join_spans(expr.metadata(), &op_span);
                expr = match op {
                    PostfixOp::Call(args) => Node(
                        Expression::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    ),
                    PostfixOp::Member(member) => Node(
                        Expression::Member {
                            base: Box::new(expr),
                            member,
                        },
                        span,
                    ),
                    PostfixOp::Index(indices) => Node(
                        Expression::Index {
                            base: Box::new(expr),
                            indices,
                        },
                        span,
                    ),
                };
                rest = after;
            }
            Err(nom::Err::Error(_)) => return Ok((rest, expr)),
            Err(other) => return Err(other),
        }
    }
}

fn unary(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    let (input, _) = sc(input)?;
    let start = input;
    let op_result: ParseResult<'_, UnaryOp> = alt((
        map(tag("!"), |_| UnaryOp::Not),
        map(tag("~"), |_| UnaryOp::BitNot),
        map(tag("-"), |_| UnaryOp::Neg),
    ))(input);
    match op_result {
        Ok((rest, op)) => {
            let (after, operand) = unary(rest)?;
            let index = start.offset(&after);
            let span = Span::from_raw_span(&start.slice(..index));
            Ok((
                after,
                Node(
                    Expression::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                ),
            ))
        }
        Err(_) => postfix(input),
    }
}

/// Build a left-associative binary chain at one precedence level.
fn binary_chain<'a>(
    input: RawSpan<'a>,
    operand: fn(RawSpan<'a>) -> ParseResult<'a, SpanNode<Expression>>,
    op: fn(RawSpan<'a>) -> ParseResult<'a, BinaryOp>,
) -> ParseResult<'a, SpanNode<Expression>> {
    let (mut rest, mut lhs) = operand(input)?;
    loop {
        match pair(op, operand)(rest) {
            Ok((after, (op, rhs))) => {
                let span = join_spans(lhs.metadata(), rhs.metadata());
                lhs = Node(
                    Expression::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    span,
                );
                rest = after;
            }
            Err(nom::Err::Error(_)) => return Ok((rest, lhs)),
            Err(other) => return Err(other),
        }
    }
}

fn multiplicative_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    tok(alt((
        map(tag("*"), |_| BinaryOp::Mul),
        map(tag("/"), |_| BinaryOp::Div),
        map(tag("%"), |_| BinaryOp::Mod),
    )))(input)
}

fn multiplicative(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, unary, multiplicative_op)
}

fn additive_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    tok(alt((
        map(tag("+"), |_| BinaryOp::Add),
        map(tag("-"), |_| BinaryOp::Sub),
    )))(input)
}

fn additive(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, multiplicative, additive_op)
}

fn shift_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    tok(alt((
        map(tag("<<"), |_| BinaryOp::Shl),
        map(tag(">>"), |_| BinaryOp::Shr),
    )))(input)
}

fn shift(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, additive, shift_op)
}

fn relational_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    tok(alt((
        map(tag("<="), |_| BinaryOp::Le),
        map(tag(">="), |_| BinaryOp::Ge),
        map(tag("<"), |_| BinaryOp::Lt),
        map(tag(">"), |_| BinaryOp::Gt),
    )))(input)
}

fn relational(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, shift, relational_op)
}

fn equality_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    tok(alt((
        map(tag("=="), |_| BinaryOp::Eq),
        map(tag("!="), |_| BinaryOp::Ne),
    )))(input)
}

fn equality(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, relational, equality_op)
}

fn bit_and_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    map(
        tok(terminated(tag("&"), peek(none_of("&")))),
        |_| BinaryOp::BitAnd,
    )(input)
}

fn bit_and(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, equality, bit_and_op)
}

fn bit_xor_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    map(tok(tag("^")), |_| BinaryOp::BitXor)(input)
}

fn bit_xor(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, bit_and, bit_xor_op)
}

fn bit_or_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    map(
        tok(terminated(tag("|"), peek(none_of("|")))),
        |_| BinaryOp::BitOr,
    )(input)
}

fn bit_or(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, bit_xor, bit_or_op)
}

fn logical_and_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    map(tok(tag("&&")), |_| BinaryOp::LogicalAnd)(input)
}

fn logical_and(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    binary_chain(input, bit_or, logical_and_op)
}

fn logical_or_op(input: RawSpan) -> ParseResult<'_, BinaryOp> {
    map(tok(tag("||")), |_| BinaryOp::LogicalOr)(input)
}

impl<'a> Parse<'a> for Expression {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        map(
            |i| binary_chain(i, logical_and, logical_or_op),
            |node| node.0,
        )(input)
    }

    fn parse_node(input: RawSpan<'a>) -> ParseResult<'a, SpanNode<Self>> {
        binary_chain(input, logical_and, logical_or_op)
    }
}

fn expression_node(input: RawSpan) -> ParseResult<'_, SpanNode<Expression>> {
    context("expression", Expression::parse_node)(input)
}

// ===== Assignments =====

fn assign_op(input: RawSpan) -> ParseResult<'_, AssignOp> {
    tok(alt((
        map(tag("<<<-"), |_| AssignOp::Shl),
        map(tag(">><-"), |_| AssignOp::Shr),
        map(tag("+<-"), |_| AssignOp::Add),
        map(tag("-<-"), |_| AssignOp::Sub),
        map(tag("*<-"), |_| AssignOp::Mul),
        map(tag("/<-"), |_| AssignOp::Div),
        map(tag("%<-"), |_| AssignOp::Mod),
        map(tag("&<-"), |_| AssignOp::And),
        map(tag("|<-"), |_| AssignOp::Or),
        map(tag("^<-"), |_| AssignOp::Xor),
        map(tag("<-"), |_| AssignOp::Assign),
    )))(input)
}

fn target_op(input: RawSpan) -> ParseResult<'_, SpanNode<TargetOp>> {
    let (input, _) = sc(input)?;
    let start = input;
    let (i, op) = alt((
        map(preceded(tag("."), identifier_node), TargetOp::Member),
        map_opt(
            delimited(
                sym("["),
                separated_list1(sym(","), Expression::parse_node),
                sym("]"),
            ),
            |mut indices| match indices.len() {
                1 => Some(TargetOp::Index(indices.remove(0))),
                2 => {
                    let width = indices.remove(1);
                    Some(TargetOp::BitRange(indices.remove(0), width))
                }
                _ => None,
            },
        ),
    ))(input)?;
    let index = start.offset(&i);
    Ok((
        i,
        Node(op, Span::from_raw_span(&start.slice(..index))),
    ))
}

impl<'a> Parse<'a> for Assignment {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        map(
            tuple((
                identifier_node,
                many0(target_op),
                assign_op,
                cut(expression_node),
            )),
            |(base, ops, op, value)| Assignment {
                target: AssignTarget { base, ops },
                op,
                value,
            },
        )(input)
    }
}

// ===== Statements =====

fn var_qualifiers(input: RawSpan) -> ParseResult<'_, VarQualifiers> {
    let mut quals = VarQualifiers::default();
    let mut rest = input;
    loop {
        let step: ParseResult<'_, RawSpan> = alt((
            kw("const"),
            kw("atomic"),
            kw("wrap"),
            kw("saturate"),
            kw("trap"),
        ))(rest);
        match step {
            Ok((after, word)) => {
                match *word.fragment() {
                    "const" => quals.is_const = true,
                    "atomic" => quals.is_atomic = true,
                    "wrap" => {
                        quals.overflow = crate::ast::OverflowBehavior::Wrap
                    }
                    "saturate" => {
                        quals.overflow =
                            crate::ast::OverflowBehavior::Saturate
                    }
                    "trap" => {
                        quals.overflow = crate::ast::OverflowBehavior::Trap
                    }
                    _ => unreachable!(),
                }
                rest = after;
            }
            Err(_) => return Ok((rest, quals)),
        }
    }
}

/// A variable declaration without its terminating semicolon, so it can be
/// shared between statements and `for` initializers.
impl<'a> Parse<'a> for VariableDecl {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        map(
            tuple((
                var_qualifiers,
                type_node,
                identifier_node,
                dimension_suffixes,
                opt(preceded(sym("<-"), cut(expression_node))),
            )),
            |(qualifiers, ty, name, dimensions, init)| VariableDecl {
                qualifiers,
                ty,
                name,
                dimensions,
                init,
            },
        )(input)
    }
}

fn block(input: RawSpan) -> ParseResult<'_, Block> {
    map(
        delimited(
            sym("{"),
            many0(Statement::parse_node),
            context("closing brace", sym("}")),
        ),
        |statements| Block { statements },
    )(input)
}

fn if_statement(input: RawSpan) -> ParseResult<'_, Statement> {
    let (input, first) = preceded(
        kw("if"),
        cut(pair(
            delimited(sym("("), expression_node, sym(")")),
            block,
        )),
    )(input)?;
    let (input, mut arms) = many0(preceded(
        pair(kw("else"), kw("if")),
        cut(pair(
            delimited(sym("("), expression_node, sym(")")),
            block,
        )),
    ))(input)?;
    let (input, else_body) =
        opt(preceded(kw("else"), cut(block)))(input)?;
    arms.insert(0, first);
    Ok((input, Statement::If { arms, else_body }))
}

fn while_statement(input: RawSpan) -> ParseResult<'_, Statement> {
    map(
        preceded(
            kw("while"),
            cut(pair(
                delimited(sym("("), expression_node, sym(")")),
                block,
            )),
        ),
        |(condition, body)| Statement::While { condition, body },
    )(input)
}

/// One clause in a `for` header: a declaration or an assignment, no
/// semicolon.
fn for_clause(input: RawSpan) -> ParseResult<'_, SpanNode<Statement>> {
    let (input, _) = sc(input)?;
    let start = input;
    let (i, stmt) = alt((
        map(VariableDecl::parse, Statement::Variable),
        map(Assignment::parse, Statement::Assignment),
        map(Expression::parse_node, Statement::Expression),
    ))(input)?;
    let index = start.offset(&i);
    Ok((
        i,
        Node(stmt, Span::from_raw_span(&start.slice(..index))),
    ))
}

fn for_statement(input: RawSpan) -> ParseResult<'_, Statement> {
    map(
        preceded(
            kw("for"),
            cut(pair(
                delimited(
                    sym("("),
                    tuple((
                        terminated(opt(for_clause), sym(";")),
                        terminated(opt(expression_node), sym(";")),
                        opt(for_clause),
                    )),
                    sym(")"),
                ),
                block,
            )),
        ),
        |((init, condition, step), body)| Statement::For {
            init: init.map(Box::new),
            condition,
            step: step.map(Box::new),
            body,
        },
    )(input)
}

impl<'a> Parse<'a> for Statement {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        alt((
            map(block, Statement::Block),
            if_statement,
            while_statement,
            for_statement,
            map(
                preceded(
                    kw("return"),
                    cut(terminated(
                        opt(expression_node),
                        context("end of statement", sym(";")),
                    )),
                ),
                Statement::Return,
            ),
            map(terminated(kw("break"), cut(sym(";"))), |_| {
                Statement::Break
            }),
            map(terminated(kw("continue"), cut(sym(";"))), |_| {
                Statement::Continue
            }),
            map(
                terminated(
                    VariableDecl::parse,
                    context("end of statement", sym(";")),
                ),
                Statement::Variable,
            ),
            map(
                terminated(
                    Assignment::parse,
                    context("end of statement", sym(";")),
                ),
                Statement::Assignment,
            ),
            map(
                terminated(
                    expression_node,
                    context("end of statement", sym(";")),
                ),
                Statement::Expression,
            ),
        ))(input)
    }
}

// ===== Declarations =====

fn enum_declaration(input: RawSpan) -> ParseResult<'_, EnumDecl> {
    map(
        preceded(
            kw("enum"),
            cut(pair(
                identifier_node,
                delimited(
                    sym("{"),
                    terminated(
                        separated_list1(
                            sym(","),
                            context(
                                "enum member",
                                map(
                                    pair(
                                        identifier_node,
                                        opt(preceded(
                                            sym("<-"),
                                            expression_node,
                                        )),
                                    ),
                                    |(name, member_value)| EnumMember {
                                        name,
                                        value: member_value,
                                    },
                                ),
                            ),
                        ),
                        opt(sym(",")),
                    ),
                    sym("}"),
                ),
            )),
        ),
        |(name, members)| EnumDecl { name, members },
    )(input)
}

fn bitmap_width(input: RawSpan) -> ParseResult<'_, BitmapWidth> {
    alt((
        map(kw("bitmap8"), |_| BitmapWidth::B8),
        map(kw("bitmap16"), |_| BitmapWidth::B16),
        map(kw("bitmap24"), |_| BitmapWidth::B24),
        map(kw("bitmap32"), |_| BitmapWidth::B32),
        map(kw("bitmap64"), |_| BitmapWidth::B64),
    ))(input)
}

fn bitmap_field(input: RawSpan) -> ParseResult<'_, BitmapField> {
    map(
        pair(
            identifier_node,
            opt(delimited(
                sym("["),
                map_opt(tok(digit1), |s: RawSpan| {
                    s.fragment()
                        .parse::<u32>()
                        .ok()
                        .map(|width| Node(width, Span::from_raw_span(&s)))
                }),
                sym("]"),
            )),
        ),
        |(name, width)| BitmapField { name, width },
    )(input)
}

fn bitmap_declaration(input: RawSpan) -> ParseResult<'_, BitmapDecl> {
    map(
        pair(
            bitmap_width,
            cut(pair(
                identifier_node,
                delimited(
                    sym("{"),
                    terminated(
                        separated_list1(
                            sym(","),
                            context("bitmap field", bitmap_field),
                        ),
                        opt(sym(",")),
                    ),
                    sym("}"),
                ),
            )),
        ),
        |(width, (name, fields))| BitmapDecl {
            name,
            width,
            fields,
        },
    )(input)
}

fn struct_declaration(input: RawSpan) -> ParseResult<'_, StructDecl> {
    map(
        preceded(
            kw("struct"),
            cut(pair(
                identifier_node,
                delimited(
                    sym("{"),
                    many0(context(
                        "struct field",
                        map(
                            tuple((
                                type_node,
                                identifier_node,
                                dimension_suffixes,
                                sym(";"),
                            )),
                            |(ty, name, dimensions, _)| StructField {
                                ty,
                                name,
                                dimensions,
                            },
                        ),
                    )),
                    sym("}"),
                ),
            )),
        ),
        |(name, fields)| StructDecl { name, fields },
    )(input)
}

/// The raw source spelling of an offset expression, preserved for emission.
fn raw_offset(input: RawSpan) -> ParseResult<'_, SpanNode<String>> {
    let (input, _) = sc(input)?;
    let start = input;
    let (i, _) = additive(input)?;
    let index = start.offset(&i);
    let raw_span = start.slice(..index);
    Ok((
        i,
        Node(
            raw_span.fragment().trim().to_owned(),
            Span::from_raw_span(&raw_span),
        ),
    ))
}

fn access_mode(input: RawSpan) -> ParseResult<'_, AccessMode> {
    alt((
        map(kw("rw"), |_| AccessMode::Rw),
        map(kw("ro"), |_| AccessMode::Ro),
        map(kw("wo"), |_| AccessMode::Wo),
        map(kw("w1c"), |_| AccessMode::W1c),
        map(kw("w1s"), |_| AccessMode::W1s),
    ))(input)
}

fn register_member(input: RawSpan) -> ParseResult<'_, RegisterMember> {
    map(
        tuple((
            identifier_node,
            preceded(sym("@"), raw_offset),
            preceded(sym(":"), type_node),
            context("access mode", access_mode),
            opt(preceded(kw("as"), identifier_node)),
            sym(";"),
        )),
        |(name, offset, ty, access, bitmap, _)| RegisterMember {
            name,
            offset,
            ty,
            access,
            bitmap,
        },
    )(input)
}

fn register_declaration(input: RawSpan) -> ParseResult<'_, RegisterDecl> {
    map(
        preceded(
            kw("register"),
            cut(tuple((
                identifier_node,
                preceded(sym("@"), raw_offset),
                delimited(
                    sym("{"),
                    many0(context("register member", register_member)),
                    sym("}"),
                ),
            ))),
        ),
        |(name, base, members)| RegisterDecl {
            name,
            base,
            members,
        },
    )(input)
}

fn param(input: RawSpan) -> ParseResult<'_, Param> {
    map(
        tuple((
            opt(kw("const")),
            type_node,
            identifier_node,
            many0(pair(sym("["), sym("]"))),
        )),
        |(constness, ty, name, brackets)| Param {
            is_const: constness.is_some(),
            ty,
            name,
            array_depth: brackets.len(),
        },
    )(input)
}

fn function_declaration(input: RawSpan) -> ParseResult<'_, FunctionDecl> {
    map(
        tuple((
            type_node,
            identifier_node,
            delimited(
                sym("("),
                separated_list0(sym(","), context("parameter", param)),
                sym(")"),
            ),
            context("function body", block),
        )),
        |(return_type, name, params, body)| FunctionDecl {
            return_type,
            name,
            params,
            body,
        },
    )(input)
}

fn visibility(input: RawSpan) -> ParseResult<'_, SpanNode<Visibility>> {
    let (input, _) = sc(input)?;
    let start = input;
    let (i, vis) = alt((
        map(kw("public"), |_| Visibility::Public),
        map(kw("private"), |_| Visibility::Private),
    ))(input)?;
    let index = start.offset(&i);
    Ok((
        i,
        Node(vis, Span::from_raw_span(&start.slice(..index))),
    ))
}

fn scope_declaration(input: RawSpan) -> ParseResult<'_, ScopeDecl> {
    map(
        preceded(
            kw("scope"),
            cut(pair(
                identifier_node,
                delimited(
                    sym("{"),
                    many0(context(
                        "scope member",
                        map(
                            pair(opt(visibility), Declaration::parse_node),
                            |(vis, declaration)| ScopeMember {
                                visibility: vis,
                                declaration,
                            },
                        ),
                    )),
                    sym("}"),
                ),
            )),
        ),
        |(name, members)| ScopeDecl { name, members },
    )(input)
}

impl<'a> Parse<'a> for Declaration {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        alt((
            map(scope_declaration, Declaration::Scope),
            map(enum_declaration, Declaration::Enum),
            map(bitmap_declaration, Declaration::Bitmap),
            map(struct_declaration, Declaration::Struct),
            map(register_declaration, Declaration::Register),
            map(function_declaration, Declaration::Function),
            map(
                terminated(
                    VariableDecl::parse,
                    context("end of declaration", sym(";")),
                ),
                Declaration::Variable,
            ),
        ))(input)
    }
}

fn include_directive(
    input: RawSpan,
) -> ParseResult<'_, SpanNode<IncludeDirective>> {
    let (input, _) = sc(input)?;
    let start = input;
    let (i, directive) = preceded(
        pair(tag("#"), tok(tag("include"))),
        cut(context(
            "include path",
            alt((
                map(
                    tok(delimited(char('"'), is_not("\"\r\n"), char('"'))),
                    |s: RawSpan| IncludeDirective {
                        path: (*s.fragment()).to_owned(),
                        style: IncludeStyle::Quoted,
                    },
                ),
                map(
                    tok(delimited(char('<'), is_not(">\r\n"), char('>'))),
                    |s: RawSpan| IncludeDirective {
                        path: (*s.fragment()).to_owned(),
                        style: IncludeStyle::Angled,
                    },
                ),
            )),
        )),
    )(input)?;
    let index = start.offset(&i);
    Ok((
        i,
        Node(directive, Span::from_raw_span(&start.slice(..index))),
    ))
}

enum TopItem {
    Include(SpanNode<IncludeDirective>),
    Declaration(SpanNode<Declaration>),
}

impl<'a> Parse<'a> for Program {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        context(
            "program",
            map(
                all_consuming(terminated(
                    many0(alt((
                        map(include_directive, TopItem::Include),
                        map(
                            context(
                                "declaration",
                                Declaration::parse_node,
                            ),
                            TopItem::Declaration,
                        ),
                    ))),
                    sc,
                )),
                |items| {
                    let mut program = Program {
                        includes: Vec::new(),
                        declarations: Vec::new(),
                    };
                    for item in items {
                        match item {
                            TopItem::Include(include) => {
                                program.includes.push(include)
                            }
                            TopItem::Declaration(declaration) => {
                                program.declarations.push(declaration)
                            }
                        }
                    }
                    program
                },
            ),
        )(input)
    }
}

/// Parse a full translation unit.
pub(crate) fn parse(
    input: &str,
) -> Result<Program, Vec<SourceErrorWrapper<CompileError>>> {
    match Program::parse(RawSpan::new(input)) {
        Ok((_, program)) => Ok(program),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            // Grab the first error in the chain that is a Context, which
            // means we labelled it ourselves. Everything else is generated
            // by nom which means it's useless.
            let (raw_span, error_context) = e
                .errors
                .iter()
                .filter_map(|err| match err {
                    (span, VerboseErrorKind::Context(label)) => {
                        Some((span, label))
                    }
                    _ => None,
                })
                .next()
                // This indicates we're missing a context() call somewhere
                .expect("No context errors available");

            Err(vec![SourceErrorWrapper::new(
                CompileError::Syntax {
                    expected: error_context,
                },
                // the actual fragment here is just the remaining source, so
                // it's not useful - just use the position from it
                Span::from_position(raw_span),
                input,
            )])
        }
        // only possible in streaming mode
        Err(nom::Err::Incomplete(_needed)) => unreachable!(),
    }
}

impl Transpiler<()> {
    /// Parses source code from the given input, into an abstract syntax
    /// tree.
    pub(crate) fn parse(
        self,
    ) -> Result<Transpiler<Program>, WithSource<CompileError>> {
        match parse(&self.source) {
            Ok(program) => Ok(Transpiler {
                source: self.source,
                path: self.path,
                config: self.config,
                stage: program,
            }),
            Err(errors) => Err(WithSource::new(errors, self.source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        match parse(src) {
            Ok(program) => program,
            Err(errors) => panic!(
                "parse failed: {}",
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
        }
    }

    #[test]
    fn test_parse_includes() {
        let program = parse_ok(
            "#include \"util.cnx\"\n#include <stdio.h>\nu8 x <- 1;\n",
        );
        assert_eq!(program.includes.len(), 2);
        assert_eq!(program.includes[0].value().path, "util.cnx");
        assert_eq!(program.includes[0].value().style, IncludeStyle::Quoted);
        assert_eq!(program.includes[1].value().path, "stdio.h");
        assert_eq!(program.includes[1].value().style, IncludeStyle::Angled);
        assert_eq!(program.declarations.len(), 1);
    }

    #[test]
    fn test_parse_scope_with_function() {
        let program = parse_ok(
            "scope Math {
                public i32 add(i32 a, i32 b) {
                    return a + b;
                }
            }",
        );
        match program.declarations[0].value() {
            Declaration::Scope(scope) => {
                assert_eq!(scope.name.value(), "Math");
                assert_eq!(scope.members.len(), 1);
                let member = &scope.members[0];
                assert_eq!(
                    member.visibility.as_ref().map(|v| *v.value()),
                    Some(Visibility::Public)
                );
                match member.declaration.value() {
                    Declaration::Function(function) => {
                        assert_eq!(function.name.value(), "add");
                        assert_eq!(function.params.len(), 2);
                    }
                    other => panic!("expected function, got {:?}", other),
                }
            }
            other => panic!("expected scope, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_enum() {
        let program = parse_ok("enum Mode { AUTO, MANUAL, SPECIAL <- 10 }");
        match program.declarations[0].value() {
            Declaration::Enum(decl) => {
                assert_eq!(decl.name.value(), "Mode");
                assert_eq!(decl.members.len(), 3);
                assert!(decl.members[0].value.is_none());
                assert!(decl.members[2].value.is_some());
            }
            other => panic!("expected enum, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bitmap() {
        let program = parse_ok(
            "bitmap8 Status { enabled, running, error, warning, reserved[4] }",
        );
        match program.declarations[0].value() {
            Declaration::Bitmap(decl) => {
                assert_eq!(decl.width, BitmapWidth::B8);
                assert_eq!(decl.fields.len(), 5);
                assert_eq!(decl.fields[4].width.as_ref().map(|w| *w.value()), Some(4));
            }
            other => panic!("expected bitmap, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_register() {
        let program = parse_ok(
            "register GPIOA @ 0x40020000 {
                MODER @ 0x00 : u32 rw;
                ODR @ 0x14 : u32 rw as PortBits;
                ICR @ 0x18 : u32 w1c;
            }",
        );
        match program.declarations[0].value() {
            Declaration::Register(decl) => {
                assert_eq!(decl.base.value(), "0x40020000");
                assert_eq!(decl.members.len(), 3);
                assert_eq!(decl.members[0].offset.value(), "0x00");
                assert_eq!(decl.members[0].access, AccessMode::Rw);
                assert_eq!(
                    decl.members[1].bitmap.as_ref().map(|b| b.value().clone()),
                    Some("PortBits".to_owned())
                );
                assert_eq!(decl.members[2].access, AccessMode::W1c);
            }
            other => panic!("expected register, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_variable_declarations() {
        let program = parse_ok(
            "const u8 LIMIT <- 10;
            u8 values[] <- [1, 2, 3];
            saturate u8 level <- 0;
            string<16> name;
            u32 grid[2][3];",
        );
        assert_eq!(program.declarations.len(), 5);
        match program.declarations[0].value() {
            Declaration::Variable(decl) => {
                assert!(decl.qualifiers.is_const);
                assert!(decl.init.is_some());
            }
            other => panic!("expected variable, got {:?}", other),
        }
        match program.declarations[1].value() {
            Declaration::Variable(decl) => {
                assert_eq!(decl.dimensions.len(), 1);
                assert_eq!(*decl.dimensions[0].value(), ArraySize::Inferred);
            }
            other => panic!("expected variable, got {:?}", other),
        }
        match program.declarations[3].value() {
            Declaration::Variable(decl) => match decl.ty.value() {
                TypeName::String(ArraySize::Literal(16)) => {}
                other => panic!("expected string<16>, got {:?}", other),
            },
            other => panic!("expected variable, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_assignment_operators() {
        let program = parse_ok(
            "void tick() {
                counter <- 1;
                counter +<- 2;
                counter <<<- 3;
                counter >><- 1;
                flags.warning <- true;
                data[2] <- 0xFF;
                ctrl[3, 2] <- 0b10;
            }",
        );
        let body = match program.declarations[0].value() {
            Declaration::Function(function) => &function.body,
            other => panic!("expected function, got {:?}", other),
        };
        let ops: Vec<AssignOp> = body
            .statements
            .iter()
            .filter_map(|stmt| match stmt.value() {
                Statement::Assignment(assignment) => Some(assignment.op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                AssignOp::Assign,
                AssignOp::Add,
                AssignOp::Shl,
                AssignOp::Shr,
                AssignOp::Assign,
                AssignOp::Assign,
                AssignOp::Assign,
            ]
        );
        match body.statements[6].value() {
            Statement::Assignment(assignment) => {
                match assignment.target.ops[0].value() {
                    TargetOp::BitRange(_, _) => {}
                    other => panic!("expected bit range, got {:?}", other),
                }
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_control_flow() {
        let program = parse_ok(
            "void run() {
                for (u8 i <- 0; i < 10; i +<- 1) {
                    if (i == 5) {
                        continue;
                    } else if (i > 8) {
                        break;
                    } else {
                        process(i);
                    }
                }
                while (busy) {
                    wait();
                }
            }",
        );
        let body = match program.declarations[0].value() {
            Declaration::Function(function) => &function.body,
            other => panic!("expected function, got {:?}", other),
        };
        assert_eq!(body.statements.len(), 2);
        match body.statements[0].value() {
            Statement::For { init, step, .. } => {
                assert!(init.is_some());
                assert!(step.is_some());
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_expression_precedence() {
        let program = parse_ok("u32 x <- 1 + 2 * 3;");
        let init = match program.declarations[0].value() {
            Declaration::Variable(decl) => decl.init.as_ref().unwrap(),
            other => panic!("expected variable, got {:?}", other),
        };
        match init.value() {
            Expression::Binary {
                op: BinaryOp::Add,
                rhs,
                ..
            } => match rhs.value() {
                Expression::Binary {
                    op: BinaryOp::Mul, ..
                } => {}
                other => panic!("expected multiplication, got {:?}", other),
            },
            other => panic!("expected addition, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_property_access() {
        let program = parse_ok("u32 n <- arr.length;");
        let init = match program.declarations[0].value() {
            Declaration::Variable(decl) => decl.init.as_ref().unwrap(),
            other => panic!("expected variable, got {:?}", other),
        };
        match init.value() {
            Expression::Member { member, .. } => {
                assert_eq!(member.value(), "length")
            }
            other => panic!("expected member access, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_comments() {
        let program = parse_ok(
            "// leading comment
            u8 x <- 1; /* inline */ u8 y <- 2;
            /* block
               comment */
            u8 z <- 3;",
        );
        assert_eq!(program.declarations.len(), 3);
    }

    #[test]
    fn test_parse_error_position() {
        let errors = parse("u8 x <- ;").unwrap_err();
        let rendered = errors[0].to_string();
        assert!(
            rendered.starts_with("Syntax error at 1:"),
            "unexpected message: {}",
            rendered
        );
    }

    #[test]
    fn test_parse_fill_initializer() {
        let program = parse_ok("u8 buffer[8] <- [0*];");
        let init = match program.declarations[0].value() {
            Declaration::Variable(decl) => decl.init.as_ref().unwrap(),
            other => panic!("expected variable, got {:?}", other),
        };
        match init.value() {
            Expression::ArrayFill(_) => {}
            other => panic!("expected fill initializer, got {:?}", other),
        }
    }
}
