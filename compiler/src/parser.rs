// Parser for Ember source files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators with local error recovery: a malformed statement, block, or
// parenthesised expression becomes an `Error` node and parsing resumes after
// it, so downstream phases always receive a tree.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any syntax errors (non-fatal).
// Failure modes: syntax errors are collected as `SyntaxError`; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// A lex or parse error, detached from the token stream lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub span: Span,
    pub message: String,
}

/// Result of parsing: AST plus any errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub program: Program,
    pub errors: Vec<SyntaxError>,
}

/// Parse an Ember source string. Lexes then parses.
///
/// Always returns a program; input the parser could not recover from yields
/// an empty item list alongside the errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut errors: Vec<SyntaxError> = lex_result
        .errors
        .into_iter()
        .map(|e| SyntaxError {
            span: (e.span.start..e.span.end).into(),
            message: e.message,
        })
        .collect();
    errors.extend(parse_errors.into_iter().map(|e| SyntaxError {
        span: *e.span(),
        message: e.to_string(),
    }));
    errors.sort_by_key(|e| (e.span.start, e.span.end));

    let program = program.unwrap_or_else(|| Program {
        items: Vec::new(),
        span: (0..len).into(),
    });

    ParseResult { program, errors }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let span: SimpleSpan = (lhs.span.start..rhs.span.end).into();
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}

// ── Main parser builder ──
//
// Every rule borrows `source` to slice identifier text out of token spans.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start..span.end].to_string(),
            span,
        }
    });

    let type_expr = ident.clone().map(TypeExpr::Named);

    // ── Expressions ──

    let expr = recursive(|expr| {
        let literal = select! {
            Token::Int(n) => ExprKind::Int(n),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
            Token::Str(s) => ExprKind::Str(s),
        }
        .map_with(|kind, e| Expr {
            kind,
            span: e.span(),
        });

        let name = ident.clone().map(|id| {
            let span = id.span;
            Expr {
                kind: ExprKind::Name(id),
                span,
            }
        });

        let paren = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .recover_with(via_parser(nested_delimiters(
                Token::LParen,
                Token::RParen,
                [(Token::LBrace, Token::RBrace)],
                |span| Expr {
                    kind: ExprKind::Error,
                    span,
                },
            )));

        let atom = literal.or(name).or(paren);

        // Postfix calls: f(a)(b)
        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let call = atom.foldl_with(args.repeated(), |callee, args, e| Expr {
            kind: ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            span: e.span(),
        });

        // Prefix operators fold right-to-left onto the operand.
        let prefix = select! {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
        }
        .map_with(|op, e| (op, e.span()));

        let unary = prefix
            .repeated()
            .foldr(call, |(op, op_span): (UnaryOp, SimpleSpan), operand: Expr| {
                let span: SimpleSpan = (op_span.start..operand.span.end).into();
                Expr {
                    kind: ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                }
            })
            .boxed();

        let product_op = select! {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Rem,
        };
        let product = unary
            .clone()
            .foldl(product_op.then(unary).repeated(), |lhs, (op, rhs)| {
                binary(op, lhs, rhs)
            })
            .boxed();

        let sum_op = select! {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
        };
        let sum = product
            .clone()
            .foldl(sum_op.then(product).repeated(), |lhs, (op, rhs)| {
                binary(op, lhs, rhs)
            })
            .boxed();

        let compare_op = select! {
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::NotEq,
            Token::Lt => BinOp::Lt,
            Token::LtEq => BinOp::LtEq,
            Token::Gt => BinOp::Gt,
            Token::GtEq => BinOp::GtEq,
        };
        let comparison = sum
            .clone()
            .foldl(compare_op.then(sum).repeated(), |lhs, (op, rhs)| {
                binary(op, lhs, rhs)
            })
            .boxed();

        let conjunction = comparison
            .clone()
            .foldl(
                just(Token::AndAnd)
                    .to(BinOp::And)
                    .then(comparison)
                    .repeated(),
                |lhs, (op, rhs)| binary(op, lhs, rhs),
            )
            .boxed();

        conjunction
            .clone()
            .foldl(
                just(Token::OrOr).to(BinOp::Or).then(conjunction).repeated(),
                |lhs, (op, rhs)| binary(op, lhs, rhs),
            )
            .boxed()
    });

    // ── Statements ──

    // Skips to the end of a malformed statement without crossing the `}`
    // that closes the enclosing block.
    let stmt_recovery = none_of([Token::Semi, Token::RBrace])
        .repeated()
        .at_least(1)
        .then(just(Token::Semi).or_not())
        .ignored()
        .or(just(Token::Semi).ignored())
        .map_with(|_, e| Stmt {
            kind: StmtKind::Error,
            span: e.span(),
        });

    let stmt = recursive(|stmt| {
        let block = stmt
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map_with(|stmts, e| Block {
                stmts,
                span: e.span(),
            })
            .boxed();

        let let_stmt = just(Token::Let)
            .ignore_then(ident.clone())
            .then(just(Token::Colon).ignore_then(type_expr.clone()).or_not())
            .then(just(Token::Assign).ignore_then(expr.clone()).or_not())
            .then_ignore(just(Token::Semi))
            .map(|((name, ty), init)| StmtKind::Let { name, ty, init });

        let assign = ident
            .clone()
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .then_ignore(just(Token::Semi))
            .map(|(target, value)| StmtKind::Assign { target, value });

        let return_stmt = just(Token::Return)
            .ignore_then(expr.clone().or_not())
            .then_ignore(just(Token::Semi))
            .map(StmtKind::Return);

        let while_stmt = just(Token::While)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(cond, body)| StmtKind::While { cond, body });

        let if_stmt = recursive(|if_stmt| {
            let else_block = block.clone().map_with(|b, e| Stmt {
                kind: StmtKind::Block(b),
                span: e.span(),
            });
            just(Token::If)
                .ignore_then(expr.clone())
                .then(block.clone())
                .then(
                    just(Token::Else)
                        .ignore_then(else_block.or(if_stmt))
                        .or_not(),
                )
                .map_with(|((cond, then_block), else_branch), e| Stmt {
                    kind: StmtKind::If {
                        cond,
                        then_block,
                        else_branch: else_branch.map(Box::new),
                    },
                    span: e.span(),
                })
                .boxed()
        });

        let expr_stmt = expr
            .clone()
            .then_ignore(just(Token::Semi))
            .map(StmtKind::Expr);

        let simple = choice((
            let_stmt,
            return_stmt,
            while_stmt,
            block.map(StmtKind::Block),
            assign,
            expr_stmt,
        ))
        .map_with(|kind, e| Stmt {
            kind,
            span: e.span(),
        });

        if_stmt
            .or(simple)
            .recover_with(via_parser(stmt_recovery.clone()))
            .boxed()
    });

    let block = stmt
        .clone()
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace))
        .map_with(|stmts, e| Block {
            stmts,
            span: e.span(),
        })
        .recover_with(via_parser(nested_delimiters(
            Token::LBrace,
            Token::RBrace,
            [(Token::LParen, Token::RParen)],
            |span| Block {
                stmts: vec![Stmt {
                    kind: StmtKind::Error,
                    span,
                }],
                span,
            },
        )));

    // ── Items ──

    let param = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then(type_expr.clone())
        .map_with(|(name, ty), e| Param {
            name,
            ty,
            span: e.span(),
        });

    let fn_item = just(Token::Fn)
        .ignore_then(ident.clone())
        .then(
            param
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(just(Token::Arrow).ignore_then(type_expr.clone()).or_not())
        .then(block)
        .map(|(((name, params), ret), body)| {
            ItemKind::Function(FnDecl {
                name,
                params,
                ret,
                body,
            })
        });

    let alias_item = just(Token::Type)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Assign))
        .then(type_expr)
        .then_ignore(just(Token::Semi))
        .map(|(name, target)| ItemKind::TypeAlias(TypeAliasDecl { name, target }));

    // A stray token that no item can start with (e.g. an unmatched `}`)
    // becomes an error statement on its own.
    let stray = any().map_with(|_, e| Item {
        kind: ItemKind::Stmt(Stmt {
            kind: StmtKind::Error,
            span: e.span(),
        }),
        span: e.span(),
    });

    let item = choice((fn_item, alias_item, stmt.map(ItemKind::Stmt)))
        .map_with(|kind, e| Item {
            kind,
            span: e.span(),
        })
        .recover_with(via_parser(stray));

    item.repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
        .map_with(|items, e| Program {
            items,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected parse errors: {:?}",
            result.errors
        );
        result.program
    }

    fn top_stmt(program: &Program, index: usize) -> &Stmt {
        let ItemKind::Stmt(stmt) = &program.items[index].kind else {
            panic!("expected statement item, got {:?}", program.items[index]);
        };
        stmt
    }

    #[test]
    fn let_without_initializer() {
        let program = parse_ok("let x;");
        let StmtKind::Let { name, ty, init } = &top_stmt(&program, 0).kind else {
            panic!("expected let");
        };
        assert_eq!(name.name, "x");
        assert!(ty.is_none());
        assert!(init.is_none());
    }

    #[test]
    fn binary_precedence() {
        let program = parse_ok("let y = 1 + 2 * 3;");
        let StmtKind::Let {
            init: Some(init), ..
        } = &top_stmt(&program, 0).kind
        else {
            panic!("expected let with initializer");
        };
        let ExprKind::Binary { op, rhs, .. } = &init.kind else {
            panic!("expected binary, got {:?}", init.kind);
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
        assert_eq!((init.span.start, init.span.end), (8, 17));
    }

    #[test]
    fn unary_and_calls() {
        let program = parse_ok("print(-x, !f(1)(2));");
        let StmtKind::Expr(expr) = &top_stmt(&program, 0).kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Call { args, .. } = &expr.kind else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 2);
        assert!(matches!(
            args[0].kind,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
        let ExprKind::Unary { operand, .. } = &args[1].kind else {
            panic!("expected unary");
        };
        assert!(matches!(operand.kind, ExprKind::Call { .. }));
    }

    #[test]
    fn function_and_alias_items() {
        let program = parse_ok(
            "type Count = Int;\n\
             fn add(a: Int, b: Count) -> Int { return a + b; }",
        );
        assert_eq!(program.items.len(), 2);
        let ItemKind::TypeAlias(alias) = &program.items[0].kind else {
            panic!("expected alias");
        };
        assert_eq!(alias.name.name, "Count");
        let ItemKind::Function(f) = &program.items[1].kind else {
            panic!("expected function");
        };
        assert_eq!(f.name.name, "add");
        assert_eq!(f.params.len(), 2);
        assert!(f.ret.is_some());
        assert_eq!(f.body.stmts.len(), 1);
    }

    #[test]
    fn if_else_chain_and_while() {
        let program = parse_ok(
            "fn f(n: Int) { let x; if n > 0 { x = 1; } else if n < 0 { x = 2; } else { x = 3; } \
             while x > 0 { x = x - 1; } }",
        );
        let ItemKind::Function(f) = &program.items[0].kind else {
            panic!("expected function");
        };
        let StmtKind::If { else_branch, .. } = &f.body.stmts[1].kind else {
            panic!("expected if");
        };
        let nested = else_branch.as_ref().expect("else branch");
        assert!(matches!(nested.kind, StmtKind::If { .. }));
        assert!(matches!(f.body.stmts[2].kind, StmtKind::While { .. }));
    }

    #[test]
    fn assignment_vs_equality() {
        let program = parse_ok("x = 1; x == 1;");
        assert!(matches!(
            top_stmt(&program, 0).kind,
            StmtKind::Assign { .. }
        ));
        assert!(matches!(top_stmt(&program, 1).kind, StmtKind::Expr(_)));
    }

    #[test]
    fn malformed_statement_recovers() {
        let result = parse("let = 5; let y = 2;");
        assert!(!result.errors.is_empty());
        let program = result.program;
        assert_eq!(program.items.len(), 2);
        assert!(matches!(top_stmt(&program, 0).kind, StmtKind::Error));
        assert!(matches!(top_stmt(&program, 1).kind, StmtKind::Let { .. }));
    }

    #[test]
    fn malformed_statement_inside_function_recovers() {
        let result = parse("fn f() { let y = ; print(1); }\nfn g() { }");
        assert!(!result.errors.is_empty());
        let functions: Vec<_> = result
            .program
            .items
            .iter()
            .filter_map(|item| match &item.kind {
                ItemKind::Function(f) => Some(f.name.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(functions, vec!["f", "g"]);
    }

    #[test]
    fn lex_errors_are_merged() {
        let result = parse("let x = 1 $ 2;");
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("unexpected input")));
    }
}
