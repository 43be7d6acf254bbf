//! Recursive-descent parser

use crate::ast::*;
use crate::error::SyntaxDiagnostic;
use crate::lexer::{tokenize, Token, TokenKind};
use crate::value::number_to_string;
use std::rc::Rc;

type PResult<T> = Result<T, SyntaxDiagnostic>;

/// Deepest syntactic nesting accepted. Statements, assignments, unary
/// operands and `new` callees each count one level, as does every link of
/// an operator, member or call chain.
pub const MAX_NESTING_DEPTH: usize = 256;

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "false", "finally", "for", "function", "if", "import", "in",
    "instanceof", "let", "new", "null", "return", "super", "switch", "this", "throw", "true",
    "try", "typeof", "var", "void", "while", "with", "yield",
];

fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// Parses a complete script.
pub fn parse(source: &str, origin: &str) -> PResult<Program> {
    let tokens = tokenize(source).map_err(|e| SyntaxDiagnostic {
        message: e.message,
        origin: origin.to_string(),
        line: e.line,
        column: e.column,
    })?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        origin,
        function_depth: 0,
        loop_depth: 0,
        nesting: 0,
    };
    parser.program()
}

enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_operator(kind: &TokenKind, no_in: bool) -> Option<(u8, Operator)> {
    use Operator::{Binary, Logical};
    let op = match kind {
        TokenKind::Punct(p) => match *p {
            "??" => (1, Logical(LogicalOp::Nullish)),
            "||" => (2, Logical(LogicalOp::Or)),
            "&&" => (3, Logical(LogicalOp::And)),
            "|" => (4, Binary(BinaryOp::BitOr)),
            "^" => (5, Binary(BinaryOp::BitXor)),
            "&" => (6, Binary(BinaryOp::BitAnd)),
            "==" => (7, Binary(BinaryOp::Eq)),
            "!=" => (7, Binary(BinaryOp::NotEq)),
            "===" => (7, Binary(BinaryOp::StrictEq)),
            "!==" => (7, Binary(BinaryOp::StrictNotEq)),
            "<" => (8, Binary(BinaryOp::Lt)),
            ">" => (8, Binary(BinaryOp::Gt)),
            "<=" => (8, Binary(BinaryOp::LtEq)),
            ">=" => (8, Binary(BinaryOp::GtEq)),
            "<<" => (9, Binary(BinaryOp::Shl)),
            ">>" => (9, Binary(BinaryOp::Shr)),
            ">>>" => (9, Binary(BinaryOp::UShr)),
            "+" => (10, Binary(BinaryOp::Add)),
            "-" => (10, Binary(BinaryOp::Sub)),
            "*" => (11, Binary(BinaryOp::Mul)),
            "/" => (11, Binary(BinaryOp::Div)),
            "%" => (11, Binary(BinaryOp::Rem)),
            "**" => (12, Binary(BinaryOp::Exp)),
            _ => return None,
        },
        TokenKind::Ident(name) => match &**name {
            "instanceof" => (8, Binary(BinaryOp::InstanceOf)),
            "in" if !no_in => (8, Binary(BinaryOp::In)),
            _ => return None,
        },
        _ => return None,
    };
    Some(op)
}

fn assignment_operator(kind: &TokenKind) -> Option<Option<BinaryOp>> {
    let TokenKind::Punct(p) = kind else {
        return None;
    };
    let op = match *p {
        "=" => None,
        "+=" => Some(BinaryOp::Add),
        "-=" => Some(BinaryOp::Sub),
        "*=" => Some(BinaryOp::Mul),
        "/=" => Some(BinaryOp::Div),
        "%=" => Some(BinaryOp::Rem),
        "**=" => Some(BinaryOp::Exp),
        "<<=" => Some(BinaryOp::Shl),
        ">>=" => Some(BinaryOp::Shr),
        ">>>=" => Some(BinaryOp::UShr),
        "&=" => Some(BinaryOp::BitAnd),
        "|=" => Some(BinaryOp::BitOr),
        "^=" => Some(BinaryOp::BitXor),
        _ => return None,
    };
    Some(op)
}

struct Parser<'o> {
    tokens: Vec<Token>,
    pos: usize,
    origin: &'o str,
    function_depth: usize,
    loop_depth: usize,
    nesting: usize,
}

impl<'o> Parser<'o> {
    // Token stream helpers

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        // The stream always ends with Eof, which is never consumed.
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !matches!(token.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Punct(q) if *q == p)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.is_keyword_at(0, keyword)
    }

    fn is_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(&self.peek_at(offset).kind, TokenKind::Ident(n) if &**n == keyword)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected_here())
        }
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> SyntaxDiagnostic {
        SyntaxDiagnostic {
            message: message.into(),
            origin: self.origin.to_string(),
            line: token.line,
            column: token.column,
        }
    }

    fn unexpected(&self, token: &Token) -> SyntaxDiagnostic {
        let message = match &token.kind {
            TokenKind::Eof => "Unexpected end of input".to_string(),
            TokenKind::Number(_) => "Unexpected number".to_string(),
            TokenKind::String(_) => "Unexpected string".to_string(),
            TokenKind::Ident(n) if is_reserved(n) => format!("Unexpected token '{}'", n),
            TokenKind::Ident(n) => format!("Unexpected identifier '{}'", n),
            TokenKind::Punct(p) => format!("Unexpected token '{}'", p),
        };
        self.error_at(token, message)
    }

    fn unexpected_here(&self) -> SyntaxDiagnostic {
        self.unexpected(self.peek())
    }

    /// Runs `parse` one nesting level deeper, failing once the level
    /// passes [`MAX_NESTING_DEPTH`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let outer = self.nesting;
        self.deepen()?;
        let result = parse(self);
        self.nesting = outer;
        result
    }

    /// Counts one more level for a node that wraps the one built before it.
    fn deepen(&mut self) -> PResult<()> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(self.error_at(self.peek(), "Maximum nesting depth exceeded"));
        }
        self.nesting += 1;
        Ok(())
    }

    /// Accepts an explicit `;` or inserts one before `}`, end of input or
    /// a line break.
    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let token = self.peek();
        if token.newline_before || matches!(token.kind, TokenKind::Eof) || self.is_punct("}") {
            return Ok(());
        }
        Err(self.unexpected_here())
    }

    fn binding_identifier(&mut self) -> PResult<Rc<str>> {
        let name = match &self.peek().kind {
            TokenKind::Ident(n) if !is_reserved(n) => Some(n.clone()),
            _ => None,
        };
        let name = name.ok_or_else(|| self.unexpected_here())?;
        self.advance();
        Ok(name)
    }

    // Statements

    fn program(&mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while !matches!(self.peek().kind, TokenKind::Eof) {
            body.push(self.statement()?);
        }
        Ok(Program { body })
    }

    fn statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::parse_statement)
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        if self.eat_punct("{") {
            return Ok(Stmt::Block(self.block_body()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        let keyword = match &self.peek().kind {
            TokenKind::Ident(name) => Some(name.clone()),
            _ => None,
        };
        let Some(keyword) = keyword else {
            return self.expression_statement();
        };
        match &*keyword {
            "var" | "let" | "const" => {
                let decl = self.var_declaration(false)?;
                self.consume_semicolon()?;
                Ok(Stmt::Var(decl))
            }
            "function" => {
                self.advance();
                Ok(Stmt::Function(self.function_rest(true)?))
            }
            "if" => self.if_statement(),
            "while" => self.while_statement(),
            "do" => self.do_while_statement(),
            "for" => self.for_statement(),
            "return" => self.return_statement(),
            "break" | "continue" => self.jump_statement(&keyword),
            "throw" => self.throw_statement(),
            "try" => self.try_statement(),
            _ => self.expression_statement(),
        }
    }

    /// Statements up to the closing `}`; the opening brace is already consumed.
    fn block_body(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if matches!(self.peek().kind, TokenKind::Eof) {
                return Err(self.unexpected_here());
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        self.block_body()
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.expression(false)?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn declaration_kind(&self) -> Option<VarKind> {
        match &self.peek().kind {
            TokenKind::Ident(n) => match &**n {
                "var" => Some(VarKind::Var),
                "let" => Some(VarKind::Let),
                "const" => Some(VarKind::Const),
                _ => None,
            },
            _ => None,
        }
    }

    fn var_declaration(&mut self, no_in: bool) -> PResult<VarDecl> {
        let kind = self.declaration_kind().ok_or_else(|| self.unexpected_here())?;
        self.advance();
        let mut declarations = Vec::new();
        loop {
            let name_token = self.peek().clone();
            let name = self.binding_identifier()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment(no_in)?)
            } else {
                None
            };
            if kind == VarKind::Const && init.is_none() {
                return Err(self.error_at(&name_token, "Missing initializer in const declaration"));
            }
            declarations.push(Declarator { name, init });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(VarDecl { kind, declarations })
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct("(")?;
        let test = self.expression(false)?;
        self.expect_punct(")")?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.is_keyword("else") {
            self.advance();
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn loop_body(&mut self) -> PResult<Stmt> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        body
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct("(")?;
        let test = self.expression(false)?;
        self.expect_punct(")")?;
        let body = Box::new(self.loop_body()?);
        Ok(Stmt::While { test, body })
    }

    fn do_while_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let body = Box::new(self.loop_body()?);
        if !self.is_keyword("while") {
            return Err(self.unexpected_here());
        }
        self.advance();
        self.expect_punct("(")?;
        let test = self.expression(false)?;
        self.expect_punct(")")?;
        // A semicolon is always optional after do-while.
        self.eat_punct(";");
        Ok(Stmt::DoWhile { body, test })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct("(")?;
        let mut init = None;
        if !self.is_punct(";") {
            if let Some(kind) = self.declaration_kind() {
                if matches!(self.peek_at(1).kind, TokenKind::Ident(_)) && self.is_keyword_at(2, "in")
                {
                    self.advance();
                    let name = self.binding_identifier()?;
                    self.advance();
                    return self.for_in_rest(ForInLeft::Declaration(kind, name));
                }
                init = Some(ForInit::Var(self.var_declaration(true)?));
            } else {
                let start = self.peek().clone();
                let expr = self.expression(true)?;
                if self.is_keyword("in") {
                    if !expr.is_assignment_target() {
                        return Err(self.error_at(&start, "Invalid left-hand side in for-in loop"));
                    }
                    self.advance();
                    return self.for_in_rest(ForInLeft::Target(expr));
                }
                init = Some(ForInit::Expr(expr));
            }
        }
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression(false)?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression(false)?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.loop_body()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn for_in_rest(&mut self, left: ForInLeft) -> PResult<Stmt> {
        let right = self.expression(false)?;
        self.expect_punct(")")?;
        let body = Box::new(self.loop_body()?);
        Ok(Stmt::ForIn { left, right, body })
    }

    fn return_statement(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        if self.function_depth == 0 {
            return Err(self.error_at(&token, "Illegal return statement"));
        }
        let next = self.peek();
        let argument = if next.newline_before
            || matches!(next.kind, TokenKind::Eof)
            || self.is_punct(";")
            || self.is_punct("}")
        {
            None
        } else {
            Some(self.expression(false)?)
        };
        self.consume_semicolon()?;
        Ok(Stmt::Return(argument))
    }

    fn jump_statement(&mut self, keyword: &str) -> PResult<Stmt> {
        let token = self.advance();
        if self.loop_depth == 0 {
            let message = if keyword == "break" {
                "Illegal break statement"
            } else {
                "Illegal continue statement: no surrounding iteration statement"
            };
            return Err(self.error_at(&token, message));
        }
        self.consume_semicolon()?;
        Ok(if keyword == "break" {
            Stmt::Break
        } else {
            Stmt::Continue
        })
    }

    fn throw_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        if self.peek().newline_before {
            let token = self.peek().clone();
            return Err(self.error_at(&token, "Illegal newline after throw"));
        }
        let argument = self.expression(false)?;
        self.consume_semicolon()?;
        Ok(Stmt::Throw(argument))
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        let block = self.block()?;
        let handler = if self.is_keyword("catch") {
            self.advance();
            let param = if self.eat_punct("(") {
                let name = self.binding_identifier()?;
                self.expect_punct(")")?;
                Some(name)
            } else {
                None
            };
            Some(CatchClause {
                param,
                body: self.block()?,
            })
        } else {
            None
        };
        let finalizer = if self.is_keyword("finally") {
            self.advance();
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error_at(&token, "Missing catch or finally after try"));
        }
        Ok(Stmt::Try {
            block,
            handler,
            finalizer,
        })
    }

    /// Parameters and body of a function; `function` is already consumed.
    fn function_rest(&mut self, declaration: bool) -> PResult<Rc<FunctionNode>> {
        let name = if matches!(self.peek().kind, TokenKind::Ident(_)) {
            Some(self.binding_identifier()?)
        } else if declaration {
            return Err(self.unexpected_here());
        } else {
            None
        };
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            params.push(self.binding_identifier()?);
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        self.expect_punct("{")?;
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.block_body();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        Ok(Rc::new(FunctionNode {
            name,
            params,
            body: body?,
        }))
    }

    // Expressions

    fn expression(&mut self, no_in: bool) -> PResult<Expr> {
        let first = self.assignment(no_in)?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.assignment(no_in)?);
        }
        Ok(Expr::Sequence(items))
    }

    fn assignment(&mut self, no_in: bool) -> PResult<Expr> {
        self.nested(|parser| parser.parse_assignment(no_in))
    }

    fn parse_assignment(&mut self, no_in: bool) -> PResult<Expr> {
        let start = self.peek().clone();
        let target = self.conditional(no_in)?;
        let Some(op) = assignment_operator(&self.peek().kind) else {
            return Ok(target);
        };
        if !target.is_assignment_target() {
            return Err(self.error_at(&start, "Invalid left-hand side in assignment"));
        }
        self.advance();
        let value = self.assignment(no_in)?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self, no_in: bool) -> PResult<Expr> {
        let test = self.binary(1, no_in)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment(false)?;
        self.expect_punct(":")?;
        let alternate = self.assignment(no_in)?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary(&mut self, min_precedence: u8, no_in: bool) -> PResult<Expr> {
        let outer = self.nesting;
        let mut left = self.unary()?;
        while let Some((precedence, op)) = binary_operator(&self.peek().kind, no_in) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            // `**` is right-associative.
            let next = if matches!(op, Operator::Binary(BinaryOp::Exp)) {
                precedence
            } else {
                precedence + 1
            };
            let right = if next == precedence {
                self.nested(|parser| parser.binary(next, no_in))?
            } else {
                self.binary(next, no_in)?
            };
            self.deepen()?;
            left = match op {
                Operator::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Operator::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        self.nesting = outer;
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_unary)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match &self.peek().kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Minus),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Punct("~") => Some(UnaryOp::BitNot),
            TokenKind::Ident(n) if &**n == "typeof" => Some(UnaryOp::TypeOf),
            TokenKind::Ident(n) if &**n == "void" => Some(UnaryOp::Void),
            TokenKind::Ident(n) if &**n == "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let arg = self.unary()?;
            return Ok(Expr::Unary {
                op,
                arg: Box::new(arg),
            });
        }
        let update = if self.is_punct("++") {
            Some(UpdateOp::Increment)
        } else if self.is_punct("--") {
            Some(UpdateOp::Decrement)
        } else {
            None
        };
        if let Some(op) = update {
            let token = self.advance();
            let target = self.unary()?;
            if !target.is_assignment_target() {
                return Err(self.error_at(
                    &token,
                    "Invalid left-hand side expression in prefix operation",
                ));
            }
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let start = self.peek().clone();
        let expr = self.call_expression()?;
        if self.peek().newline_before {
            return Ok(expr);
        }
        let op = if self.is_punct("++") {
            UpdateOp::Increment
        } else if self.is_punct("--") {
            UpdateOp::Decrement
        } else {
            return Ok(expr);
        };
        if !expr.is_assignment_target() {
            return Err(self.error_at(
                &start,
                "Invalid left-hand side expression in postfix operation",
            ));
        }
        self.advance();
        Ok(Expr::Update {
            op,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_expression(&mut self) -> PResult<Expr> {
        let outer = self.nesting;
        let mut expr = if self.is_keyword("new") {
            self.new_expression()?
        } else {
            self.primary()?
        };
        loop {
            self.deepen()?;
            if self.is_punct(".") || self.is_punct("[") {
                expr = self.member_rest(expr)?;
            } else if self.eat_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                self.nesting = outer;
                return Ok(expr);
            }
        }
    }

    fn new_expression(&mut self) -> PResult<Expr> {
        self.advance();
        let mut callee = if self.is_keyword("new") {
            self.nested(Self::new_expression)?
        } else {
            self.primary()?
        };
        let outer = self.nesting;
        while self.is_punct(".") || self.is_punct("[") {
            self.deepen()?;
            callee = self.member_rest(callee)?;
        }
        self.nesting = outer;
        let args = if self.eat_punct("(") {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    fn member_rest(&mut self, object: Expr) -> PResult<Expr> {
        let property = if self.eat_punct(".") {
            let token = self.advance();
            match &token.kind {
                TokenKind::Ident(name) => MemberKey::Static(name.clone()),
                _ => return Err(self.unexpected(&token)),
            }
        } else {
            self.expect_punct("[")?;
            let key = self.expression(false)?;
            self.expect_punct("]")?;
            MemberKey::Computed(Box::new(key))
        };
        Ok(Expr::Member {
            object: Box::new(object),
            property,
        })
    }

    /// Call arguments; the opening parenthesis is already consumed.
    fn arguments(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.assignment(false)?);
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.advance();
        match &token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(*n)),
            TokenKind::String(s) => Ok(Expr::String(s.clone())),
            TokenKind::Ident(name) => match &**name {
                "this" => Ok(Expr::This),
                "null" => Ok(Expr::Null),
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "function" => Ok(Expr::Function(self.function_rest(false)?)),
                n if is_reserved(n) => Err(self.unexpected(&token)),
                _ => Ok(Expr::Ident(name.clone())),
            },
            TokenKind::Punct("(") => {
                let expr = self.expression(false)?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => self.array_literal(),
            TokenKind::Punct("{") => self.object_literal(),
            _ => Err(self.unexpected(&token)),
        }
    }

    fn array_literal(&mut self) -> PResult<Expr> {
        let mut elements = Vec::new();
        loop {
            if self.eat_punct("]") {
                return Ok(Expr::Array(elements));
            }
            if self.eat_punct(",") {
                elements.push(None);
                continue;
            }
            elements.push(Some(self.assignment(false)?));
            if !self.is_punct("]") {
                self.expect_punct(",")?;
            }
        }
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        let mut properties = Vec::new();
        while !self.eat_punct("}") {
            let token = self.advance();
            let key = match &token.kind {
                TokenKind::Ident(n) => PropName::Static(n.clone()),
                TokenKind::String(s) => PropName::Static(s.clone()),
                TokenKind::Number(n) => PropName::Static(Rc::from(number_to_string(*n))),
                TokenKind::Punct("[") => {
                    let key = self.assignment(false)?;
                    self.expect_punct("]")?;
                    PropName::Computed(key)
                }
                _ => return Err(self.unexpected(&token)),
            };
            let value = if self.eat_punct(":") {
                self.assignment(false)?
            } else if self.is_punct("(") {
                Expr::Function(self.function_rest(false)?)
            } else {
                match &token.kind {
                    TokenKind::Ident(n)
                        if !is_reserved(n) && (self.is_punct(",") || self.is_punct("}")) =>
                    {
                        Expr::Ident(n.clone())
                    }
                    _ => return Err(self.unexpected_here()),
                }
            };
            properties.push((key, value));
            if !self.is_punct("}") {
                self.expect_punct(",")?;
            }
        }
        Ok(Expr::Object(properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        parse(src, "test.js").unwrap()
    }

    fn parse_err(src: &str) -> SyntaxDiagnostic {
        parse(src, "test.js").unwrap_err()
    }

    #[test]
    fn test_precedence() {
        let program = parse_ok("1 + 2 * 3");
        let Stmt::Expr(Expr::Binary { op, right, .. }) = &program.body[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_exponent_is_right_associative() {
        let program = parse_ok("2 ** 3 ** 2");
        let Stmt::Expr(Expr::Binary { left, .. }) = &program.body[0] else {
            panic!("expected binary expression");
        };
        assert!(matches!(**left, Expr::Number(_)));
    }

    #[test]
    fn test_semicolon_insertion() {
        let program = parse_ok("x = 1\ny = x + 41\n");
        assert_eq!(program.body.len(), 2);
        let program = parse_ok("function f() { return\n1 }");
        let Stmt::Function(f) = &program.body[0] else {
            panic!("expected function");
        };
        assert!(matches!(f.body[0], Stmt::Return(None)));
    }

    #[test]
    fn test_missing_semicolon_on_one_line() {
        let err = parse_err("x = 1 y = 2");
        assert_eq!(err.message, "Unexpected identifier 'y'");
        assert_eq!((err.line, err.column), (1, 7));
        assert_eq!(err.origin, "test.js");
    }

    #[test]
    fn test_array_holes() {
        let program = parse_ok("[1,,2,]");
        let Stmt::Expr(Expr::Array(elements)) = &program.body[0] else {
            panic!("expected array literal");
        };
        assert_eq!(elements.len(), 3);
        assert!(elements[1].is_none());
    }

    #[test]
    fn test_for_in_forms() {
        let program = parse_ok("for (var k in o) {} for (k in o) {} for (var i = 0; i < 3; i++) {}");
        assert!(matches!(
            program.body[0],
            Stmt::ForIn {
                left: ForInLeft::Declaration(VarKind::Var, _),
                ..
            }
        ));
        assert!(matches!(
            program.body[1],
            Stmt::ForIn {
                left: ForInLeft::Target(_),
                ..
            }
        ));
        assert!(matches!(program.body[2], Stmt::For { .. }));
    }

    #[test]
    fn test_object_literal_forms() {
        let program = parse_ok("({a: 1, 'b': 2, 3: 4, [k]: 5, c, m() { return 1 }})");
        let Stmt::Expr(Expr::Object(props)) = &program.body[0] else {
            panic!("expected object literal");
        };
        assert_eq!(props.len(), 6);
        assert!(matches!(&props[2].0, PropName::Static(k) if &**k == "3"));
        assert!(matches!(props[4].1, Expr::Ident(_)));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_err("1 = 2");
        assert_eq!(err.message, "Invalid left-hand side in assignment");
    }

    #[test]
    fn test_illegal_jumps() {
        assert_eq!(parse_err("return 1").message, "Illegal return statement");
        assert_eq!(parse_err("break").message, "Illegal break statement");
        // Loops do not leak into nested functions.
        assert_eq!(
            parse_err("while (1) { (function () { break; }) }").message,
            "Illegal break statement"
        );
    }

    #[test]
    fn test_unexpected_end_of_input() {
        let err = parse_err("function f() {");
        assert_eq!(err.message, "Unexpected end of input");
    }

    #[test]
    fn test_lex_errors_carry_origin() {
        let err = parse_err("x = 'abc");
        assert_eq!(err.origin, "test.js");
        assert_eq!(err.message, "Invalid or unexpected token");
    }

    #[test]
    fn test_const_requires_initializer() {
        assert_eq!(
            parse_err("const a;").message,
            "Missing initializer in const declaration"
        );
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = parse_err(&deep);
        assert_eq!(err.message, "Maximum nesting depth exceeded");
        assert_eq!(err.line, 1);

        let arrays = format!("{}{}", "[".repeat(20_000), "]".repeat(20_000));
        assert_eq!(parse_err(&arrays).message, "Maximum nesting depth exceeded");
        assert_eq!(parse_err(&"!".repeat(100_000)).message, "Maximum nesting depth exceeded");
        assert_eq!(
            parse_err(&format!("{}x", "new ".repeat(100_000))).message,
            "Maximum nesting depth exceeded"
        );
        assert_eq!(
            parse_err(&format!("{}2", "2 ** ".repeat(100_000))).message,
            "Maximum nesting depth exceeded"
        );
        assert_eq!(parse_err(&"{".repeat(100_000)).message, "Maximum nesting depth exceeded");
    }

    #[test]
    fn test_long_chains_count_as_nesting() {
        let sum = format!("{}1", "1 + ".repeat(100_000));
        assert_eq!(parse_err(&sum).message, "Maximum nesting depth exceeded");
        let calls = format!("f{}", "()".repeat(100_000));
        assert_eq!(parse_err(&calls).message, "Maximum nesting depth exceeded");
        let members = format!("a{}", ".b".repeat(100_000));
        assert_eq!(parse_err(&members).message, "Maximum nesting depth exceeded");
    }

    #[test]
    fn test_ordinary_nesting_parses() {
        parse_ok(&format!("x = {}1{}", "(".repeat(100), ")".repeat(100)));
        parse_ok(&format!("{}{}", "{".repeat(100), "}".repeat(100)));
        parse_ok(&format!("{}1", "1 + ".repeat(200)));
        parse_ok(&format!("a{}.c(1)(2)", ".b".repeat(200)));
    }

    #[test]
    fn test_new_with_member_callee() {
        let program = parse_ok("new a.B(1).c");
        let Stmt::Expr(Expr::Member { object, .. }) = &program.body[0] else {
            panic!("expected member expression");
        };
        assert!(matches!(**object, Expr::New { .. }));
    }
}
