mod error;

pub use error::ParseError;

use crate::ast::{
    BoolOperator, CmpOperator, Expr, Module, NameConstant, Number, Operator, Parameter, Stmt,
    UnaryOperator,
};
use crate::lexer::{Token, TokenType};

use std::collections::VecDeque;
use std::mem::discriminant;

/// Parses a token stream into a module.
pub fn parse(tokens: Vec<Token>) -> Result<Module, Vec<ParseError>> {
    let mut parser = Parser::new(tokens);
    parser.parse()
}

/// Recursive descent parser for the surface language.
pub struct Parser {
    /// Queue of tokens to be processed
    tokens: VecDeque<Token>,

    /// Current token being processed
    current: Option<Token>,

    /// Position of the most recently consumed token, for EOF diagnostics
    last_line: usize,
    last_column: usize,

    /// Errors encountered during parsing
    errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut tokens_deque = VecDeque::from(tokens);
        let current = tokens_deque.pop_front();

        Parser {
            tokens: tokens_deque,
            current,
            last_line: 1,
            last_column: 1,
            errors: Vec::new(),
        }
    }

    /// Parses the entire input and returns a module
    pub fn parse(&mut self) -> Result<Module, Vec<ParseError>> {
        let mut body = Vec::new();

        loop {
            match self.current_type() {
                None | Some(TokenType::EOF) => break,
                Some(TokenType::Newline) | Some(TokenType::Dedent) => {
                    self.advance();
                    continue;
                }
                _ => {}
            }

            match self.parse_statement() {
                Ok(stmt) => body.push(Box::new(stmt)),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(Module { body })
        } else {
            Err(self.errors.clone())
        }
    }

    // ---- token plumbing -------------------------------------------------

    fn advance(&mut self) -> Option<Token> {
        let previous = self.current.take();
        if let Some(token) = &previous {
            self.last_line = token.line;
            self.last_column = token.column;
        }
        self.current = self.tokens.pop_front();
        previous
    }

    fn current_type(&self) -> Option<&TokenType> {
        self.current.as_ref().map(|t| &t.token_type)
    }

    fn peek_next_type(&self) -> Option<&TokenType> {
        self.tokens.front().map(|t| &t.token_type)
    }

    fn check(&self, token_type: &TokenType) -> bool {
        match self.current_type() {
            Some(current) => discriminant(current) == discriminant(token_type),
            None => false,
        }
    }

    fn match_token(&mut self, token_type: &TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token_type: &TokenType, expected: &str) -> Result<Token, ParseError> {
        if self.check(token_type) {
            Ok(self.advance().expect("checked token must exist"))
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<(String, usize, usize), ParseError> {
        match self.current.clone() {
            Some(Token {
                token_type: TokenType::Identifier(name),
                line,
                column,
                ..
            }) => {
                self.advance();
                Ok((name, line, column))
            }
            Some(token) => Err(ParseError::unexpected_token(
                expected,
                token.token_type,
                token.line,
                token.column,
            )),
            None => Err(ParseError::eof(expected, self.last_line, self.last_column)),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match &self.current {
            Some(token) => ParseError::unexpected_token(
                expected,
                token.token_type.clone(),
                token.line,
                token.column,
            ),
            None => ParseError::eof(expected, self.last_line, self.last_column),
        }
    }

    fn position(&self) -> (usize, usize) {
        match &self.current {
            Some(token) => (token.line, token.column),
            None => (self.last_line, self.last_column),
        }
    }

    /// Skips forward to the next statement boundary after an error.
    fn synchronize(&mut self) {
        loop {
            match self.current_type() {
                None | Some(TokenType::EOF) | Some(TokenType::Dedent) => break,
                Some(TokenType::Newline) => {
                    self.advance();
                    break;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ---- statements -----------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.current_type() {
            Some(TokenType::At) | Some(TokenType::Def) => self.parse_function_def(),
            Some(TokenType::If) => self.parse_if(),
            Some(TokenType::While) => self.parse_while(),
            Some(TokenType::For) => self.parse_for(),
            _ => self.parse_simple_statement(),
        }
    }

    fn parse_function_def(&mut self) -> Result<Stmt, ParseError> {
        let (line, column) = self.position();

        let mut decorator_list = Vec::new();
        while self.match_token(&TokenType::At) {
            let (name, _, _) = self.expect_identifier("decorator name")?;
            decorator_list.push(name);
            self.expect(&TokenType::Newline, "newline after decorator")?;
        }

        self.expect(&TokenType::Def, "'def'")?;
        let (name, _, _) = self.expect_identifier("function name")?;
        self.expect(&TokenType::LeftParen, "'(' after function name")?;

        let mut params = Vec::new();
        let mut seen_default = false;
        while !self.check(&TokenType::RightParen) {
            let (param_name, param_line, param_column) = self.expect_identifier("parameter name")?;
            let default = if self.match_token(&TokenType::Assign) {
                seen_default = true;
                Some(self.parse_expression()?)
            } else {
                if seen_default {
                    return Err(ParseError::invalid_syntax(
                        "parameter without a default follows parameter with a default",
                        param_line,
                        param_column,
                    ));
                }
                None
            };
            params.push(Parameter {
                name: param_name,
                default,
            });
            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        self.expect(&TokenType::RightParen, "')' after parameters")?;

        let body = self.parse_block()?;

        Ok(Stmt::FunctionDef {
            name,
            params,
            body,
            decorator_list,
            line,
            column,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let (line, column) = self.position();
        self.advance(); // 'if' or 'elif'

        let test = self.parse_expression()?;
        let body = self.parse_block()?;

        let orelse = match self.current_type() {
            Some(TokenType::Elif) => vec![Box::new(self.parse_if()?)],
            Some(TokenType::Else) => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };

        Ok(Stmt::If {
            test,
            body,
            orelse,
            line,
            column,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let (line, column) = self.position();
        self.advance();

        let test = self.parse_expression()?;
        let body = self.parse_block()?;

        Ok(Stmt::While {
            test,
            body,
            line,
            column,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let (line, column) = self.position();
        self.advance();

        let target = self.parse_postfix()?;
        self.validate_target(&target)?;
        self.expect(&TokenType::In, "'in' in for statement")?;
        let iter = self.parse_expression()?;
        let body = self.parse_block()?;

        Ok(Stmt::For {
            target,
            iter,
            body,
            line,
            column,
        })
    }

    /// Parses `: NEWLINE INDENT stmt+ DEDENT`, or a single simple statement
    /// on the same line (`if x: pass`).
    fn parse_block(&mut self) -> Result<Vec<Box<Stmt>>, ParseError> {
        self.expect(&TokenType::Colon, "':'")?;

        if !self.check(&TokenType::Newline) {
            let stmt = self.parse_simple_statement()?;
            return Ok(vec![Box::new(stmt)]);
        }
        self.advance();

        self.expect(&TokenType::Indent, "indented block")?;

        let mut body = Vec::new();
        loop {
            match self.current_type() {
                None | Some(TokenType::EOF) | Some(TokenType::Dedent) => break,
                Some(TokenType::Newline) => {
                    self.advance();
                    continue;
                }
                _ => body.push(Box::new(self.parse_statement()?)),
            }
        }
        self.expect(&TokenType::Dedent, "dedent to close block")?;

        if body.is_empty() {
            let (line, column) = self.position();
            return Err(ParseError::invalid_syntax("empty block", line, column));
        }
        Ok(body)
    }

    fn parse_simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let (line, column) = self.position();

        let stmt = match self.current_type() {
            Some(TokenType::Return) => {
                self.advance();
                let value = if self.check(&TokenType::Newline) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Stmt::Return {
                    value,
                    line,
                    column,
                }
            }
            Some(TokenType::Pass) => {
                self.advance();
                Stmt::Pass { line, column }
            }
            Some(TokenType::Break) => {
                self.advance();
                Stmt::Break { line, column }
            }
            Some(TokenType::Continue) => {
                self.advance();
                Stmt::Continue { line, column }
            }
            Some(TokenType::Global) => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let (name, _, _) = self.expect_identifier("name after 'global'")?;
                    names.push(name);
                    if !self.match_token(&TokenType::Comma) {
                        break;
                    }
                }
                Stmt::Global {
                    names,
                    line,
                    column,
                }
            }
            _ => {
                let expr = self.parse_expression()?;
                if self.check(&TokenType::Assign) {
                    self.advance();
                    self.validate_target(&expr)?;
                    let value = self.parse_expression()?;
                    Stmt::Assign {
                        target: expr,
                        value,
                        line,
                        column,
                    }
                } else if let Some(op) = self.augmented_op() {
                    self.advance();
                    self.validate_target(&expr)?;
                    let value = self.parse_expression()?;
                    Stmt::AugAssign {
                        target: expr,
                        op,
                        value,
                        line,
                        column,
                    }
                } else {
                    Stmt::Expr {
                        value: expr,
                        line,
                        column,
                    }
                }
            }
        };

        self.expect(&TokenType::Newline, "newline after statement")?;
        Ok(stmt)
    }

    fn augmented_op(&self) -> Option<Operator> {
        match self.current_type() {
            Some(TokenType::PlusAssign) => Some(Operator::Add),
            Some(TokenType::MinusAssign) => Some(Operator::Sub),
            Some(TokenType::MulAssign) => Some(Operator::Mult),
            Some(TokenType::DivAssign) => Some(Operator::Div),
            Some(TokenType::FloorDivAssign) => Some(Operator::FloorDiv),
            Some(TokenType::ModAssign) => Some(Operator::Mod),
            _ => None,
        }
    }

    fn validate_target(&self, target: &Expr) -> Result<(), ParseError> {
        match target {
            Expr::Name { .. } | Expr::Subscript { .. } => Ok(()),
            other => Err(ParseError::invalid_syntax(
                "invalid assignment target",
                other.line(),
                0,
            )),
        }
    }

    // ---- expressions ----------------------------------------------------

    fn parse_expression(&mut self) -> Result<Box<Expr>, ParseError> {
        let expr = self.parse_or_test()?;

        // conditional expression: `a if test else b`
        if self.check(&TokenType::If) {
            let (line, column) = (expr.line(), 0);
            self.advance();
            let test = self.parse_or_test()?;
            self.expect(&TokenType::Else, "'else' in conditional expression")?;
            let orelse = self.parse_expression()?;
            return Ok(Box::new(Expr::IfExp {
                test,
                body: expr,
                orelse,
                line,
                column,
            }));
        }

        Ok(expr)
    }

    fn parse_or_test(&mut self) -> Result<Box<Expr>, ParseError> {
        let first = self.parse_and_test()?;
        if !self.check(&TokenType::Or) {
            return Ok(first);
        }

        let (line, column) = (first.line(), 0);
        let mut values = vec![first];
        while self.match_token(&TokenType::Or) {
            values.push(self.parse_and_test()?);
        }
        Ok(Box::new(Expr::BoolOp {
            op: BoolOperator::Or,
            values,
            line,
            column,
        }))
    }

    fn parse_and_test(&mut self) -> Result<Box<Expr>, ParseError> {
        let first = self.parse_not_test()?;
        if !self.check(&TokenType::And) {
            return Ok(first);
        }

        let (line, column) = (first.line(), 0);
        let mut values = vec![first];
        while self.match_token(&TokenType::And) {
            values.push(self.parse_not_test()?);
        }
        Ok(Box::new(Expr::BoolOp {
            op: BoolOperator::And,
            values,
            line,
            column,
        }))
    }

    fn parse_not_test(&mut self) -> Result<Box<Expr>, ParseError> {
        if self.check(&TokenType::Not) {
            let (line, column) = self.position();
            self.advance();
            let operand = self.parse_not_test()?;
            return Ok(Box::new(Expr::UnaryOp {
                op: UnaryOperator::Not,
                operand,
                line,
                column,
            }));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Box<Expr>, ParseError> {
        let left = self.parse_arith()?;

        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.current_type() {
                Some(TokenType::Equal) => CmpOperator::Eq,
                Some(TokenType::NotEqual) => CmpOperator::NotEq,
                Some(TokenType::LessThan) => CmpOperator::Lt,
                Some(TokenType::LessEqual) => CmpOperator::LtE,
                Some(TokenType::GreaterThan) => CmpOperator::Gt,
                Some(TokenType::GreaterEqual) => CmpOperator::GtE,
                Some(TokenType::In) => CmpOperator::In,
                Some(TokenType::Not) => {
                    if matches!(self.peek_next_type(), Some(TokenType::In)) {
                        self.advance();
                        CmpOperator::NotIn
                    } else {
                        break;
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_arith()?);
        }

        if ops.is_empty() {
            return Ok(left);
        }
        let (line, column) = (left.line(), 0);
        Ok(Box::new(Expr::Compare {
            left,
            ops,
            comparators,
            line,
            column,
        }))
    }

    fn parse_arith(&mut self) -> Result<Box<Expr>, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current_type() {
                Some(TokenType::Plus) => Operator::Add,
                Some(TokenType::Minus) => Operator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            let (line, column) = (left.line(), 0);
            left = Box::new(Expr::BinOp {
                left,
                op,
                right,
                line,
                column,
            });
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Box<Expr>, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.current_type() {
                Some(TokenType::Multiply) => Operator::Mult,
                Some(TokenType::Divide) => Operator::Div,
                Some(TokenType::FloorDivide) => Operator::FloorDiv,
                Some(TokenType::Modulo) => Operator::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            let (line, column) = (left.line(), 0);
            left = Box::new(Expr::BinOp {
                left,
                op,
                right,
                line,
                column,
            });
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Box<Expr>, ParseError> {
        let op = match self.current_type() {
            Some(TokenType::Plus) => Some(UnaryOperator::UAdd),
            Some(TokenType::Minus) => Some(UnaryOperator::USub),
            _ => None,
        };
        if let Some(op) = op {
            let (line, column) = self.position();
            self.advance();
            let operand = self.parse_factor()?;
            return Ok(Box::new(Expr::UnaryOp {
                op,
                operand,
                line,
                column,
            }));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Box<Expr>, ParseError> {
        let base = self.parse_postfix()?;
        if self.match_token(&TokenType::Power) {
            // right-associative, and the exponent may carry a unary sign
            let exponent = self.parse_factor()?;
            let (line, column) = (base.line(), 0);
            return Ok(Box::new(Expr::BinOp {
                left: base,
                op: Operator::Pow,
                right: exponent,
                line,
                column,
            }));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Box<Expr>, ParseError> {
        let mut expr = self.parse_atom()?;

        loop {
            match self.current_type() {
                Some(TokenType::LeftParen) => {
                    let (line, column) = self.position();
                    self.advance();
                    let (args, keywords) = self.parse_call_args()?;
                    expr = Box::new(Expr::Call {
                        func: expr,
                        args,
                        keywords,
                        line,
                        column,
                    });
                }
                Some(TokenType::LeftBracket) => {
                    let (line, column) = self.position();
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenType::RightBracket, "']' after subscript")?;
                    expr = Box::new(Expr::Subscript {
                        value: expr,
                        index,
                        line,
                        column,
                    });
                }
                Some(TokenType::Dot) => {
                    let (line, column) = self.position();
                    self.advance();
                    let (attr, _, _) = self.expect_identifier("attribute name after '.'")?;
                    expr = Box::new(Expr::Attribute {
                        value: expr,
                        attr,
                        line,
                        column,
                    });
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    #[allow(clippy::type_complexity)]
    fn parse_call_args(
        &mut self,
    ) -> Result<(Vec<Box<Expr>>, Vec<(String, Box<Expr>)>), ParseError> {
        let mut args = Vec::new();
        let mut keywords: Vec<(String, Box<Expr>)> = Vec::new();

        while !self.check(&TokenType::RightParen) {
            let is_keyword = matches!(
                self.current_type(),
                Some(TokenType::Identifier(_))
            ) && matches!(self.peek_next_type(), Some(TokenType::Assign));

            if is_keyword {
                let (name, _, _) = self.expect_identifier("keyword argument name")?;
                self.advance(); // '='
                let value = self.parse_expression()?;
                keywords.push((name, value));
            } else {
                if !keywords.is_empty() {
                    let (line, column) = self.position();
                    return Err(ParseError::invalid_syntax(
                        "positional argument follows keyword argument",
                        line,
                        column,
                    ));
                }
                args.push(self.parse_expression()?);
            }

            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        self.expect(&TokenType::RightParen, "')' after arguments")?;

        Ok((args, keywords))
    }

    fn parse_atom(&mut self) -> Result<Box<Expr>, ParseError> {
        let (line, column) = self.position();

        let token_type = match self.current_type() {
            Some(tt) => tt.clone(),
            None => return Err(self.unexpected("expression")),
        };

        let expr = match token_type {
            TokenType::IntLiteral(value) => {
                self.advance();
                Expr::Num {
                    value: Number::Integer(value),
                    line,
                    column,
                }
            }
            TokenType::FloatLiteral(value) => {
                self.advance();
                Expr::Num {
                    value: Number::Float(value),
                    line,
                    column,
                }
            }
            TokenType::StringLiteral(value) => {
                self.advance();
                Expr::Str {
                    value,
                    line,
                    column,
                }
            }
            TokenType::True => {
                self.advance();
                Expr::NameConstant {
                    value: NameConstant::True,
                    line,
                    column,
                }
            }
            TokenType::False => {
                self.advance();
                Expr::NameConstant {
                    value: NameConstant::False,
                    line,
                    column,
                }
            }
            TokenType::None => {
                self.advance();
                Expr::NameConstant {
                    value: NameConstant::None,
                    line,
                    column,
                }
            }
            TokenType::Identifier(id) => {
                self.advance();
                Expr::Name { id, line, column }
            }
            TokenType::LeftParen => {
                self.advance();
                return self.parse_paren(line, column);
            }
            TokenType::LeftBracket => {
                self.advance();
                let elts = self.parse_element_list(&TokenType::RightBracket)?;
                self.expect(&TokenType::RightBracket, "']' to close list")?;
                Expr::List { elts, line, column }
            }
            TokenType::LeftBrace => {
                self.advance();
                let mut keys = Vec::new();
                let mut values = Vec::new();
                while !self.check(&TokenType::RightBrace) {
                    keys.push(self.parse_expression()?);
                    self.expect(&TokenType::Colon, "':' in dict entry")?;
                    values.push(self.parse_expression()?);
                    if !self.match_token(&TokenType::Comma) {
                        break;
                    }
                }
                self.expect(&TokenType::RightBrace, "'}' to close dict")?;
                Expr::Dict {
                    keys,
                    values,
                    line,
                    column,
                }
            }
            _ => return Err(self.unexpected("expression")),
        };

        Ok(Box::new(expr))
    }

    /// Parses the remainder of a parenthesised expression: the empty tuple,
    /// a grouped expression, or a tuple display.
    fn parse_paren(&mut self, line: usize, column: usize) -> Result<Box<Expr>, ParseError> {
        if self.match_token(&TokenType::RightParen) {
            return Ok(Box::new(Expr::Tuple {
                elts: Vec::new(),
                line,
                column,
            }));
        }

        let first = self.parse_expression()?;

        if self.match_token(&TokenType::Comma) {
            let mut elts = vec![first];
            elts.extend(self.parse_element_list(&TokenType::RightParen)?);
            self.expect(&TokenType::RightParen, "')' to close tuple")?;
            return Ok(Box::new(Expr::Tuple { elts, line, column }));
        }

        self.expect(&TokenType::RightParen, "')' to close expression")?;
        Ok(first)
    }

    fn parse_element_list(&mut self, closing: &TokenType) -> Result<Vec<Box<Expr>>, ParseError> {
        let mut elts = Vec::new();
        while !self.check(closing) {
            elts.push(self.parse_expression()?);
            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        Ok(elts)
    }
}
