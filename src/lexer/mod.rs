pub mod error;
pub mod token;

pub use error::LexerError;
pub use token::{Token, TokenType};

/// Indentation-aware tokenizer for the surface language.
///
/// Logical lines are delimited by `Newline` tokens; block structure is
/// expressed with `Indent`/`Dedent` pairs driven by an indent stack.
/// Newlines and indentation are suppressed while inside brackets.
pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    indent_stack: Vec<usize>,
    at_line_start: bool,
    paren_level: usize,
    bracket_level: usize,
    brace_level: usize,
    errors: Vec<LexerError>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            chars: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            at_line_start: true,
            paren_level: 0,
            bracket_level: 0,
            brace_level: 0,
            errors: Vec::new(),
        }
    }

    pub fn get_errors(&self) -> &[LexerError] {
        &self.errors
    }

    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            if self.at_line_start && self.nesting_level() == 0 {
                if self.handle_indentation(&mut tokens) {
                    continue;
                }
            }

            self.skip_spaces();

            if self.is_at_end() {
                break;
            }

            let c = self.peek_char();

            if c == '#' {
                self.consume_while(|c| c != '\n' && c != '\r');
                continue;
            }

            if c == '\n' || c == '\r' {
                self.consume_newline();
                if self.nesting_level() == 0 {
                    tokens.push(Token::new(
                        TokenType::Newline,
                        self.line - 1,
                        1,
                        "\n".to_string(),
                    ));
                    self.at_line_start = true;
                }
                continue;
            }

            tokens.push(self.next_token());
        }

        // Close the final logical line even when the input has no trailing
        // newline, then unwind the indent stack.
        if let Some(last) = tokens.last() {
            if !matches!(last.token_type, TokenType::Newline) {
                tokens.push(Token::new(
                    TokenType::Newline,
                    self.line,
                    self.column,
                    "\n".to_string(),
                ));
            }
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            tokens.push(Token::new(
                TokenType::Dedent,
                self.line,
                self.column,
                "".to_string(),
            ));
        }
        tokens.push(Token::new(
            TokenType::EOF,
            self.line,
            self.column,
            "".to_string(),
        ));

        tokens
    }

    /// Measures the indentation of the line about to start and emits the
    /// matching `Indent`/`Dedent` tokens. Returns true when the line turned
    /// out to be blank or comment-only and was consumed whole.
    fn handle_indentation(&mut self, tokens: &mut Vec<Token>) -> bool {
        let mut width = 0;
        while !self.is_at_end() {
            match self.peek_char() {
                ' ' => {
                    self.consume_char();
                    width += 1;
                }
                '\t' => {
                    self.push_error(
                        "tab character in indentation",
                        Some("indent with spaces only"),
                    );
                    self.consume_char();
                    width += 1;
                }
                _ => break,
            }
        }

        if self.is_at_end() {
            return false;
        }

        let c = self.peek_char();
        if c == '#' {
            self.consume_while(|c| c != '\n' && c != '\r');
            if !self.is_at_end() {
                self.consume_newline();
            }
            return true;
        }
        if c == '\n' || c == '\r' {
            self.consume_newline();
            return true;
        }

        self.at_line_start = false;

        let current = *self.indent_stack.last().unwrap_or(&0);
        if width > current {
            self.indent_stack.push(width);
            tokens.push(Token::new(
                TokenType::Indent,
                self.line,
                1,
                " ".repeat(width),
            ));
        } else if width < current {
            while self.indent_stack.len() > 1 && *self.indent_stack.last().unwrap() > width {
                self.indent_stack.pop();
                tokens.push(Token::new(
                    TokenType::Dedent,
                    self.line,
                    1,
                    "".to_string(),
                ));
            }
            if *self.indent_stack.last().unwrap() != width {
                self.push_error("unindent does not match any outer indentation level", None);
            }
        }

        false
    }

    fn next_token(&mut self) -> Token {
        let line = self.line;
        let column = self.column;
        let start = self.position;
        let c = self.peek_char();

        if c.is_alphabetic() || c == '_' {
            return self.lex_identifier(line, column);
        }
        if c.is_ascii_digit() {
            return self.lex_number(line, column);
        }
        if c == '"' || c == '\'' {
            return self.lex_string(line, column);
        }

        self.consume_char();
        let token_type = match c {
            '+' => self.with_assign(TokenType::Plus, TokenType::PlusAssign),
            '-' => self.with_assign(TokenType::Minus, TokenType::MinusAssign),
            '*' => {
                if self.match_char('*') {
                    TokenType::Power
                } else {
                    self.with_assign(TokenType::Multiply, TokenType::MulAssign)
                }
            }
            '/' => {
                if self.match_char('/') {
                    self.with_assign(TokenType::FloorDivide, TokenType::FloorDivAssign)
                } else {
                    self.with_assign(TokenType::Divide, TokenType::DivAssign)
                }
            }
            '%' => self.with_assign(TokenType::Modulo, TokenType::ModAssign),
            '=' => self.with_assign(TokenType::Assign, TokenType::Equal),
            '!' => {
                if self.match_char('=') {
                    TokenType::NotEqual
                } else {
                    self.push_error("unexpected character '!'", Some("did you mean '!='?"));
                    TokenType::Invalid("unexpected character '!'".to_string())
                }
            }
            '<' => self.with_assign(TokenType::LessThan, TokenType::LessEqual),
            '>' => self.with_assign(TokenType::GreaterThan, TokenType::GreaterEqual),
            '(' => {
                self.paren_level += 1;
                TokenType::LeftParen
            }
            ')' => {
                self.paren_level = self.paren_level.saturating_sub(1);
                TokenType::RightParen
            }
            '[' => {
                self.bracket_level += 1;
                TokenType::LeftBracket
            }
            ']' => {
                self.bracket_level = self.bracket_level.saturating_sub(1);
                TokenType::RightBracket
            }
            '{' => {
                self.brace_level += 1;
                TokenType::LeftBrace
            }
            '}' => {
                self.brace_level = self.brace_level.saturating_sub(1);
                TokenType::RightBrace
            }
            ',' => TokenType::Comma,
            '.' => TokenType::Dot,
            ':' => TokenType::Colon,
            '@' => TokenType::At,
            _ => {
                let message = format!("unexpected character '{}'", c);
                self.push_error(&message, None);
                TokenType::Invalid(message)
            }
        };

        let lexeme: String = self.chars[start..self.position].iter().collect();
        Token::new(token_type, line, column, lexeme)
    }

    fn with_assign(&mut self, plain: TokenType, with_eq: TokenType) -> TokenType {
        if self.match_char('=') {
            with_eq
        } else {
            plain
        }
    }

    fn lex_identifier(&mut self, line: usize, column: usize) -> Token {
        let start = self.position;
        self.consume_while(|c| c.is_alphanumeric() || c == '_');
        let text: String = self.chars[start..self.position].iter().collect();

        let token_type = match text.as_str() {
            "def" => TokenType::Def,
            "return" => TokenType::Return,
            "if" => TokenType::If,
            "elif" => TokenType::Elif,
            "else" => TokenType::Else,
            "while" => TokenType::While,
            "for" => TokenType::For,
            "in" => TokenType::In,
            "break" => TokenType::Break,
            "continue" => TokenType::Continue,
            "pass" => TokenType::Pass,
            "global" => TokenType::Global,
            "True" => TokenType::True,
            "False" => TokenType::False,
            "None" => TokenType::None,
            "and" => TokenType::And,
            "or" => TokenType::Or,
            "not" => TokenType::Not,
            _ => TokenType::Identifier(text.clone()),
        };

        Token::new(token_type, line, column, text)
    }

    fn lex_number(&mut self, line: usize, column: usize) -> Token {
        let start = self.position;
        self.consume_while(|c| c.is_ascii_digit() || c == '_');

        let mut is_float = false;
        if !self.is_at_end() && self.peek_char() == '.' && self.peek_char_n(1).is_ascii_digit() {
            is_float = true;
            self.consume_char();
            self.consume_while(|c| c.is_ascii_digit() || c == '_');
        }

        let text: String = self.chars[start..self.position].iter().collect();
        let digits: String = text.chars().filter(|c| *c != '_').collect();

        let token_type = if is_float {
            match digits.parse::<f64>() {
                Ok(value) => TokenType::FloatLiteral(value),
                Err(_) => {
                    let message = format!("invalid float literal '{}'", text);
                    self.push_error(&message, None);
                    TokenType::Invalid(message)
                }
            }
        } else {
            match digits.parse::<i64>() {
                Ok(value) => TokenType::IntLiteral(value),
                Err(_) => {
                    let message = format!("integer literal '{}' does not fit in 64 bits", text);
                    self.push_error(&message, None);
                    TokenType::Invalid(message)
                }
            }
        };

        Token::new(token_type, line, column, text)
    }

    fn lex_string(&mut self, line: usize, column: usize) -> Token {
        let quote = self.peek_char();
        self.consume_char();
        let mut value = String::new();
        let mut lexeme = String::new();
        lexeme.push(quote);

        while !self.is_at_end() {
            let c = self.peek_char();
            if c == '\n' || c == '\r' {
                break;
            }
            self.consume_char();
            lexeme.push(c);
            if c == quote {
                return Token::new(TokenType::StringLiteral(value), line, column, lexeme);
            }
            if c == '\\' {
                if self.is_at_end() {
                    break;
                }
                let escaped = self.peek_char();
                self.consume_char();
                lexeme.push(escaped);
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\\' => value.push('\\'),
                    '\'' => value.push('\''),
                    '"' => value.push('"'),
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
            } else {
                value.push(c);
            }
        }

        self.push_error("unterminated string literal", None);
        Token::error("unterminated string literal", line, column, &lexeme)
    }

    fn nesting_level(&self) -> usize {
        self.paren_level + self.bracket_level + self.brace_level
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.chars.len()
    }

    fn peek_char(&self) -> char {
        self.chars[self.position]
    }

    fn peek_char_n(&self, n: usize) -> char {
        *self.chars.get(self.position + n).unwrap_or(&'\0')
    }

    fn consume_char(&mut self) {
        if let Some(c) = self.chars.get(self.position) {
            if *c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.position += 1;
        }
    }

    fn consume_newline(&mut self) {
        if !self.is_at_end() && self.peek_char() == '\r' {
            self.consume_char();
        }
        if !self.is_at_end() && self.peek_char() == '\n' {
            self.consume_char();
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if !self.is_at_end() && self.peek_char() == expected {
            self.consume_char();
            true
        } else {
            false
        }
    }

    fn consume_while<F>(&mut self, predicate: F)
    where
        F: Fn(char) -> bool,
    {
        while !self.is_at_end() && predicate(self.peek_char()) {
            self.consume_char();
        }
    }

    fn skip_spaces(&mut self) {
        self.consume_while(|c| c == ' ' || c == '\t');
    }

    fn current_line_snippet(&self) -> String {
        self.input
            .lines()
            .nth(self.line.saturating_sub(1))
            .unwrap_or("")
            .to_string()
    }

    fn push_error(&mut self, message: &str, suggestion: Option<&str>) {
        self.errors.push(LexerError {
            message: message.to_string(),
            line: self.line,
            column: self.column,
            snippet: self.current_line_snippet(),
            suggestion: suggestion.map(|s| s.to_string()),
        });
    }
}
