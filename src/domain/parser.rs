//! Parsers for template strings and the restricted expression language.
//!
//! Two stages live here. The template parser splits a bound string into
//! literal runs and `{{ ... }}` expression markers, mirroring the input brace
//! nesting exactly; it is pure, always terminates, and never fails (malformed
//! nesting degrades to best-effort structure). The expression language is a
//! closed JS-expression subset executed by a hand-written lexer, a recursive
//! descent parser, and a tree-walking interpreter over a scope map, so bound
//! expressions can never reach ambient process state, the filesystem, or the
//! network.
//!
//! # BNF Grammar
//!
//! The expression parser implements the following grammar:
//!
//! ```bnf
//! Expression     ::= Conditional
//! Conditional    ::= LogicalOr ( "?" Expression ":" Expression )?
//! LogicalOr      ::= LogicalAnd ( "||" LogicalAnd )*
//! LogicalAnd     ::= Equality ( "&&" Equality )*
//! Equality       ::= Comparison ( ( "==" | "!=" | "===" | "!==" ) Comparison )*
//! Comparison     ::= Addition ( ( "<" | "<=" | ">" | ">=" ) Addition )*
//! Addition       ::= Multiplication ( ( "+" | "-" ) Multiplication )*
//! Multiplication ::= Unary ( ( "*" | "/" | "%" ) Unary )*
//! Unary          ::= ( "+" | "-" | "!" ) Unary | Postfix
//! Postfix        ::= Primary ( "." Identifier | "[" Expression "]" )*
//! Primary        ::= Number | String | "true" | "false" | "null" | "undefined"
//!                  | Identifier | Array | Object | "(" Expression ")"
//! Array          ::= "[" ( Expression ( "," Expression )* )? "]"
//! Object         ::= "{" ( Entry ( "," Entry )* )? "}"
//! Entry          ::= ( Identifier | String ) ":" Expression
//! Identifier     ::= [A-Za-z_$] [A-Za-z0-9_$]*
//! Number         ::= [0-9]+ ( "." [0-9]+ )?
//! ```
//!
//! `&&` and `||` short-circuit and return operand values, and `+` concatenates
//! when either side is a string, matching the semantics bound expressions were
//! written against.

use super::models::{Scope, Value};

/// Reserved prefix for list-iteration bindings. Markers starting with it are
/// left unparsed by default so list templates can defer evaluation until the
/// per-element scope exists.
pub const LIST_ITEM_PREFIX: &str = "$listItem";

/// One segment of a parsed template: a literal run or a `{{ ... }}` marker
/// whose body is itself a sequence of segments (markers nest).
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    Literal(String),
    Expression(Vec<TemplateNode>),
}

/// Splits a template string into literal and expression segments.
///
/// The output nesting mirrors the input brace nesting: `{{}}` parses to an
/// empty expression node, `{{{{}}}}` to an empty node inside another. A
/// string with no markers parses to a single literal node. Unbalanced
/// markers are resolved best-effort, never reported as an error.
///
/// When `treat_list_item_as_expression` is false, a marker whose body starts
/// with `$listItem` is kept as an opaque literal, braces included.
pub fn parse_template(input: &str, treat_list_item_as_expression: bool) -> Vec<TemplateNode> {
    let chars: Vec<char> = input.chars().collect();
    let mut stack: Vec<Frame> = vec![Frame::default()];
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' && chars.get(i + 1) == Some(&'{') {
            if !treat_list_item_as_expression && has_list_item_prefix(&chars, i + 2) {
                let end = find_marker_end(&chars, i + 2);
                flush_literal(&mut literal, &mut stack);
                let raw: String = chars[i..end].iter().collect();
                stack.last_mut().unwrap().nodes.push(TemplateNode::Literal(raw));
                i = end;
            } else {
                flush_literal(&mut literal, &mut stack);
                stack.push(Frame::default());
                i += 2;
            }
        } else if chars[i] == '}'
            && chars.get(i + 1) == Some(&'}')
            && stack.len() > 1
            // `}}` only closes the marker once single braces inside the
            // expression body are balanced, so `{{{id: 123}}}` keeps its
            // object literal intact.
            && stack.last().unwrap().brace_depth == 0
        {
            flush_literal(&mut literal, &mut stack);
            let frame = stack.pop().unwrap();
            stack
                .last_mut()
                .unwrap()
                .nodes
                .push(TemplateNode::Expression(frame.nodes));
            i += 2;
        } else {
            let frame = stack.last_mut().unwrap();
            match chars[i] {
                '{' => frame.brace_depth += 1,
                '}' if frame.brace_depth > 0 => frame.brace_depth -= 1,
                _ => {}
            }
            literal.push(chars[i]);
            i += 1;
        }
    }

    flush_literal(&mut literal, &mut stack);

    // Unclosed markers degrade to expression nodes instead of failing.
    while stack.len() > 1 {
        let frame = stack.pop().unwrap();
        stack
            .last_mut()
            .unwrap()
            .nodes
            .push(TemplateNode::Expression(frame.nodes));
    }

    stack.pop().unwrap().nodes
}

#[derive(Default)]
struct Frame {
    nodes: Vec<TemplateNode>,
    /// Unbalanced single `{` count inside the current expression body.
    brace_depth: usize,
}

fn flush_literal(literal: &mut String, stack: &mut [Frame]) {
    if !literal.is_empty() {
        stack
            .last_mut()
            .unwrap()
            .nodes
            .push(TemplateNode::Literal(std::mem::take(literal)));
    }
}

fn has_list_item_prefix(chars: &[char], mut pos: usize) -> bool {
    while pos < chars.len() && chars[pos].is_whitespace() {
        pos += 1;
    }
    LIST_ITEM_PREFIX
        .chars()
        .enumerate()
        .all(|(offset, expected)| chars.get(pos + offset) == Some(&expected))
}

/// Finds the end (exclusive) of the marker whose body starts at `pos`,
/// accounting for nested marker pairs and unbalanced single braces. Returns
/// the input length when the marker never closes.
fn find_marker_end(chars: &[char], mut pos: usize) -> usize {
    let mut marker_depth = 1;
    let mut brace_depth = 0usize;
    while pos < chars.len() {
        if chars[pos] == '{' && chars.get(pos + 1) == Some(&'{') {
            marker_depth += 1;
            pos += 2;
        } else if chars[pos] == '}' && chars.get(pos + 1) == Some(&'}') && brace_depth == 0 {
            marker_depth -= 1;
            pos += 2;
            if marker_depth == 0 {
                return pos;
            }
        } else {
            match chars[pos] {
                '{' => brace_depth += 1,
                '}' if brace_depth > 0 => brace_depth -= 1,
                _ => {}
            }
            pos += 1;
        }
    }
    chars.len()
}

/// Represents a token in an expression body.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Undefined,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,

    // Comparison operators
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,

    // Logical operators
    AndAnd,
    OrOr,

    // Delimiters
    Question,
    Colon,
    Dot,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,

    // End of input
    Eof,
}

/// Represents an Abstract Syntax Tree node for expression bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),

    // Property access: `a.b` and `a[expr]`
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },

    // Container literals
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),

    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

/// Binary operators of the expression language.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,

    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    And,
    Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

/// Lexical analyzer for expression bodies.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl Lexer {
    /// Creates a new lexer for the given input string.
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
        }
    }

    /// Advances to the next character in the input.
    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    /// Skips whitespace characters.
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Reads a number token (integer or decimal).
    fn read_number(&mut self) -> Result<f64, String> {
        let mut number_str = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                number_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if self.current_char == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            number_str.push('.');
            self.advance();

            while let Some(ch) = self.current_char {
                if ch.is_ascii_digit() {
                    number_str.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        number_str
            .parse::<f64>()
            .map_err(|_| format!("Invalid number: {}", number_str))
    }

    /// Reads an identifier or keyword. `$` and `_` are identifier characters
    /// so scope bindings like `$listItem` and `$moduleId` lex as plain names.
    fn read_identifier(&mut self) -> String {
        let mut identifier = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                identifier.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        identifier
    }

    /// Reads a string literal delimited by `quote`, handling escapes.
    fn read_string(&mut self, quote: char) -> Result<String, String> {
        self.advance(); // opening quote
        let mut value = String::new();

        loop {
            match self.current_char {
                None => return Err("Unterminated string literal".to_string()),
                Some(ch) if ch == quote => {
                    self.advance();
                    return Ok(value);
                }
                Some('\\') => {
                    self.advance();
                    match self.current_char {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some(escaped) => value.push(escaped),
                        None => return Err("Unterminated string literal".to_string()),
                    }
                    self.advance();
                }
                Some(ch) => {
                    value.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Gets the next token from the input.
    pub fn next_token(&mut self) -> Result<Token, String> {
        self.skip_whitespace();

        match self.current_char {
            None => Ok(Token::Eof),

            Some(ch) => match ch {
                '0'..='9' => {
                    let number = self.read_number()?;
                    Ok(Token::Number(number))
                }

                '\'' | '"' => {
                    let value = self.read_string(ch)?;
                    Ok(Token::Str(value))
                }

                c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                    let identifier = self.read_identifier();
                    Ok(match identifier.as_str() {
                        "true" => Token::True,
                        "false" => Token::False,
                        "null" => Token::Null,
                        "undefined" => Token::Undefined,
                        _ => Token::Ident(identifier),
                    })
                }

                '+' => {
                    self.advance();
                    Ok(Token::Plus)
                }

                '-' => {
                    self.advance();
                    Ok(Token::Minus)
                }

                '*' => {
                    self.advance();
                    Ok(Token::Star)
                }

                '/' => {
                    self.advance();
                    Ok(Token::Slash)
                }

                '%' => {
                    self.advance();
                    Ok(Token::Percent)
                }

                '=' => {
                    self.advance();
                    if self.current_char == Some('=') {
                        self.advance();
                        // `===` is a synonym for `==`
                        if self.current_char == Some('=') {
                            self.advance();
                        }
                        Ok(Token::EqEq)
                    } else {
                        Err("Unexpected character: '=' (assignment is not supported)".to_string())
                    }
                }

                '!' => {
                    self.advance();
                    if self.current_char == Some('=') {
                        self.advance();
                        if self.current_char == Some('=') {
                            self.advance();
                        }
                        Ok(Token::NotEq)
                    } else {
                        Ok(Token::Bang)
                    }
                }

                '<' => {
                    self.advance();
                    if self.current_char == Some('=') {
                        self.advance();
                        Ok(Token::LessEq)
                    } else {
                        Ok(Token::Less)
                    }
                }

                '>' => {
                    self.advance();
                    if self.current_char == Some('=') {
                        self.advance();
                        Ok(Token::GreaterEq)
                    } else {
                        Ok(Token::Greater)
                    }
                }

                '&' => {
                    self.advance();
                    if self.current_char == Some('&') {
                        self.advance();
                        Ok(Token::AndAnd)
                    } else {
                        Err("Unexpected character: '&'".to_string())
                    }
                }

                '|' => {
                    self.advance();
                    if self.current_char == Some('|') {
                        self.advance();
                        Ok(Token::OrOr)
                    } else {
                        Err("Unexpected character: '|'".to_string())
                    }
                }

                '?' => {
                    self.advance();
                    Ok(Token::Question)
                }

                ':' => {
                    self.advance();
                    Ok(Token::Colon)
                }

                '.' => {
                    self.advance();
                    Ok(Token::Dot)
                }

                ',' => {
                    self.advance();
                    Ok(Token::Comma)
                }

                '(' => {
                    self.advance();
                    Ok(Token::LeftParen)
                }

                ')' => {
                    self.advance();
                    Ok(Token::RightParen)
                }

                '[' => {
                    self.advance();
                    Ok(Token::LeftBracket)
                }

                ']' => {
                    self.advance();
                    Ok(Token::RightBracket)
                }

                '{' => {
                    self.advance();
                    Ok(Token::LeftBrace)
                }

                '}' => {
                    self.advance();
                    Ok(Token::RightBrace)
                }

                _ => Err(format!("Unexpected character: '{}'", ch)),
            },
        }
    }
}

/// Recursive descent parser for expression bodies.
pub struct Parser {
    lexer: Lexer,
    current_token: Token,
}

impl Parser {
    /// Creates a new parser for the given expression body.
    pub fn new(input: &str) -> Result<Self, String> {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token()?;

        Ok(Self {
            lexer,
            current_token,
        })
    }

    /// Advances to the next token.
    fn advance(&mut self) -> Result<(), String> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    /// Checks that the current token matches the expected token and advances.
    fn expect(&mut self, expected: Token) -> Result<(), String> {
        if std::mem::discriminant(&self.current_token) == std::mem::discriminant(&expected) {
            self.advance()
        } else {
            Err(format!(
                "Expected {:?}, found {:?}",
                expected, self.current_token
            ))
        }
    }

    /// Parses the top-level expression.
    pub fn parse(&mut self) -> Result<Expr, String> {
        let expr = self.parse_conditional()?;

        if self.current_token != Token::Eof {
            return Err(format!(
                "Unexpected token at end: {:?}",
                self.current_token
            ));
        }

        Ok(expr)
    }

    /// Parses ternary conditional expressions (right-associative).
    fn parse_conditional(&mut self) -> Result<Expr, String> {
        let condition = self.parse_or()?;

        if self.current_token == Token::Question {
            self.advance()?;
            let consequent = self.parse_conditional()?;
            self.expect(Token::Colon)?;
            let alternate = self.parse_conditional()?;
            Ok(Expr::Conditional {
                condition: Box::new(condition),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            })
        } else {
            Ok(condition)
        }
    }

    /// Parses logical-or expressions.
    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;

        while self.current_token == Token::OrOr {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: BinaryOp::Or,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses logical-and expressions.
    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;

        while self.current_token == Token::AndAnd {
            self.advance()?;
            let right = self.parse_equality()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: BinaryOp::And,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses equality expressions.
    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_comparison()?;

        while matches!(self.current_token, Token::EqEq | Token::NotEq) {
            let op = match self.current_token {
                Token::EqEq => BinaryOp::Equal,
                Token::NotEq => BinaryOp::NotEqual,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses comparison expressions.
    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_addition()?;

        while matches!(
            self.current_token,
            Token::Less | Token::LessEq | Token::Greater | Token::GreaterEq
        ) {
            let op = match self.current_token {
                Token::Less => BinaryOp::Less,
                Token::LessEq => BinaryOp::LessEqual,
                Token::Greater => BinaryOp::Greater,
                Token::GreaterEq => BinaryOp::GreaterEqual,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_addition()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses addition and subtraction expressions.
    fn parse_addition(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplication()?;

        while matches!(self.current_token, Token::Plus | Token::Minus) {
            let op = match self.current_token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_multiplication()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses multiplication, division, and modulo expressions.
    fn parse_multiplication(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        while matches!(self.current_token, Token::Star | Token::Slash | Token::Percent) {
            let op = match self.current_token {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                Token::Percent => BinaryOp::Modulo,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses unary expressions.
    fn parse_unary(&mut self) -> Result<Expr, String> {
        let operator = match self.current_token {
            Token::Plus => UnaryOp::Plus,
            Token::Minus => UnaryOp::Minus,
            Token::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.advance()?;
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            operator,
            operand: Box::new(operand),
        })
    }

    /// Parses postfix property access: `a.b.c` and `a[expr]`.
    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.current_token {
                Token::Dot => {
                    self.advance()?;
                    if let Token::Ident(name) = &self.current_token {
                        let property = name.clone();
                        self.advance()?;
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property,
                        };
                    } else {
                        return Err(format!(
                            "Expected property name after '.', found {:?}",
                            self.current_token
                        ));
                    }
                }
                Token::LeftBracket => {
                    self.advance()?;
                    let index = self.parse_conditional()?;
                    self.expect(Token::RightBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// Parses primary expressions (highest precedence).
    fn parse_primary(&mut self) -> Result<Expr, String> {
        match &self.current_token {
            Token::Number(value) => {
                let value = *value;
                self.advance()?;
                Ok(Expr::Literal(Value::Number(value)))
            }

            Token::Str(value) => {
                let value = value.clone();
                self.advance()?;
                Ok(Expr::Literal(Value::String(value)))
            }

            Token::True => {
                self.advance()?;
                Ok(Expr::Literal(Value::Bool(true)))
            }

            Token::False => {
                self.advance()?;
                Ok(Expr::Literal(Value::Bool(false)))
            }

            Token::Null => {
                self.advance()?;
                Ok(Expr::Literal(Value::Null))
            }

            Token::Undefined => {
                self.advance()?;
                Ok(Expr::Literal(Value::Undefined))
            }

            Token::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(Expr::Ident(name))
            }

            Token::LeftParen => {
                self.advance()?;
                let expr = self.parse_conditional()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }

            Token::LeftBracket => self.parse_array_literal(),

            Token::LeftBrace => self.parse_object_literal(),

            _ => Err(format!("Unexpected token: {:?}", self.current_token)),
        }
    }

    /// Parses array literals.
    fn parse_array_literal(&mut self) -> Result<Expr, String> {
        self.advance()?; // '['
        let mut elements = Vec::new();

        if self.current_token != Token::RightBracket {
            elements.push(self.parse_conditional()?);
            while self.current_token == Token::Comma {
                self.advance()?;
                elements.push(self.parse_conditional()?);
            }
        }

        self.expect(Token::RightBracket)?;
        Ok(Expr::Array(elements))
    }

    /// Parses object literals with identifier or string keys.
    fn parse_object_literal(&mut self) -> Result<Expr, String> {
        self.advance()?; // '{'
        let mut entries = Vec::new();

        if self.current_token != Token::RightBrace {
            entries.push(self.parse_object_entry()?);
            while self.current_token == Token::Comma {
                self.advance()?;
                entries.push(self.parse_object_entry()?);
            }
        }

        self.expect(Token::RightBrace)?;
        Ok(Expr::Object(entries))
    }

    fn parse_object_entry(&mut self) -> Result<(String, Expr), String> {
        let key = match &self.current_token {
            Token::Ident(name) => name.clone(),
            Token::Str(value) => value.clone(),
            other => return Err(format!("Expected object key, found {:?}", other)),
        };
        self.advance()?;
        self.expect(Token::Colon)?;
        let value = self.parse_conditional()?;
        Ok((key, value))
    }
}

/// Tree-walking interpreter evaluating expression ASTs against a scope.
///
/// Only names present in the scope are resolvable; referencing anything else
/// is an error the caller converts to an `ExpressionError`. Property access
/// on a missing object field yields `Undefined`, but reading a property of
/// `undefined`/`null` is an error, matching how bound expressions behave at
/// the source level.
pub struct ExpressionInterpreter<'a> {
    scope: &'a Scope,
}

impl<'a> ExpressionInterpreter<'a> {
    /// Creates a new interpreter over the given scope.
    pub fn new(scope: &'a Scope) -> Self {
        Self { scope }
    }

    /// Evaluates an expression AST to a value.
    pub fn evaluate(&self, expr: &Expr) -> Result<Value, String> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),

            Expr::Ident(name) => self
                .scope
                .get(name)
                .cloned()
                .ok_or_else(|| format!("`{}` is not defined", name)),

            Expr::Member { object, property } => {
                let host = self.evaluate(object)?;
                self.read_property(&host, property)
            }

            Expr::Index { object, index } => {
                let host = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                self.read_index(&host, &index)
            }

            Expr::Array(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(element)?);
                }
                Ok(Value::Array(values))
            }

            Expr::Object(entries) => {
                let mut fields = std::collections::HashMap::with_capacity(entries.len());
                for (key, value_expr) in entries {
                    fields.insert(key.clone(), self.evaluate(value_expr)?);
                }
                Ok(Value::Object(fields))
            }

            Expr::Unary { operator, operand } => {
                let value = self.evaluate(operand)?;
                match operator {
                    UnaryOp::Plus => Ok(Value::Number(as_number(&value)?)),
                    UnaryOp::Minus => Ok(Value::Number(-as_number(&value)?)),
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, *operator, right),

            Expr::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(consequent)
                } else {
                    self.evaluate(alternate)
                }
            }
        }
    }

    fn evaluate_binary(&self, left: &Expr, operator: BinaryOp, right: &Expr) -> Result<Value, String> {
        // Logical operators short-circuit and return operand values.
        match operator {
            BinaryOp::And => {
                let left_val = self.evaluate(left)?;
                return if left_val.is_truthy() {
                    self.evaluate(right)
                } else {
                    Ok(left_val)
                };
            }
            BinaryOp::Or => {
                let left_val = self.evaluate(left)?;
                return if left_val.is_truthy() {
                    Ok(left_val)
                } else {
                    self.evaluate(right)
                };
            }
            _ => {}
        }

        let left_val = self.evaluate(left)?;
        let right_val = self.evaluate(right)?;

        match operator {
            BinaryOp::Add => match (&left_val, &right_val) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
                    "{}{}",
                    left_val.to_display_string(),
                    right_val.to_display_string()
                ))),
                _ => Err(format!(
                    "cannot add {} and {}",
                    left_val.type_name(),
                    right_val.type_name()
                )),
            },

            BinaryOp::Subtract => Ok(Value::Number(as_number(&left_val)? - as_number(&right_val)?)),
            BinaryOp::Multiply => Ok(Value::Number(as_number(&left_val)? * as_number(&right_val)?)),

            BinaryOp::Divide => {
                let divisor = as_number(&right_val)?;
                if divisor == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(Value::Number(as_number(&left_val)? / divisor))
                }
            }

            BinaryOp::Modulo => {
                let divisor = as_number(&right_val)?;
                if divisor == 0.0 {
                    Err("modulo by zero".to_string())
                } else {
                    Ok(Value::Number(as_number(&left_val)? % divisor))
                }
            }

            BinaryOp::Equal => Ok(Value::Bool(left_val == right_val)),
            BinaryOp::NotEqual => Ok(Value::Bool(left_val != right_val)),

            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let ordering = match (&left_val, &right_val) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => None,
                };
                let ordering = ordering.ok_or_else(|| {
                    format!(
                        "cannot compare {} and {}",
                        left_val.type_name(),
                        right_val.type_name()
                    )
                })?;
                let result = match operator {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::LessEqual => ordering.is_le(),
                    BinaryOp::Greater => ordering.is_gt(),
                    BinaryOp::GreaterEqual => ordering.is_ge(),
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }

            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }

    fn read_property(&self, host: &Value, property: &str) -> Result<Value, String> {
        match host {
            Value::Object(fields) => Ok(fields.get(property).cloned().unwrap_or(Value::Undefined)),
            Value::Array(items) => {
                if property == "length" {
                    Ok(Value::Number(items.len() as f64))
                } else {
                    Ok(Value::Undefined)
                }
            }
            Value::String(s) => {
                if property == "length" {
                    Ok(Value::Number(s.chars().count() as f64))
                } else {
                    Ok(Value::Undefined)
                }
            }
            Value::Undefined | Value::Null => Err(format!(
                "cannot read property `{}` of {}",
                property,
                host.type_name()
            )),
            _ => Ok(Value::Undefined),
        }
    }

    fn read_index(&self, host: &Value, index: &Value) -> Result<Value, String> {
        match (host, index) {
            (Value::Array(items), Value::Number(n)) => {
                if *n >= 0.0 && n.fract() == 0.0 {
                    Ok(items.get(*n as usize).cloned().unwrap_or(Value::Undefined))
                } else {
                    Ok(Value::Undefined)
                }
            }
            (Value::Object(fields), Value::String(key)) => {
                Ok(fields.get(key).cloned().unwrap_or(Value::Undefined))
            }
            (Value::String(s), Value::Number(n)) => {
                if *n >= 0.0 && n.fract() == 0.0 {
                    Ok(s.chars()
                        .nth(*n as usize)
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or(Value::Undefined))
                } else {
                    Ok(Value::Undefined)
                }
            }
            (Value::Undefined | Value::Null, _) => Err(format!(
                "cannot read index of {}",
                host.type_name()
            )),
            _ => Ok(Value::Undefined),
        }
    }
}

fn as_number(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("`{}` is not a number", s)),
        other => Err(format!("{} is not a number", other.type_name())),
    }
}
