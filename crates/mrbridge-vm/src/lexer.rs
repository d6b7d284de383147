//! Lexer for the script subset, built on logos.

use crate::ParseError;
use logos::Logos;

/// Script token
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\n")]
pub enum Token {
    // Keywords (must come before identifiers)
    #[token("def")]
    Def,
    #[token("class")]
    Class,
    #[token("module")]
    Module,
    #[token("end")]
    End,
    #[token("if")]
    If,
    #[token("elsif")]
    Elsif,
    #[token("else")]
    Else,
    #[token("then")]
    Then,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("begin")]
    Begin,
    #[token("rescue")]
    Rescue,
    #[token("return")]
    Return,
    #[token("nil")]
    Nil,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("self")]
    SelfKw,

    // Names and literals
    #[regex(r"[a-z_][A-Za-z0-9_]*[?!]?", |lex| lex.slice().to_string())]
    Ident(String),
    #[regex(r"[A-Z][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Const(String),
    #[regex(r"[0-9]+(_[0-9]+)*", parse_int)]
    Int(i64),
    #[regex(r"[0-9]+(_[0-9]+)*\.[0-9]+([eE][+-]?[0-9]+)?", parse_float)]
    Float(f64),
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    #[regex(r"'([^'\\]|\\.)*'", parse_raw_string)]
    Str(String),
    #[regex(r":[A-Za-z_][A-Za-z0-9_]*[?!=]?", |lex| lex.slice()[1..].to_string())]
    Symbol(String),

    // Operators
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("=")]
    Assign,
    #[token("=>")]
    FatArrow,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // Separators
    #[token("\n")]
    Newline,
    #[token(";")]
    Semicolon,
}

impl Token {
    /// Human-readable form for error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) | Token::Const(s) => format!("'{}'", s),
            Token::Int(i) => format!("integer {}", i),
            Token::Float(f) => format!("float {}", f),
            Token::Str(_) => "string literal".to_string(),
            Token::Symbol(s) => format!("symbol :{}", s),
            Token::Newline => "newline".to_string(),
            other => format!("{:?}", other).to_lowercase(),
        }
    }
}

fn parse_int(lex: &mut logos::Lexer<Token>) -> Option<i64> {
    lex.slice().replace('_', "").parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.slice().replace('_', "").parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'e' => out.push('\x1b'),
            's' => out.push(' '),
            other => out.push(other),
        }
    }
    Some(out)
}

fn parse_raw_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len() - 1];
    Some(inner.replace("\\'", "'").replace("\\\\", "\\"))
}

/// Token with its 1-based source line
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// Token
    pub token: Token,
    /// Line the token starts on
    pub line: u32,
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut line = 1u32;
    let mut last_end = 0;

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        line += source[last_end..range.start].matches('\n').count() as u32;
        match result {
            Ok(token) => tokens.push(Spanned { token, line }),
            Err(()) => {
                return Err(ParseError::new(
                    line,
                    format!("unexpected '{}'", lexer.slice()),
                ))
            }
        }
        line += lexer.slice().matches('\n').count() as u32;
        last_end = range.end;
    }
    Ok(tokens)
}
