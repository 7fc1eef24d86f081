//! Lexer for Lunet source.
//!
//! Implemented with the logos library; produces a token stream with byte
//! spans that the parser threads into syntax errors.

use logos::Logos;

/// Byte range of a token or syntax error in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span {
            start: r.start,
            end: r.end,
        }
    }
}

fn block_comment(lex: &mut logos::Lexer<Tok>) -> logos::Skip {
    let rest = lex.remainder();
    match rest.find("]]") {
        Some(pos) => lex.bump(pos + 2),
        None => lex.bump(rest.len()),
    }
    logos::Skip
}

fn string_literal(lex: &mut logos::Lexer<Tok>) -> Option<String> {
    let slice = lex.slice();
    let body = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\n' => out.push('\n'),
            _ => return None,
        }
    }
    Some(out)
}

fn hex_number(lex: &mut logos::Lexer<Tok>) -> Option<f64> {
    i64::from_str_radix(&lex.slice()[2..], 16)
        .ok()
        .map(|n| n as f64)
}

/// Token set for the Lunet grammar.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Tok {
    #[regex(r"--\[\[", block_comment)]
    BlockComment,

    // Line comments; the opening of a block comment is excluded so the
    // pattern above can win
    #[regex(r"--(\[?[^\[\n][^\n]*)?", logos::skip)]
    LineComment,

    // Keywords
    #[token("and")]
    And,
    #[token("break")]
    Break,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("elseif")]
    Elseif,
    #[token("end")]
    End,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("in")]
    In,
    #[token("local")]
    Local,
    #[token("nil")]
    Nil,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("repeat")]
    Repeat,
    #[token("return")]
    Return,
    #[token("then")]
    Then,
    #[token("true")]
    True,
    #[token("until")]
    Until,
    #[token("while")]
    While,

    // Symbols
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
    #[token("^")]
    Caret,
    #[token("#")]
    Hash,
    #[token("==")]
    EqEq,
    #[token("~=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Assign,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("..")]
    DotDot,
    #[token("...")]
    Ellipsis,

    // Literals
    #[regex(r"0[xX][0-9a-fA-F]+", hex_number)]
    #[regex(r"[0-9]+\.?[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, string_literal)]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, string_literal)]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Name(String),
}

/// Tokenize a source string.
///
/// On failure returns a message and the offending span.
pub fn lex(src: &str) -> Result<Vec<(Tok, Span)>, (String, Span)> {
    let mut tokens = Vec::new();
    let mut lexer = Tok::lexer(src);
    while let Some(item) = lexer.next() {
        let span: Span = lexer.span().into();
        match item {
            Ok(tok) => tokens.push((tok, span)),
            Err(()) => {
                let snippet = &src[span.start..span.end.min(src.len())];
                return Err((format!("unexpected symbol near '{snippet}'"), span));
            }
        }
    }
    Ok(tokens)
}
