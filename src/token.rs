use failure::{Error, Fail};
use lazy_static::lazy_static;
use std::collections::VecDeque;

#[derive(Fail, Debug)]
#[fail(display = "Tokenize Error: {}, pos: {}", _0, _1)]
pub struct TokenizeError(pub String, pub usize);

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Token {
    Num(i64),
    Op(OpType),
    SLSym(char), // single-letter symbol
    Ident(String),
    Return,
    If,
    Else,
    While,
    For,
    Eof,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum OpType {
    Eq,
    Ne,
    Le,
    Ge,
}

lazy_static! {
    static ref STR_TO_OP: Vec<(&'static str, OpType)> = {
        use OpType::*;
        vec![("==", Eq), ("!=", Ne), ("<=", Le), (">=", Ge)]
    };
    static ref RESERVED: Vec<(&'static str, Token)> = {
        use Token::*;
        vec![
            ("return", Return),
            ("if", If),
            ("else", Else),
            ("while", While),
            ("for", For),
        ]
    };
}

const SINGLE_SYMS: &str = "+-*/()<>;={},&";

/// Every token is paired with its byte offset into the source, for
/// error reporting. The sequence always ends with `Token::Eof`.
pub type Tokens = VecDeque<(Token, usize)>;

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn starts_with_at(chars: &[char], pos: usize, word: &str) -> bool {
    word.chars()
        .enumerate()
        .all(|(i, w)| chars.get(pos + i) == Some(&w))
}

pub fn tokenize(text: &str) -> Result<Tokens, Error> {
    let chars = text.chars().collect::<Vec<_>>();
    let mut pos = 0;
    let mut tokens = VecDeque::new();

    'outer: while pos < chars.len() {
        if chars[pos].is_whitespace() {
            pos += 1;
            continue;
        }

        // a keyword immediately followed by an identifier character is a
        // plain identifier, e.g. `returnValue`
        for (word, token) in RESERVED.iter() {
            if starts_with_at(&chars, pos, word) {
                match chars.get(pos + word.len()) {
                    Some(c) if is_ident_char(*c) => {}
                    _ => {
                        tokens.push_back((token.clone(), pos));
                        pos += word.len();
                        continue 'outer;
                    }
                }
            }
        }

        // two-letter operators before single-letter symbols, so that
        // `<=` never lexes as `<` `=`
        for (sym, op) in STR_TO_OP.iter() {
            if starts_with_at(&chars, pos, sym) {
                tokens.push_back((Token::Op(*op), pos));
                pos += sym.len();
                continue 'outer;
            }
        }

        if SINGLE_SYMS.contains(chars[pos]) {
            tokens.push_back((Token::SLSym(chars[pos]), pos));
            pos += 1;
            continue;
        }

        if chars[pos].is_ascii_digit() {
            let cs = chars[pos..]
                .iter()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>();
            let val = cs
                .parse::<i64>()
                .map_err(|_| TokenizeError("integer literal out of range".to_owned(), pos))?;
            tokens.push_back((Token::Num(val), pos));
            pos += cs.len();
            continue;
        }

        if chars[pos].is_ascii_alphabetic() || chars[pos] == '_' {
            let ident: String = chars[pos..]
                .iter()
                .take_while(|c| is_ident_char(**c))
                .collect();
            let offset = ident.len();
            tokens.push_back((Token::Ident(ident), pos));
            pos += offset;
            continue;
        }

        return Err(TokenizeError(format!("cannot tokenize '{}'", chars[pos]), pos).into());
    }

    tokens.push_back((Token::Eof, pos));
    Ok(tokens)
}
