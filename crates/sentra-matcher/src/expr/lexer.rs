use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Str(String),
    Int(i64),
    Float(f64),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    EqEq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
}

/// A token plus its byte offset, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Spanned { token: Token::LParen, pos: i });
                i += 1;
            }
            ')' => {
                tokens.push(Spanned { token: Token::RParen, pos: i });
                i += 1;
            }
            '[' => {
                tokens.push(Spanned { token: Token::LBracket, pos: i });
                i += 1;
            }
            ']' => {
                tokens.push(Spanned { token: Token::RBracket, pos: i });
                i += 1;
            }
            ',' => {
                tokens.push(Spanned { token: Token::Comma, pos: i });
                i += 1;
            }
            '+' => {
                tokens.push(Spanned { token: Token::Plus, pos: i });
                i += 1;
            }
            '-' => {
                tokens.push(Spanned { token: Token::Minus, pos: i });
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned { token: Token::EqEq, pos: i });
                    i += 2;
                } else {
                    return Err(ExprError::syntax(i, "expected `==`"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned { token: Token::NotEq, pos: i });
                    i += 2;
                } else {
                    tokens.push(Spanned { token: Token::Bang, pos: i });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned { token: Token::Ge, pos: i });
                    i += 2;
                } else {
                    tokens.push(Spanned { token: Token::Gt, pos: i });
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned { token: Token::Le, pos: i });
                    i += 2;
                } else {
                    tokens.push(Spanned { token: Token::Lt, pos: i });
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Spanned { token: Token::AndAnd, pos: i });
                    i += 2;
                } else {
                    return Err(ExprError::syntax(i, "expected `&&`"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Spanned { token: Token::OrOr, pos: i });
                    i += 2;
                } else {
                    return Err(ExprError::syntax(i, "expected `||`"));
                }
            }
            '"' | '\'' => {
                let (s, next) = lex_string(source, i, c)?;
                tokens.push(Spanned { token: Token::Str(s), pos: i });
                i = next;
            }
            _ if c.is_ascii_digit() => {
                let (token, next) = lex_number(source, i)?;
                tokens.push(Spanned { token, pos: i });
                i = next;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() {
                    let b = bytes[i] as char;
                    if b.is_ascii_alphanumeric() || b == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Spanned {
                    token: Token::Ident(source[start..i].to_string()),
                    pos: start,
                });
            }
            _ => return Err(ExprError::syntax(i, format!("unexpected character `{c}`"))),
        }
    }

    Ok(tokens)
}

fn lex_string(source: &str, start: usize, quote: char) -> Result<(String, usize), ExprError> {
    let bytes = source.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            let esc = bytes
                .get(i + 1)
                .ok_or_else(|| ExprError::syntax(i, "unterminated escape"))?;
            match *esc as char {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '\\' => out.push('\\'),
                '"' => out.push('"'),
                '\'' => out.push('\''),
                other => {
                    // Keep unknown escapes verbatim so regex literals like
                    // "\d+" survive without double-escaping.
                    out.push('\\');
                    out.push(other);
                }
            }
            i += 2;
            continue;
        }
        // Multi-byte UTF-8 passes through untouched.
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&source[i..i + ch_len]);
        i += ch_len;
    }

    Err(ExprError::syntax(start, "unterminated string literal"))
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

fn lex_number(source: &str, start: usize) -> Result<(Token, usize), ExprError> {
    let bytes = source.as_bytes();
    let mut i = start;
    let mut saw_dot = false;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !saw_dot && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) {
            saw_dot = true;
            i += 1;
        } else {
            break;
        }
    }

    let text = &source[start..i];
    if saw_dot {
        text.parse::<f64>()
            .map(|f| (Token::Float(f), i))
            .map_err(|_| ExprError::syntax(start, format!("bad float literal `{text}`")))
    } else {
        text.parse::<i64>()
            .map(|n| (Token::Int(n), i))
            .map_err(|_| ExprError::syntax(start, format!("bad integer literal `{text}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_operators_and_literals() {
        let tokens = tokenize(r#"Meta["k"] == "v" && Count() >= 2"#).unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|s| s.token).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Ident("Meta".into()),
                Token::LBracket,
                Token::Str("k".into()),
                Token::RBracket,
                Token::EqEq,
                Token::Str("v".into()),
                Token::AndAnd,
                Token::Ident("Count".into()),
                Token::LParen,
                Token::RParen,
                Token::Ge,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn keeps_regex_escapes_verbatim() {
        let tokens = tokenize(r#""\d+\.\d+""#).unwrap();
        assert_eq!(tokens[0].token, Token::Str(r"\d+\.\d+".into()));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize(r#""abc"#).is_err());
    }

    #[test]
    fn lexes_floats_and_negative_context() {
        let tokens = tokenize("1.5 - 2").unwrap();
        assert_eq!(tokens[0].token, Token::Float(1.5));
        assert_eq!(tokens[1].token, Token::Minus);
        assert_eq!(tokens[2].token, Token::Int(2));
    }
}
