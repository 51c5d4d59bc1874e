//! PDF lexer (tokenizer).
//!
//! Low-level tokenization of PDF bytes with nom. Numbers, strings, names,
//! delimiters and keywords are recognized; whitespace (space, \t, \r, \n,
//! \0, \f) and comments (% to EOL) are skipped between tokens.
//!
//! Bare words that are not part of the object grammar (`xref`, `trailer`,
//! `startxref`, the `n`/`f` markers of xref rows) are returned as
//! [`Token::Keyword`] so that cross-reference sections can be read with the
//! same tokenizer.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, value},
    sequence::{delimited, preceded},
    IResult,
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),
    /// Real (floating-point) number (e.g., 3.14, -2.5, .5)
    Real(f64),
    /// Literal string bytes, escapes not yet decoded
    LiteralString(&'a [u8]),
    /// Hexadecimal string digits, whitespace preserved
    HexString(&'a [u8]),
    /// Name with # escapes decoded (e.g., "Type" from "/Type")
    Name(String),
    /// Boolean true keyword
    True,
    /// Boolean false keyword
    False,
    /// Null keyword
    Null,
    /// Array start delimiter [
    ArrayStart,
    /// Array end delimiter ]
    ArrayEnd,
    /// Dictionary start delimiter <<
    DictStart,
    /// Dictionary end delimiter >>
    DictEnd,
    /// Indirect object start keyword "obj"
    ObjStart,
    /// Indirect object end keyword "endobj"
    ObjEnd,
    /// Stream start keyword "stream"
    StreamStart,
    /// Stream end keyword "endstream"
    StreamEnd,
    /// Reference keyword "R" (used in "10 0 R")
    R,
    /// Any other bare word (xref, trailer, startxref, n, f)
    Keyword(&'a [u8]),
}

/// PDF whitespace characters.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip all whitespace and comments.
pub fn skip_ws(input: &[u8]) -> IResult<&[u8], ()> {
    let mut remaining = input;
    loop {
        let (rest, ws) = take_while(is_whitespace)(remaining)?;
        remaining = rest;
        if let Ok((rest, _)) = comment(remaining) {
            remaining = rest;
            continue;
        }
        if ws.is_empty() {
            break;
        }
    }
    Ok((remaining, ()))
}

fn number_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

/// Parse an integer or real number (42, -123, +17, 3.14, .5, 5., -.002).
fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let start = input;
    let (input, sign) = opt(one_of("+-"))(input)?;
    let (input, int_part) = opt(digit1)(input)?;
    let (input, frac_part) = opt(preceded(char('.'), opt(digit1)))(input)?;

    if int_part.is_none() && frac_part.is_none() {
        return Err(number_error(start));
    }

    let negative = sign == Some('-');
    let int_str = int_part
        .map(|d| std::str::from_utf8(d).map_err(|_| number_error(start)))
        .transpose()?
        .unwrap_or("0");

    match frac_part {
        Some(frac) => {
            let frac_str = frac
                .map(|d| std::str::from_utf8(d).map_err(|_| number_error(start)))
                .transpose()?
                .unwrap_or("0");
            let num: f64 = format!("{}.{}", int_str, frac_str)
                .parse()
                .map_err(|_| number_error(start))?;
            Ok((input, Token::Real(if negative { -num } else { num })))
        },
        None => {
            let num: i64 = int_str.parse().map_err(|_| number_error(start))?;
            Ok((input, Token::Integer(if negative { -num } else { num })))
        },
    }
}

/// Parse a literal string with balanced parentheses; escapes are kept raw.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (remaining, _) = char('(')(input)?;
    let mut depth = 1;
    let mut pos = 0;

    while depth > 0 && pos < remaining.len() {
        match remaining[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    if depth != 0 || pos > remaining.len() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }

    Ok((&remaining[pos..], Token::LiteralString(&remaining[..pos - 1])))
}

/// Parse a hexadecimal string `<...>` (not a dictionary start).
fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }

    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode #XX escape sequences in PDF names; invalid sequences are preserved.
pub fn decode_name_escapes(name: &str) -> String {
    decode_name_bytes(name.as_bytes())
}

fn decode_name_bytes(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' && i + 3 <= bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Parse a name starting with /.
fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(is_regular), |bytes: &[u8]| Token::Name(decode_name_bytes(bytes))),
    )(input)
}

/// Parse delimiters and bare words. Bare words are read whole first so that
/// `trailer` is never mistaken for `true` or `R`.
fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        map(
            take_while1(|c: u8| is_regular(c) && !c.is_ascii_digit() && !matches!(c, b'+' | b'-' | b'.')),
            |word: &[u8]| match word {
                b"true" => Token::True,
                b"false" => Token::False,
                b"null" => Token::Null,
                b"obj" => Token::ObjStart,
                b"endobj" => Token::ObjEnd,
                b"stream" => Token::StreamStart,
                b"endstream" => Token::StreamEnd,
                b"R" => Token::R,
                other => Token::Keyword(other),
            },
        ),
    ))(input)
}

/// Parse a single PDF token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = skip_ws(input)?;

    alt((
        parse_keyword,
        parse_name,
        parse_number,
        parse_literal_string,
        parse_hex_string,
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers() {
        assert_eq!(token(b"42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"-123"), Ok((&b""[..], Token::Integer(-123))));
        assert_eq!(token(b"+17"), Ok((&b""[..], Token::Integer(17))));
        assert_eq!(token(b".5"), Ok((&b""[..], Token::Real(0.5))));
        assert_eq!(token(b"5."), Ok((&b""[..], Token::Real(5.0))));
        assert_eq!(token(b"-.002"), Ok((&b""[..], Token::Real(-0.002))));
    }

    #[test]
    fn test_literal_strings() {
        assert_eq!(token(b"(Hello (nested) World)"), Ok((&b""[..], Token::LiteralString(b"Hello (nested) World"))));
        assert_eq!(token(b"(a\\)b)"), Ok((&b""[..], Token::LiteralString(b"a\\)b"))));
        assert!(token(b"(unterminated").is_err());
    }

    #[test]
    fn test_hex_string_vs_dict() {
        assert_eq!(token(b"<48 65>"), Ok((&b""[..], Token::HexString(b"48 65"))));
        assert_eq!(token(b"<<"), Ok((&b""[..], Token::DictStart)));
    }

    #[test]
    fn test_names() {
        assert_eq!(token(b"/Type"), Ok((&b""[..], Token::Name("Type".into()))));
        assert_eq!(token(b"/A#20B"), Ok((&b""[..], Token::Name("A B".into()))));
        assert_eq!(token(b"/adbe.pkcs7.detached "), Ok((&b" "[..], Token::Name("adbe.pkcs7.detached".into()))));
        assert_eq!(decode_name_escapes("A#"), "A#");
    }

    #[test]
    fn test_keywords_are_whole_words() {
        assert_eq!(token(b"trailer"), Ok((&b""[..], Token::Keyword(b"trailer"))));
        assert_eq!(token(b"true"), Ok((&b""[..], Token::True)));
        assert_eq!(token(b"R/Next"), Ok((&b"/Next"[..], Token::R)));
        assert_eq!(token(b"startxref\n"), Ok((&b"\n"[..], Token::Keyword(b"startxref"))));
        assert_eq!(token(b"endstream"), Ok((&b""[..], Token::StreamEnd)));
    }

    #[test]
    fn test_skip_comments() {
        assert_eq!(token(b"%PDF-1.7\n% comment\n  12"), Ok((&b""[..], Token::Integer(12))));
    }
}
