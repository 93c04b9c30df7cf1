//! Byte-exact lexer for `<img>` tags and the start tags around them.
//!
//! The lexer records where every attribute name and value sits inside the tag
//! text so edits can splice new text in without re-serializing anything:
//! quoting, attribute order, whitespace and the `/>` vs `>` ending all survive.
//!
//! Values may be double-quoted, single-quoted, unquoted, or a `{...}` template
//! expression (as in `.astro` files).

use std::ops::Range;

/// Why a tag could not be lexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    /// The input at the offset is not `<img` followed by a delimiter.
    NotImg,
    /// Input ended before the closing `>`.
    Unclosed,
    /// A quote or brace was opened and never closed.
    UnterminatedValue,
    /// A `<` appeared where an attribute was expected.
    StrayAngle,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            LexError::NotImg => "not an <img> tag",
            LexError::Unclosed => "tag is never closed",
            LexError::UnterminatedValue => "attribute value is never closed",
            LexError::StrayAngle => "unexpected '<' inside tag",
        };
        f.write_str(msg)
    }
}

/// How an attribute value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    Double,
    Single,
    Bare,
    /// `{expression}`: a template binding, never a literal.
    Expression,
}

/// One attribute, with ranges relative to the start of the tag text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: Range<usize>,
    /// Value content without quotes. `None` for boolean attributes.
    pub value: Option<Range<usize>>,
    pub quote: Option<Quote>,
    /// End of the whole `name="value"` token.
    pub end: usize,
}

/// A lexed `<img>` tag borrowed from its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImgTag<'a> {
    /// Byte offset of `<` in the document.
    pub offset: usize,
    /// Tag text from `<` through `>`.
    pub text: &'a str,
    pub attrs: Vec<Attr>,
    /// Where new attributes go: right after the last attribute token.
    pub insert_at: usize,
}

/// A replacement inside a tag, relative to the tag text.
pub type TagEdit = (Range<usize>, String);

fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace()
}

/// Whether `input` at `at` starts an `<img` tag (case-insensitive).
pub fn starts_img(input: &str, at: usize) -> bool {
    let bytes = input.as_bytes();
    let Some(head) = bytes.get(at..at + 4) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(b"<img") {
        return false;
    }
    matches!(bytes.get(at + 4), Some(&b) if is_space(b) || b == b'/' || b == b'>')
}

/// Attribute tokens of a start tag, relative to the tag's `<`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrList {
    pub attrs: Vec<Attr>,
    /// Right after the last attribute token.
    pub insert_at: usize,
    /// Length of the tag text through `>`.
    pub len: usize,
    /// The tag ends in `/>`.
    pub self_closing: bool,
}

/// Lex the attributes of a start tag whose name ends at `pos` (relative to
/// `bytes`, which starts at the tag's `<`).
pub fn lex_attrs(bytes: &[u8], mut pos: usize) -> Result<AttrList, LexError> {
    let mut attrs = Vec::new();
    let mut insert_at = pos;
    let self_closing;

    loop {
        while pos < bytes.len() && is_space(bytes[pos]) {
            pos += 1;
        }
        let Some(&b) = bytes.get(pos) else {
            return Err(LexError::Unclosed);
        };
        match b {
            b'>' => {
                pos += 1;
                self_closing = false;
                break;
            }
            b'/' if bytes.get(pos + 1) == Some(&b'>') => {
                pos += 2;
                self_closing = true;
                break;
            }
            b'/' => {
                pos += 1;
                continue;
            }
            b'<' => return Err(LexError::StrayAngle),
            _ => {}
        }

        let name_start = pos;
        while pos < bytes.len() {
            let c = bytes[pos];
            if is_space(c) || c == b'=' || c == b'>' || c == b'<' {
                break;
            }
            if c == b'/' && bytes.get(pos + 1) == Some(&b'>') {
                break;
            }
            pos += 1;
        }
        let name = name_start..pos;

        let mut after_name = pos;
        while after_name < bytes.len() && is_space(bytes[after_name]) {
            after_name += 1;
        }
        if bytes.get(after_name) != Some(&b'=') {
            attrs.push(Attr {
                name,
                value: None,
                quote: None,
                end: pos,
            });
            insert_at = pos;
            continue;
        }

        pos = after_name + 1;
        while pos < bytes.len() && is_space(bytes[pos]) {
            pos += 1;
        }
        let (value, quote, end) = lex_value(bytes, pos)?;
        attrs.push(Attr {
            name,
            value: Some(value),
            quote: Some(quote),
            end,
        });
        pos = end;
        insert_at = end;
    }

    Ok(AttrList {
        attrs,
        insert_at,
        len: pos,
        self_closing,
    })
}

impl<'a> ImgTag<'a> {
    /// Lex the `<img` tag that starts at byte `offset` of `input`.
    pub fn lex(input: &'a str, offset: usize) -> Result<Self, LexError> {
        if !starts_img(input, offset) {
            return Err(LexError::NotImg);
        }
        let list = lex_attrs(&input.as_bytes()[offset..], 4)?;
        Ok(Self {
            offset,
            text: &input[offset..offset + list.len],
            attrs: list.attrs,
            insert_at: list.insert_at,
        })
    }

    /// Byte range of the tag in its document.
    pub fn span(&self) -> Range<usize> {
        self.offset..self.offset + self.text.len()
    }

    pub fn find(&self, name: &str) -> Option<&Attr> {
        self.attrs
            .iter()
            .find(|a| self.text[a.name.clone()].eq_ignore_ascii_case(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Value text of `name`. Boolean attributes yield `Some("")`.
    pub fn value(&self, name: &str) -> Option<&'a str> {
        let attr = self.find(name)?;
        Some(match &attr.value {
            Some(range) => &self.text[range.clone()],
            None => "",
        })
    }

    /// Value of `name` if it is a literal, i.e. not a `{...}` expression.
    pub fn literal(&self, name: &str) -> Option<&'a str> {
        let attr = self.find(name)?;
        if attr.quote == Some(Quote::Expression) {
            return None;
        }
        self.value(name)
    }

    /// Whitespace-separated tokens of the `class` attribute.
    pub fn classes(&self) -> Vec<&'a str> {
        self.literal("class")
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().contains(&class)
    }

    /// Edit replacing the value of `name`. Bare values and `{...}` expressions
    /// become double-quoted literals so the new value may contain spaces.
    pub fn set_value(&self, name: &str, value: &str) -> Option<TagEdit> {
        let attr = self.find(name)?;
        let range = attr.value.clone()?;
        let replacement = match attr.quote {
            Some(Quote::Bare | Quote::Expression) => format!("\"{value}\""),
            _ => value.to_string(),
        };
        Some((range, replacement))
    }

    /// Range covering an attribute token plus the whitespace in front of it,
    /// for removal without leaving a double space.
    pub fn removal_range(&self, attr: &Attr) -> Range<usize> {
        let bytes = self.text.as_bytes();
        let mut start = attr.name.start;
        while start > 0 && is_space(bytes[start - 1]) {
            start -= 1;
        }
        start..attr.end
    }

    /// Apply edits and return the new tag text. Edits must not overlap.
    pub fn rewrite(&self, mut edits: Vec<TagEdit>) -> String {
        edits.sort_by(|a, b| b.0.start.cmp(&a.0.start).then(b.0.end.cmp(&a.0.end)));
        let mut out = self.text.to_string();
        for (range, replacement) in edits {
            out.replace_range(range, &replacement);
        }
        out
    }
}

/// Lex a value starting at `pos`, returning (content range, quote, token end).
fn lex_value(bytes: &[u8], pos: usize) -> Result<(Range<usize>, Quote, usize), LexError> {
    match bytes.get(pos) {
        Some(&q @ (b'"' | b'\'')) => {
            let close = bytes[pos + 1..]
                .iter()
                .position(|&c| c == q)
                .ok_or(LexError::UnterminatedValue)?;
            let end = pos + 1 + close;
            let quote = if q == b'"' { Quote::Double } else { Quote::Single };
            Ok((pos + 1..end, quote, end + 1))
        }
        Some(b'{') => {
            let mut depth = 0usize;
            let mut in_str: Option<u8> = None;
            for (i, &c) in bytes.iter().enumerate().skip(pos) {
                match in_str {
                    Some(q) if c == q => in_str = None,
                    Some(_) => {}
                    None => match c {
                        b'"' | b'\'' | b'`' => in_str = Some(c),
                        b'{' => depth += 1,
                        b'}' => {
                            depth -= 1;
                            if depth == 0 {
                                return Ok((pos..i + 1, Quote::Expression, i + 1));
                            }
                        }
                        _ => {}
                    },
                }
            }
            Err(LexError::UnterminatedValue)
        }
        Some(_) => {
            let mut end = pos;
            while end < bytes.len() && !is_space(bytes[end]) && bytes[end] != b'>' {
                if bytes[end] == b'/' && bytes.get(end + 1) == Some(&b'>') {
                    break;
                }
                end += 1;
            }
            Ok((pos..end, Quote::Bare, end))
        }
        None => Err(LexError::Unclosed),
    }
}
