//! Field-path parsing and printing.
//!
//! Grammar:
//!
//! ```text
//! path    := "" | "/" | step+
//! step    := "/" name | "/*" | "[" digits "]" | "[*]"
//! name    := unquoted | "'" chars "'" | '"' chars '"'
//! ```
//!
//! Unquoted names run until the next `/` or `[`; a backslash escapes the next
//! character both inside and outside quotes.

use crate::error::FieldPathError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    Root,
    Map(String),
    MapWildcard,
    List(usize),
    ListWildcard,
}

impl PathElement {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, PathElement::MapWildcard | PathElement::ListWildcard)
    }
}

const INDEX_REASON: &str = "only numbers and '*' allowed between '[' and ']'";

/// Parses a field path into its elements. The first element is always
/// [`PathElement::Root`].
pub fn parse_field_path(path: &str) -> Result<Vec<PathElement>, FieldPathError> {
    let chars: Vec<(usize, char)> = path.char_indices().collect();
    let mut elements = vec![PathElement::Root];
    if path.is_empty() || path == "/" {
        return Ok(elements);
    }

    let at = |i: usize| chars.get(i).map(|(p, _)| *p).unwrap_or(path.len());
    let mut i = 0;
    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            '/' => {
                i += 1;
                let Some(&(name_pos, first)) = chars.get(i) else {
                    return Err(FieldPathError::new(path, at(i), "empty field name"));
                };
                if first == '\'' || first == '"' {
                    i += 1;
                    let mut name = String::new();
                    let mut closed = false;
                    while i < chars.len() {
                        let ch = chars[i].1;
                        if ch == '\\' && i + 1 < chars.len() {
                            name.push(chars[i + 1].1);
                            i += 2;
                            continue;
                        }
                        i += 1;
                        if ch == first {
                            closed = true;
                            break;
                        }
                        name.push(ch);
                    }
                    if !closed {
                        return Err(FieldPathError::new(path, name_pos, "unclosed quote"));
                    }
                    if name.is_empty() {
                        return Err(FieldPathError::new(path, name_pos, "empty field name"));
                    }
                    if let Some(&(next_pos, next)) = chars.get(i) {
                        if next != '/' && next != '[' {
                            return Err(FieldPathError::new(
                                path,
                                next_pos,
                                "expected '/' or '[' after quoted name",
                            ));
                        }
                    }
                    elements.push(PathElement::Map(name));
                } else if first == '*' && matches!(chars.get(i + 1), None | Some((_, '/' | '['))) {
                    i += 1;
                    elements.push(PathElement::MapWildcard);
                } else {
                    let mut name = String::new();
                    while i < chars.len() {
                        let (ch_pos, ch) = chars[i];
                        match ch {
                            '/' | '[' => break,
                            '\\' => {
                                let Some(&(_, escaped)) = chars.get(i + 1) else {
                                    return Err(FieldPathError::new(path, ch_pos, "dangling escape"));
                                };
                                name.push(escaped);
                                i += 2;
                            }
                            ']' => {
                                return Err(FieldPathError::new(path, ch_pos, "unexpected ']'"));
                            }
                            _ => {
                                name.push(ch);
                                i += 1;
                            }
                        }
                    }
                    if name.is_empty() {
                        return Err(FieldPathError::new(path, name_pos, "empty field name"));
                    }
                    elements.push(PathElement::Map(name));
                }
            }
            '[' => {
                i += 1;
                let mut digits = String::new();
                let mut wildcard = false;
                let mut closed = false;
                while let Some(&(ch_pos, ch)) = chars.get(i) {
                    i += 1;
                    match ch {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '*' if digits.is_empty() && !wildcard => wildcard = true,
                        d if d.is_ascii_digit() && !wildcard => digits.push(d),
                        _ => return Err(FieldPathError::new(path, ch_pos, INDEX_REASON)),
                    }
                }
                if !closed {
                    return Err(FieldPathError::new(path, pos, "unclosed '['"));
                }
                if wildcard {
                    elements.push(PathElement::ListWildcard);
                } else if digits.is_empty() {
                    return Err(FieldPathError::new(path, pos, "empty list index"));
                } else {
                    let idx = digits
                        .parse::<usize>()
                        .map_err(|_| FieldPathError::new(path, pos + 1, "list index out of range"))?;
                    elements.push(PathElement::List(idx));
                }
            }
            _ if i == 0 => {
                return Err(FieldPathError::new(path, pos, "must start with '/' or '['"));
            }
            _ => {
                return Err(FieldPathError::new(path, pos, "expected '/' or '['"));
            }
        }
    }
    Ok(elements)
}

/// Prints elements back into a path string. Root alone prints as `/`.
pub fn field_path_string(elements: &[PathElement]) -> String {
    let mut out = String::new();
    for element in elements {
        match element {
            PathElement::Root => {}
            PathElement::Map(name) => {
                out.push('/');
                out.push_str(&escape_name(name));
            }
            PathElement::MapWildcard => out.push_str("/*"),
            PathElement::List(idx) => {
                out.push('[');
                out.push_str(&idx.to_string());
                out.push(']');
            }
            PathElement::ListWildcard => out.push_str("[*]"),
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Quotes a map key with single quotes when it contains characters that
/// would otherwise change how the path parses.
pub fn escape_name(name: &str) -> String {
    let needs_quotes = name.is_empty()
        || name == "*"
        || name
            .chars()
            .any(|c| matches!(c, '/' | '[' | ']' | '\'' | '"' | '\\'));
    if !needs_quotes {
        return name.to_string();
    }
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('\'');
    for c in name.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(name: &str) -> PathElement {
        PathElement::Map(name.to_string())
    }

    #[test]
    fn test_parse_nested_path() {
        assert_eq!(
            parse_field_path("/a/b[2]/c").unwrap(),
            vec![PathElement::Root, map("a"), map("b"), PathElement::List(2), map("c")]
        );
    }

    #[test]
    fn test_parse_root() {
        assert_eq!(parse_field_path("").unwrap(), vec![PathElement::Root]);
        assert_eq!(parse_field_path("/").unwrap(), vec![PathElement::Root]);
    }

    #[test]
    fn test_non_numeric_index() {
        let err = parse_field_path("/a[x]").unwrap_err();
        assert_eq!(err.position, 3);
        assert_eq!(err.reason, "only numbers and '*' allowed between '[' and ']'");
    }

    #[test]
    fn test_quoted_names() {
        assert_eq!(
            parse_field_path("/'a/b'[0]").unwrap(),
            vec![PathElement::Root, map("a/b"), PathElement::List(0)]
        );
        assert_eq!(
            parse_field_path("/\"x y\"/'it\\'s'").unwrap(),
            vec![PathElement::Root, map("x y"), map("it's")]
        );
        assert_eq!(parse_field_path("/a\\/b").unwrap(), vec![PathElement::Root, map("a/b")]);
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(
            parse_field_path("/*[*]").unwrap(),
            vec![PathElement::Root, PathElement::MapWildcard, PathElement::ListWildcard]
        );
        assert_eq!(parse_field_path("/*x").unwrap(), vec![PathElement::Root, map("*x")]);
    }

    #[test]
    fn test_errors_carry_positions() {
        let cases = [
            ("a", 0, "must start with '/' or '['"),
            ("/'abc", 1, "unclosed quote"),
            ("/a[12", 2, "unclosed '['"),
            ("/a[]", 2, "empty list index"),
            ("/a//b", 3, "empty field name"),
            ("/a/", 3, "empty field name"),
            ("/a[1]x", 5, "expected '/' or '['"),
        ];
        for (input, position, reason) in cases {
            let err = parse_field_path(input).unwrap_err();
            assert_eq!(err.position, position, "position for {:?}", input);
            assert_eq!(err.reason, reason, "reason for {:?}", input);
        }
    }

    #[test]
    fn test_printer_quotes_special_names() {
        let elements = vec![PathElement::Root, map("a/b"), map("*"), map("it's"), PathElement::List(3)];
        let printed = field_path_string(&elements);
        assert_eq!(printed, "/'a/b'/'*'/'it\\'s'[3]");
        assert_eq!(parse_field_path(&printed).unwrap(), elements);
        assert_eq!(field_path_string(&[PathElement::Root]), "/");
    }
}
