//! A forgiving Java lexer that splits text into lexemes.
//!
//! It never rejects input: anything it does not recognize becomes a
//! single-character lexeme. Concatenating the output reproduces the input.

/// Split `text` into lexemes covering every byte exactly once.
pub fn lex(text: &str) -> Vec<&str> {
    let mut lexemes = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let len = next_len(rest);
        let (head, tail) = rest.split_at(len);
        lexemes.push(head);
        rest = tail;
    }
    lexemes
}

const OPERATORS: &[&str] = &[
    ">>>=", "<<=", ">>=", ">>>", "...", "->", "::", "++", "--", "&&", "||", "==", "!=", "<=",
    ">=", "+=", "-=", "*=", "/=", "&=", "|=", "^=", "%=", "<<", ">>",
];

/// Byte length of the lexeme at the start of `rest` (never zero).
fn next_len(rest: &str) -> usize {
    let mut chars = rest.char_indices();
    let Some((_, first)) = chars.next() else {
        return 0;
    };

    if first.is_whitespace() {
        return take_while(rest, char::is_whitespace);
    }
    if first.is_alphabetic() || first == '_' || first == '$' {
        return take_while(rest, |c| c.is_alphanumeric() || c == '_' || c == '$');
    }
    if first.is_ascii_digit() {
        return take_while(rest, |c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
    }
    if rest.starts_with("//") {
        return rest.find('\n').unwrap_or(rest.len());
    }
    if rest.starts_with("/*") {
        return rest[2..].find("*/").map_or(rest.len(), |end| end + 4);
    }
    if rest.starts_with("\"\"\"") {
        return rest[3..].find("\"\"\"").map_or(rest.len(), |end| end + 6);
    }
    if first == '"' || first == '\'' {
        return quoted_len(rest, first);
    }
    if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(*op)) {
        return op.len();
    }
    first.len_utf8()
}

fn take_while(rest: &str, pred: impl Fn(char) -> bool) -> usize {
    rest.char_indices()
        .find(|(_, c)| !pred(*c))
        .map_or(rest.len(), |(idx, _)| idx)
}

/// A quoted literal ends at the matching unescaped quote or at the end of
/// the line, whichever comes first.
fn quoted_len(rest: &str, quote: char) -> usize {
    let mut escaped = false;
    for (idx, c) in rest.char_indices().skip(1) {
        if c == '\n' {
            return idx;
        }
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return idx + c.len_utf8();
        }
    }
    rest.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex_splits_declaration() {
        let lexemes = lex("List<String> xs = new ArrayList<>();");
        assert_eq!(
            lexemes,
            vec![
                "List", "<", "String", ">", " ", "xs", " ", "=", " ", "new", " ", "ArrayList", "<",
                ">", "(", ")", ";"
            ]
        );
    }

    #[test]
    fn test_comments_and_literals_are_single_lexemes() {
        let lexemes = lex("a /* b c */ \"x \\\" y\" // tail\nz");
        assert!(lexemes.contains(&"/* b c */"));
        assert!(lexemes.contains(&"\"x \\\" y\""));
        assert!(lexemes.contains(&"// tail"));
        assert_eq!(lexemes.last(), Some(&"z"));
    }

    #[test]
    fn test_unterminated_constructs_still_cover_input() {
        for text in ["/* open", "\"open\nnext", "'", "1.5e3f", "a->b::c >>>= 2", "été λ x"] {
            assert_eq!(lex(text).concat(), text);
        }
    }

    #[test]
    fn test_multichar_operators_win() {
        assert_eq!(lex("x>>>=1"), vec!["x", ">>>=", "1"]);
        assert_eq!(lex("f(a...)"), vec!["f", "(", "a", "...", ")"]);
    }
}
