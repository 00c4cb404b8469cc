//! TypeScript type stripping.
//!
//! The platform delegates real TS compilation to a compiler collaborator;
//! this module is the fallback used when none is reachable. It removes type
//! syntax while leaving runtime semantics alone. It is not a parser: it is a
//! string-aware scanner with one pass per construct, which is enough for the
//! module shapes users actually deploy.

use std::sync::LazyLock;

use regex::Regex;

static IMPORT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*import\s+type\s[^;]*;[ \t]*\r?\n?").unwrap());

static EXPORT_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s+type\s*\{[^}]*\}\s*(?:from\s*['"][^'"]*['"])?\s*;?[ \t]*\r?\n?"#)
        .unwrap()
});

static IMPORT_BRACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"import\s*(?:[\w$]+\s*,\s*)?\{([^}]*)\}").unwrap());

static EMPTY_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s*\{\s*\}\s*from\s*['"][^'"]*['"]\s*;?[ \t]*\r?\n?"#).unwrap()
});

static OVERLOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:async\s+)?function\s+[\w$]+\s*(?:<[^>{;]*>)?\s*\([^)]*\)\s*:[^;{]*;[ \t]*\r?\n?")
        .unwrap()
});

static ABSTRACT_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:public\s+|private\s+|protected\s+)?abstract\s+[\w$]+\s*(?:<[^>{;]*>)?\s*\([^)]*\)\s*:[^;{]*;[ \t]*\r?\n?")
        .unwrap()
});

static ACCESS_MODIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:public|private|protected|readonly)\s+").unwrap());

static ABSTRACT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\babstract\s+").unwrap());

static IMPLEMENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bimplements\s+[\w$.\s,<>\[\]]+\{").unwrap());

static ANGLE_ASSERTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<\s*[\w$.]+(?:\[\])?\s*>\s*([\w$("'\[])"#).unwrap()
});

static TRIPLE_NEWLINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip TypeScript type syntax from `source`, yielding JavaScript.
pub fn strip_types(source: &str) -> String {
    let mut out = source.to_string();
    out = IMPORT_TYPE_RE.replace_all(&out, "").into_owned();
    out = EXPORT_TYPE_RE.replace_all(&out, "").into_owned();
    out = strip_type_import_specifiers(&out);
    out = remove_keyword_statements(&out, "interface");
    out = remove_type_aliases(&out);
    out = remove_keyword_statements(&out, "declare");
    out = OVERLOAD_RE.replace_all(&out, "").into_owned();
    out = ABSTRACT_METHOD_RE.replace_all(&out, "").into_owned();
    out = IMPLEMENTS_RE.replace_all(&out, "{").into_owned();
    out = ACCESS_MODIFIER_RE.replace_all(&out, "").into_owned();
    out = ABSTRACT_RE.replace_all(&out, "").into_owned();
    out = strip_generic_parameter_lists(&out);
    out = strip_signature_annotations(&out);
    out = strip_variable_annotations(&out);
    out = strip_as_and_satisfies(&out);
    out = ANGLE_ASSERTION_RE.replace_all(&out, "$1").into_owned();
    out = strip_non_null_assertions(&out);
    out = EMPTY_IMPORT_RE.replace_all(&out, "").into_owned();
    out = TRIPLE_NEWLINE_RE.replace_all(&out, "\n\n").into_owned();
    out = collapse_spaces(&out);
    out.trim().to_string()
}

/// Remove `type` specifiers from mixed import lists, eg
/// `import { foo, type Bar } from "m"` keeps only `foo`.
fn strip_type_import_specifiers(source: &str) -> String {
    IMPORT_BRACES_RE
        .replace_all(source, |caps: &regex::Captures<'_>| {
            let inner = &caps[1];
            let kept: Vec<&str> = inner
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty() && !s.starts_with("type "))
                .collect();
            let full = caps.get(0).expect("capture 0 always exists").as_str();
            let prefix_end = full.find('{').expect("regex requires a brace");
            format!("{}{{ {} }}", &full[..prefix_end], kept.join(", "))
        })
        .into_owned()
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

/// Is `idx` the start of the word `word` (with word boundaries on both
/// sides)?
fn at_word(bytes: &[u8], idx: usize, word: &str) -> bool {
    let w = word.as_bytes();
    if idx + w.len() > bytes.len() || &bytes[idx..idx + w.len()] != w {
        return false;
    }
    if idx > 0 && is_ident_char(bytes[idx - 1]) {
        return false;
    }
    if idx + w.len() < bytes.len() && is_ident_char(bytes[idx + w.len()]) {
        return false;
    }
    true
}

/// Skip past the string literal starting at `idx` (`'`, `"` or a template
/// backtick). Returns the index just past the terminator.
fn skip_string(bytes: &[u8], idx: usize) -> usize {
    let quote = bytes[idx];
    let mut i = idx + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Skip past a `//` or `/*` comment starting at `idx`.
fn skip_comment(bytes: &[u8], idx: usize) -> Option<usize> {
    if idx + 1 >= bytes.len() || bytes[idx] != b'/' {
        return None;
    }
    match bytes[idx + 1] {
        b'/' => {
            let mut i = idx + 2;
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            Some(i)
        },
        b'*' => {
            let mut i = idx + 2;
            while i + 1 < bytes.len() {
                if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                    return Some(i + 2);
                }
                i += 1;
            }
            Some(bytes.len())
        },
        _ => None,
    }
}

/// Find the matching `close` for the `open` at `start`, skipping strings
/// and comments. Returns the index of the closing delimiter.
fn find_matching(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    debug_assert_eq!(bytes[start], open);
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            i = skip_string(bytes, i);
            continue;
        }
        if let Some(next) = skip_comment(bytes, i) {
            i = next;
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Remove whole statements introduced by `keyword` (`interface`,
/// `declare`), including an `export` prefix: either a balanced `{...}`
/// block or a run to the terminating semicolon.
fn remove_keyword_statements(source: &str, keyword: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_string(bytes, i);
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if let Some(end) = skip_comment(bytes, i) {
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if at_word(bytes, i, keyword) {
            // Swallow a directly preceding `export `.
            let export_len = "export ".len();
            let mut strip_from = out.len();
            if out.len() >= export_len && out[out.len() - export_len..] == *b"export " {
                strip_from = out.len() - export_len;
            }
            out.truncate(strip_from);
            // Scan forward to the end of the statement.
            let mut j = i;
            let mut end = None;
            while j < bytes.len() {
                let cj = bytes[j];
                if cj == b'\'' || cj == b'"' || cj == b'`' {
                    j = skip_string(bytes, j);
                    continue;
                }
                if cj == b'{' {
                    let close = find_matching(bytes, j, b'{', b'}').unwrap_or(bytes.len() - 1);
                    let mut k = close + 1;
                    if k < bytes.len() && bytes[k] == b';' {
                        k += 1;
                    }
                    end = Some(k);
                    break;
                }
                if cj == b';' {
                    end = Some(j + 1);
                    break;
                }
                j += 1;
            }
            i = end.unwrap_or(bytes.len());
            // Swallow one trailing newline to avoid leaving blank holes.
            if i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).expect("byte edits preserve utf8 boundaries")
}

/// Remove `type Name<...> = ...;` aliases, scanning the right-hand side to
/// the semicolon at bracket depth zero.
fn remove_type_aliases(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_string(bytes, i);
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if let Some(end) = skip_comment(bytes, i) {
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if at_word(bytes, i, "type") && is_alias_statement(bytes, i) {
            let export_len = "export ".len();
            if out.len() >= export_len && out[out.len() - export_len..] == *b"export " {
                out.truncate(out.len() - export_len);
            }
            let mut j = i;
            let mut depth = 0isize;
            while j < bytes.len() {
                let cj = bytes[j];
                if cj == b'\'' || cj == b'"' || cj == b'`' {
                    j = skip_string(bytes, j);
                    continue;
                }
                match cj {
                    b'{' | b'(' | b'[' | b'<' => depth += 1,
                    b'}' | b')' | b']' | b'>' => depth -= 1,
                    b';' if depth <= 0 => {
                        j += 1;
                        break;
                    },
                    _ => {},
                }
                j += 1;
            }
            i = j;
            if i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).expect("byte edits preserve utf8 boundaries")
}

/// `type` only introduces an alias when followed by an identifier and `=`
/// before any other statement punctuation.
fn is_alias_statement(bytes: &[u8], idx: usize) -> bool {
    let mut i = idx + "type".len();
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let ident_start = i;
    while i < bytes.len() && is_ident_char(bytes[i]) {
        i += 1;
    }
    if i == ident_start {
        return false;
    }
    // Skip a generic parameter list on the alias itself.
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'<' {
        match find_matching(bytes, i, b'<', b'>') {
            Some(close) => i = close + 1,
            None => return false,
        }
    }
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i < bytes.len() && bytes[i] == b'=' && bytes.get(i + 1) != Some(&b'=')
}

/// Remove `<...>` generic parameter lists that follow a function or class
/// name, at arbitrary nesting depth. A list is recognized when the matching
/// `>` is followed by `(` (functions, methods, call-site type arguments) or
/// when the identifier is a class name.
fn strip_generic_parameter_lists(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_string(bytes, i);
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if let Some(end) = skip_comment(bytes, i) {
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if c == b'<' && i > 0 && is_ident_char(bytes[i - 1]) {
            if let Some(close) = find_matching(bytes, i, b'<', b'>') {
                let mut after = close + 1;
                while after < bytes.len() && bytes[after] == b' ' {
                    after += 1;
                }
                let followed_by_call = after < bytes.len() && bytes[after] == b'(';
                let class_decl = preceding_class_name(&out);
                let followed_by_body = after < bytes.len()
                    && (bytes[after] == b'{' || at_word(bytes, after, "extends"));
                if followed_by_call || (class_decl && followed_by_body) {
                    i = close + 1;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).expect("byte edits preserve utf8 boundaries")
}

/// Does the emitted output end with `class <Identifier>`?
fn preceding_class_name(out: &[u8]) -> bool {
    let mut i = out.len();
    while i > 0 && is_ident_char(out[i - 1]) {
        i -= 1;
    }
    if i == out.len() {
        return false;
    }
    let mut j = i;
    while j > 0 && out[j - 1] == b' ' {
        j -= 1;
    }
    j >= 5 && &out[j - 5..j] == b"class" && (j == 5 || !is_ident_char(out[j - 6]))
}

const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "catch", "return"];

/// Strip `this:` parameters, parameter annotations, and return-type
/// annotations from every parameter list. A paren group counts as a
/// parameter list when its closer is followed by `{`, `=>` or a return
/// annotation, and it is not the condition of a control-flow statement.
fn strip_signature_annotations(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_string(bytes, i);
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if let Some(end) = skip_comment(bytes, i) {
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if c == b'(' && !is_control_flow_paren(&out) {
            if let Some(close) = find_matching(bytes, i, b'(', b')') {
                let (is_signature, after_annotation) = classify_paren_group(bytes, close);
                if is_signature {
                    let inner = &source[i + 1..close];
                    out.push(b'(');
                    out.extend_from_slice(strip_param_list(inner).as_bytes());
                    out.push(b')');
                    // When a return annotation was skipped, restore the
                    // single space before the body or arrow.
                    if after_annotation != close + 1
                        && matches!(bytes.get(after_annotation), Some(b'{') | Some(b'='))
                    {
                        out.push(b' ');
                    }
                    i = after_annotation;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).expect("byte edits preserve utf8 boundaries")
}

/// Whether the paren whose contents were just about to be emitted belongs
/// to a control-flow statement head.
fn is_control_flow_paren(out: &[u8]) -> bool {
    let mut i = out.len();
    while i > 0 && (out[i - 1] == b' ' || out[i - 1] == b'\n') {
        i -= 1;
    }
    let word_end = i;
    while i > 0 && is_ident_char(out[i - 1]) {
        i -= 1;
    }
    let word = &out[i..word_end];
    CONTROL_KEYWORDS.iter().any(|k| word == k.as_bytes())
}

/// Decide whether the paren group closing at `close` is a function
/// signature, and if so where emission should resume (past any return-type
/// annotation).
fn classify_paren_group(bytes: &[u8], close: usize) -> (bool, usize) {
    let mut after = close + 1;
    while after < bytes.len() && (bytes[after] == b' ' || bytes[after] == b'\n') {
        after += 1;
    }
    if after + 1 < bytes.len() && bytes[after] == b'=' && bytes[after + 1] == b'>' {
        return (true, close + 1);
    }
    if after < bytes.len() && bytes[after] == b'{' {
        return (true, close + 1);
    }
    if after < bytes.len() && bytes[after] == b':' {
        // Return annotation: scan to `{`, `=>` or statement end at depth 0.
        let mut j = after + 1;
        let mut depth = 0isize;
        while j < bytes.len() {
            let cj = bytes[j];
            if cj == b'\'' || cj == b'"' || cj == b'`' {
                j = skip_string(bytes, j);
                continue;
            }
            match cj {
                b'{' if depth == 0 => return (true, j),
                b'=' if depth == 0 && bytes.get(j + 1) == Some(&b'>') => return (true, j),
                b';' | b'\n' if depth == 0 => return (true, j),
                b'(' | b'[' | b'<' => depth += 1,
                b'{' => depth += 1,
                b')' | b']' | b'>' | b'}' => {
                    if depth == 0 {
                        return (true, j);
                    }
                    depth -= 1;
                },
                _ => {},
            }
            j += 1;
        }
        return (true, bytes.len());
    }
    (false, close + 1)
}

/// Strip annotations from the interior of one parameter list.
fn strip_param_list(inner: &str) -> String {
    let bytes = inner.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    // Drop a leading `this: Type` parameter entirely.
    let trimmed = inner.trim_start();
    if trimmed.starts_with("this") {
        let rest = trimmed["this".len()..].trim_start();
        if rest.starts_with(':') {
            let mut depth = 0isize;
            let mut j = inner.len() - trimmed.len() + "this".len();
            while j < bytes.len() {
                match bytes[j] {
                    b'(' | b'[' | b'{' | b'<' => depth += 1,
                    b')' | b']' | b'}' | b'>' => depth -= 1,
                    b',' if depth == 0 => {
                        j += 1;
                        while j < bytes.len() && bytes[j] == b' ' {
                            j += 1;
                        }
                        break;
                    },
                    _ => {},
                }
                j += 1;
            }
            i = j;
        }
    }
    let mut copy_depth = 0isize;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_string(bytes, i);
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        match c {
            b'(' | b'[' | b'{' => copy_depth += 1,
            b')' | b']' | b'}' => copy_depth -= 1,
            _ => {},
        }
        if c == b'?' && copy_depth == 0 && peek_past_spaces(bytes, i + 1) == Some(b':') {
            // Optional marker: drop the `?`, the annotation pass handles the
            // `:`.
            i += 1;
            continue;
        }
        if c == b':' && copy_depth == 0 {
            // Skip the type expression: runs to `,` or `=` (default value)
            // at depth 0, or the end of the list.
            let mut depth = 0isize;
            let mut j = i + 1;
            while j < bytes.len() {
                let cj = bytes[j];
                if cj == b'\'' || cj == b'"' || cj == b'`' {
                    j = skip_string(bytes, j);
                    continue;
                }
                match cj {
                    b'(' | b'[' | b'{' | b'<' => depth += 1,
                    b')' | b']' | b'}' | b'>' => depth -= 1,
                    b',' if depth == 0 => break,
                    b'=' if depth == 0 && bytes.get(j + 1) != Some(&b'>') => break,
                    _ => {},
                }
                j += 1;
            }
            // Restore the space before a default value.
            if bytes.get(j) == Some(&b'=') && out.last() != Some(&b' ') {
                out.push(b' ');
            }
            i = j;
            continue;
        }
        // Parenthesized sub-lists (function-typed params) were already
        // handled by the annotation skip above, so nested parens only
        // appear inside default values; copy them through.
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).expect("byte edits preserve utf8 boundaries")
}

fn peek_past_spaces(bytes: &[u8], mut i: usize) -> Option<u8> {
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    bytes.get(i).copied()
}

/// Strip `const x: Type = …` style variable annotations.
fn strip_variable_annotations(source: &str) -> String {
    static VAR_ANNOTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(const|let|var)(\s+[\w$]+)\s*:\s*[^=;,(){}]+(\s*=)").unwrap()
    });
    VAR_ANNOTATION_RE
        .replace_all(source, "$1$2$3")
        .into_owned()
}

/// Remove `as Type` / `as { … }` assertions and `satisfies Type`
/// expressions, preserving `as const`.
fn strip_as_and_satisfies(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_string(bytes, i);
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if let Some(end) = skip_comment(bytes, i) {
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        // `as` inside an import/export specifier list is a runtime rename,
        // not an assertion; copy those statements through untouched.
        if at_word(bytes, i, "import")
            || (at_word(bytes, i, "export") && peek_past_spaces(bytes, i + 6) == Some(b'{'))
        {
            let mut j = i;
            while j < bytes.len() && bytes[j] != b';' && bytes[j] != b'\n' {
                if bytes[j] == b'\'' || bytes[j] == b'"' {
                    j = skip_string(bytes, j);
                    continue;
                }
                j += 1;
            }
            out.extend_from_slice(&bytes[i..j]);
            i = j;
            continue;
        }
        let keyword = if at_word(bytes, i, "as") {
            Some(2)
        } else if at_word(bytes, i, "satisfies") {
            Some(9)
        } else {
            None
        };
        if let Some(len) = keyword {
            let mut j = i + len;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if at_word(bytes, j, "const") && len == 2 {
                out.extend_from_slice(&bytes[i..j + "const".len()]);
                i = j + "const".len();
                continue;
            }
            // Swallow the type expression.
            if j < bytes.len() && bytes[j] == b'{' {
                let close = find_matching(bytes, j, b'{', b'}').unwrap_or(bytes.len() - 1);
                // Drop a trailing space we emitted before `as`.
                if out.last() == Some(&b' ') {
                    out.pop();
                }
                i = close + 1;
                continue;
            }
            let mut depth = 0isize;
            while j < bytes.len() {
                let cj = bytes[j];
                match cj {
                    b'(' | b'[' | b'{' | b'<' => depth += 1,
                    b')' | b']' | b'}' | b'>' => {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    },
                    b',' | b';' | b'\n' if depth == 0 => break,
                    b'=' if depth == 0 => break,
                    _ => {},
                }
                j += 1;
            }
            if out.last() == Some(&b' ') {
                out.pop();
            }
            i = j;
            continue;
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).expect("byte edits preserve utf8 boundaries")
}

/// Remove non-null assertions: a `!` that follows a value position and is
/// not part of `!=`. `!` inside string literals is never touched.
fn strip_non_null_assertions(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_string(bytes, i);
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if let Some(end) = skip_comment(bytes, i) {
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if c == b'!'
            && bytes.get(i + 1) != Some(&b'=')
            && out
                .last()
                .is_some_and(|p| is_ident_char(*p) || *p == b')' || *p == b']')
        {
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).expect("byte edits preserve utf8 boundaries")
}

/// Collapse runs of two or more spaces outside string literals.
fn collapse_spaces(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_string(bytes, i);
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if c == b' ' {
            // Leading indentation survives; interior runs collapse.
            let at_line_start = out.last().is_none_or(|p| *p == b'\n');
            let mut j = i;
            while j < bytes.len() && bytes[j] == b' ' {
                j += 1;
            }
            if at_line_start {
                out.extend_from_slice(&bytes[i..j]);
            } else {
                out.push(b' ');
            }
            i = j;
            continue;
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8(out).expect("byte edits preserve utf8 boundaries")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::strip_types;

    #[test]
    fn test_removes_interfaces() {
        let source = "interface Point {\n  x: number;\n  y: number;\n}\nconst p = { x: 1, y: 2 };";
        assert_eq!(strip_types(source), "const p = { x: 1, y: 2 };");
        let exported = "export interface Nested { inner: { deep: { a: string } } }\nlet ok = true;";
        assert_eq!(strip_types(exported), "let ok = true;");
    }

    #[test]
    fn test_removes_type_aliases() {
        let source = "type Id = string;\nexport type Pair<A, B> = { first: A; second: B };\ntype U = \"a\" | \"b\" | { nested: true };\nconst x = 1;";
        assert_eq!(strip_types(source), "const x = 1;");
    }

    #[test]
    fn test_import_type_handling() {
        let source = "import type { Foo } from \"./foo\";\nimport { run, type Opts, helper } from \"./run\";\nimport type Default from \"./d\";\nrun(helper);";
        let stripped = strip_types(source);
        assert!(!stripped.contains("type"));
        assert!(stripped.contains("import { run, helper } from \"./run\";"));
        assert!(stripped.contains("run(helper);"));
        assert!(!stripped.contains("./foo"));
        assert!(!stripped.contains("./d"));
    }

    #[test]
    fn test_mixed_import_reduced_to_empty_is_dropped() {
        let source = "import { type OnlyType } from \"./types\";\nconst a = 1;";
        assert_eq!(strip_types(source), "const a = 1;");
    }

    #[test]
    fn test_export_type_statement_removed() {
        let source = "export type { Foo, Bar } from \"./foo\";\nexport const live = 1;";
        assert_eq!(strip_types(source), "export const live = 1;");
    }

    #[test]
    fn test_declare_and_overloads_removed() {
        let source = "declare const VERSION: string;\ndeclare function ambient(x: number): void;\nfunction pick(a: string): string;\nfunction pick(a: number): number;\nfunction pick(a) {\n  return a;\n}";
        let stripped = strip_types(source);
        assert!(!stripped.contains("declare"));
        assert!(!stripped.contains("ambient"));
        assert_eq!(stripped.matches("function pick").count(), 1);
        assert!(stripped.contains("function pick(a) {"));
    }

    #[test]
    fn test_class_modifiers_and_implements() {
        let source = "abstract class Base implements Runnable, Closeable {\n  private count = 0;\n  protected readonly name = \"base\";\n  public run() {\n    return this.count;\n  }\n  abstract stop(): void;\n}";
        let stripped = strip_types(source);
        assert!(stripped.starts_with("class Base {"));
        assert!(!stripped.contains("implements"));
        assert!(!stripped.contains("private"));
        assert!(!stripped.contains("readonly"));
        assert!(!stripped.contains("abstract"));
        assert!(!stripped.contains("stop"));
        assert!(stripped.contains("run() {"));
    }

    #[test]
    fn test_parameter_and_return_annotations() {
        let source = "function add(a: number, b: number): number {\n  return a + b;\n}";
        assert_eq!(strip_types(source), "function add(a, b) {\n  return a + b;\n}");
    }

    #[test]
    fn test_optional_and_default_parameters() {
        let source = "function greet(name?: string, punct: string = \"!\") {\n  return name + punct;\n}";
        assert_eq!(
            strip_types(source),
            "function greet(name, punct = \"!\") {\n  return name + punct;\n}"
        );
    }

    #[test]
    fn test_this_parameter_stripped() {
        let source = "function tagged(this: Window, event: Event): void {\n  handle(event);\n}";
        assert_eq!(strip_types(source), "function tagged(event) {\n  handle(event);\n}");
    }

    #[test]
    fn test_arrow_function_annotations() {
        let source = "const double = (n: number): number => n * 2;";
        assert_eq!(strip_types(source), "const double = (n) => n * 2;");
    }

    #[test]
    fn test_generics_stripped_at_depth() {
        let source = "function wrap<T extends Map<string, Array<number>>>(value: T): T {\n  return value;\n}\nclass Box<T> {\n  value;\n}\nconst out = wrap<Map<string, Array<number>>>(new Map());";
        let stripped = strip_types(source);
        assert!(stripped.contains("function wrap(value) {"));
        assert!(stripped.contains("class Box {"));
        assert!(stripped.contains("const out = wrap(new Map());"));
    }

    #[test]
    fn test_assertions() {
        let source = "const a = value as string;\nconst b = value as { deep: { shape: number } };\nconst c = <HTMLInputElement>element;\nconst d = input!.value;\nconst tuple = [1, 2] as const;";
        let stripped = strip_types(source);
        assert!(stripped.contains("const a = value;"));
        assert!(stripped.contains("const b = value;"));
        assert!(stripped.contains("const c = element;"));
        assert!(stripped.contains("const d = input.value;"));
        assert!(stripped.contains("[1, 2] as const;"));
    }

    #[test]
    fn test_import_renames_survive() {
        let source =
            "import { foo as bar } from \"./m\";\nexport { bar as baz };\nconst x = bar;";
        let stripped = strip_types(source);
        assert!(stripped.contains("import { foo as bar } from \"./m\";"));
        assert!(stripped.contains("export { bar as baz };"));
        assert!(stripped.contains("const x = bar;"));
    }

    #[test]
    fn test_destructured_params_keep_renames() {
        let source = "function pick({ value: renamed }: Opts) {\n  return renamed;\n}";
        assert_eq!(
            strip_types(source),
            "function pick({ value: renamed }) {\n  return renamed;\n}"
        );
    }

    #[test]
    fn test_satisfies_stripped() {
        let source = "const config = { retries: 3 } satisfies RetryConfig;";
        assert_eq!(strip_types(source), "const config = { retries: 3 };");
    }

    #[test]
    fn test_bang_inside_strings_survives() {
        let source = "const msg = \"hello!\";\nconst tpl = `wow! ${x!}`;\nconst keep = a !== b;\nconst also = !flag;";
        let stripped = strip_types(source);
        assert!(stripped.contains("\"hello!\""));
        assert!(stripped.contains("`wow! ${x!}`"));
        assert!(stripped.contains("a !== b"));
        assert!(stripped.contains("!flag"));
    }

    #[test]
    fn test_variable_annotations() {
        let source = "const n: number = 1;\nlet s: string = \"two\";\nvar wide: Array<string> = [];";
        let stripped = strip_types(source);
        assert!(stripped.contains("const n = 1;"));
        assert!(stripped.contains("let s = \"two\";"));
        assert!(stripped.contains("var wide = [];"));
    }

    #[test]
    fn test_ternaries_in_calls_survive() {
        let source = "log(flag ? \"yes\" : \"no\");\nif (a ? b : c) {\n  go();\n}";
        let stripped = strip_types(source);
        assert!(stripped.contains("log(flag ? \"yes\" : \"no\");"));
        assert!(stripped.contains("if (a ? b : c) {"));
    }

    #[test]
    fn test_whitespace_cleanup() {
        let source = "interface Gone {}\n\n\n\n\nconst kept =    1;\n";
        let stripped = strip_types(source);
        assert!(!stripped.contains("\n\n\n"));
        assert!(stripped.contains("const kept = 1;"));
        assert_eq!(stripped, stripped.trim());
    }

    #[test]
    fn test_realistic_module_round_trip() {
        let source = r#"import { serve, type Handler } from "./serve";
import type { Env } from "./env";

interface RequestShape {
  url: string;
  retries?: number;
}

type Result<T> = { ok: true; value: T } | { ok: false; error: string };

export function handler(req: RequestShape, env: Env): Result<string> {
  const url: string = req.url!;
  const retries = (req.retries ?? 0) as number;
  return { ok: true, value: url + retries } as Result<string>;
}

serve(handler);
"#;
        let stripped = strip_types(source);
        assert!(stripped.contains("import { serve } from \"./serve\";"));
        assert!(!stripped.contains("Env"));
        assert!(!stripped.contains("interface"));
        assert!(!stripped.contains("Result"));
        assert!(stripped.contains("export function handler(req, env) {"));
        assert!(stripped.contains("const url = req.url;"));
        assert!(stripped.contains("const retries = (req.retries ?? 0);"));
        assert!(stripped.contains("return { ok: true, value: url + retries };"));
        assert!(stripped.contains("serve(handler);"));
    }
}
