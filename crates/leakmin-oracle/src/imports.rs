//! Import-statement utilities used to judge oracle responses.

use std::collections::BTreeSet;

/// Name imported by `line`, if the line is an import statement.
///
/// Both `import a.b.C;` and `import static a.b.C.m;` are recognized; the
/// trailing semicolon is optional so model output missing one still counts.
pub fn parse_import(line: &str) -> Option<String> {
    let body = line.trim().strip_prefix("import")?;
    if !body.starts_with(char::is_whitespace) {
        return None;
    }
    let mut body = body.trim_start();
    if let Some(rest) = body.strip_prefix("static") {
        if rest.starts_with(char::is_whitespace) {
            body = rest.trim_start();
        }
    }
    let name: String = body
        .split(';')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '$' | '*'));
    valid.then_some(name)
}

/// Remove every import line from `source`.
///
/// Returns the remaining code (other lines untouched, line endings kept) and
/// the imported names in order of appearance.
pub fn strip_imports(source: &str) -> (String, Vec<String>) {
    let mut code = String::with_capacity(source.len());
    let mut fqns = Vec::new();
    for line in source.split_inclusive('\n') {
        match parse_import(line) {
            Some(name) => fqns.push(name),
            None => code.push_str(line),
        }
    }
    (code, fqns)
}

/// Replace each `pkg.*` entry by every expected name declared directly in
/// `pkg`. Other names pass through.
pub fn expand_wildcards(fqns: &[String], expected: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(fqns.len());
    for fqn in fqns {
        match fqn.strip_suffix(".*") {
            Some(package) => out.extend(
                expected
                    .iter()
                    .filter(|name| name.rsplit_once('.').map(|(pkg, _)| pkg) == Some(package))
                    .cloned(),
            ),
            None => out.push(fqn.clone()),
        }
    }
    out
}

/// True when `response` imports every name in `expected`.
pub fn imports_recovered(expected: &[String], response: &str) -> bool {
    let (_, fqns) = strip_imports(response);
    let recovered: BTreeSet<String> = expand_wildcards(&fqns, expected).into_iter().collect();
    expected.iter().all(|name| recovered.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_import_variants() {
        assert_eq!(parse_import("import java.util.List;").as_deref(), Some("java.util.List"));
        assert_eq!(
            parse_import("  import static org.junit.Assert.assertEquals ;").as_deref(),
            Some("org.junit.Assert.assertEquals")
        );
        assert_eq!(parse_import("import java.io.*;").as_deref(), Some("java.io.*"));
        assert_eq!(parse_import("import a.B").as_deref(), Some("a.B"));
        assert_eq!(parse_import("importer.run();"), None);
        assert_eq!(parse_import("// import a.B;"), None);
        assert_eq!(parse_import("import ;"), None);
    }

    #[test]
    fn test_strip_imports_keeps_other_lines() {
        let source = "package p;\nimport java.util.List;\n\nclass A { List<String> xs; }\n";
        let (code, fqns) = strip_imports(source);
        assert_eq!(code, "package p;\n\nclass A { List<String> xs; }\n");
        assert_eq!(fqns, names(&["java.util.List"]));
    }

    #[test]
    fn test_expand_wildcards_matches_direct_members_only() {
        let expected = names(&["java.util.List", "java.util.concurrent.Future", "java.io.File"]);
        let expanded = expand_wildcards(&names(&["java.util.*", "java.io.File"]), &expected);
        assert_eq!(expanded, names(&["java.util.List", "java.io.File"]));
    }

    #[test]
    fn test_imports_recovered() {
        let expected = names(&["java.util.List", "java.util.Map"]);
        assert!(imports_recovered(&expected, "```java\nimport java.util.List;\nimport java.util.Map;\n```"));
        assert!(imports_recovered(&expected, "import java.util.*;"));
        assert!(!imports_recovered(&expected, "import java.util.List;"));
        assert!(!imports_recovered(&expected, ""));
        assert!(imports_recovered(&[], ""));
    }
}
