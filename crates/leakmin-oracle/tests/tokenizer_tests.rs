use leakmin_oracle::imports::{imports_recovered, strip_imports};
use leakmin_oracle::{check_round_trip, CharTokenizer, LexicalTokenizer, Tokenizer, TokenizerKind};

const CORPUS: &[&str] = &[
    "",
    "public class Foo {}",
    "import java.util.List;\n\npublic class Foo {\n    List<String> xs = new ArrayList<>();\n}\n",
    "class A { void f() { String s = \"tab\\t and \\\"quote\\\"\"; char c = '\\n'; } }",
    "/** Javadoc\n * with stars\n */\n@Override\npublic int hashCode() { return 31 * x >>> 2; }",
    "var fn = (a, b) -> a.compareTo(b); Map.Entry::getKey;",
    "String block = \"\"\"\n    text block\n    \"\"\";",
    "int x = 0x1F + 1_000L - 3.5e-2f; // trailing comment",
    "\r\n\tmixed\r\nline endings\r\n",
    "Unicode: Grüße, λ-expr, 日本語, emoji 🦀",
    "unterminated \"string\nand /* comment",
];

fn tokenizers() -> Vec<Box<dyn Tokenizer>> {
    vec![
        Box::new(CharTokenizer),
        Box::new(LexicalTokenizer::new()),
        TokenizerKind::Lexical.build(),
    ]
}

#[test]
fn test_round_trip_holds_for_corpus() {
    for tokenizer in tokenizers() {
        for text in CORPUS {
            let ids = check_round_trip(tokenizer.as_ref(), text)
                .unwrap_or_else(|e| panic!("{}: {e}", tokenizer.name()));
            assert_eq!(tokenizer.decode(&ids), *text);
        }
    }
}

#[test]
fn test_subsequence_of_ids_decodes_to_concatenated_lexemes() {
    let tokenizer = LexicalTokenizer::new();
    let ids = tokenizer.encode("List<String> xs;");
    // Drop the type arguments.
    let kept: Vec<u32> = [0usize, 4, 5, 6].iter().map(|&i| ids[i]).collect();
    assert_eq!(tokenizer.decode(&kept), "List xs;");
}

#[test]
fn test_lexical_is_coarser_than_char() {
    let text = CORPUS[2];
    let lexical = LexicalTokenizer::new().encode(text).len();
    let chars = CharTokenizer.encode(text).len();
    assert!(lexical < chars, "lexical {lexical} vs char {chars}");
}

#[test]
fn test_stripped_snippet_recovery_round_trip() {
    let (code, fqns) = strip_imports(CORPUS[2]);
    assert!(!code.contains("import"));
    assert!(imports_recovered(&fqns, CORPUS[2]));
}
