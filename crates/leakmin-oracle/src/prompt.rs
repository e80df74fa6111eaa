use serde_json::{json, Value};

const SYSTEM: &str = "You are a helpful programming assistant.";

const INSTRUCTION: &str = "Add import statements to the following Java code. \
Do not use wildcard imports. Include only the necessary import statements. \
Do not import nonexistent types. Please note that you need to pay close attention \
and your response should be specific and accurate. Avoid repetition. \
Reply with the import statements only.";

/// Chat messages asking for the imports of `code`.
pub fn import_prompt(code: &str) -> Value {
    json!([
        { "role": "system", "content": SYSTEM },
        { "role": "user", "content": format!("{INSTRUCTION}\n\n{code}") },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_code_after_instruction() {
        let messages = import_prompt("List<String> xs;");
        let list = messages.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["role"], "system");
        let user = list[1]["content"].as_str().unwrap();
        assert!(user.starts_with("Add import statements"));
        assert!(user.ends_with("\n\nList<String> xs;"));
    }
}
