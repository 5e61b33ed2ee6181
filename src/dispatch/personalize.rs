// ABOUTME: Message personalization with double-brace token substitution
// ABOUTME: Unresolved tokens stay literal and are reported as warnings, never failures

use serde_json::Value;

use crate::model::VariableBag;

/// Result of rendering one string: the output plus any tokens that had
/// no value in the bag.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub unresolved: Vec<String>,
}

/// Substitute `{{token}}` occurrences from the variable bag. Tokens with
/// no value are left in place so the outbound message shows what was
/// missing instead of dropping content.
pub fn render(template: &str, variables: &VariableBag) -> Rendered {
    let mut text = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        text.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let token = after_open[..close].trim();
                match variables.get(token) {
                    Some(value) => text.push_str(&VariableBag::value_to_string(value)),
                    None => {
                        text.push_str(&rest[open..open + 2 + close + 2]);
                        unresolved.push(token.to_string());
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated token, keep the remainder as-is
                text.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    text.push_str(rest);

    Rendered { text, unresolved }
}

/// Recursively render every string inside a JSON value. Used to
/// personalize action configs before dispatch.
pub fn render_json(value: &Value, variables: &VariableBag, unresolved: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => {
            let rendered = render(s, variables);
            unresolved.extend(rendered.unresolved);
            Value::String(rendered.text)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_json(item, variables, unresolved))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_json(v, variables, unresolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}
