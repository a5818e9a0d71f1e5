use std::sync::OnceLock;

use gust_core::prelude::RuntimeError;
use gust_plan::prelude::BodyTemplate;
use regex::Regex;

use crate::store::{UserContext, VariableStore};

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{(\w+)\}").expect("placeholder pattern is valid"))
}

/// Substitutes every `${name}` in `template` through the variable store. Resolution is read
/// only; a placeholder that no tier can satisfy fails the whole render with
/// [`RuntimeError::UnresolvedVariable`], which is fatal to the current request.
pub fn render_text(
    template: &str,
    store: &VariableStore,
    user: &UserContext,
) -> Result<String, RuntimeError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder().captures_iter(template) {
        let full = caps.get(0).expect("group 0 always matches");
        rendered.push_str(&template[last..full.start()]);
        let resolved = store.resolve(&caps[1], user)?;
        rendered.push_str(&resolved.value.to_string());
        last = full.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// Renders a body template. JSON bodies are walked recursively and substitution happens in
/// string leaves, so structure and non-string values pass through untouched.
pub fn render_body(
    body: &BodyTemplate,
    store: &VariableStore,
    user: &UserContext,
) -> Result<BodyTemplate, RuntimeError> {
    match body {
        BodyTemplate::Text(text) => Ok(BodyTemplate::Text(render_text(text, store, user)?)),
        BodyTemplate::Json(value) => Ok(BodyTemplate::Json(render_json(value, store, user)?)),
    }
}

fn render_json(
    value: &serde_json::Value,
    store: &VariableStore,
    user: &UserContext,
) -> Result<serde_json::Value, RuntimeError> {
    Ok(match value {
        serde_json::Value::String(s) => serde_json::Value::String(render_text(s, store, user)?),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| render_json(item, store, user))
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_json(v, store, user)?)))
                .collect::<Result<_, RuntimeError>>()?,
        ),
        other => other.clone(),
    })
}
