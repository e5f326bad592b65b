//! Structured Output
//!
//! `generate_object::<T>` asks a provider for a JSON object matching the
//! schema derived from `T` and deserializes the reply into `T`.
//!
//! Providers with a native response format get a strict `json_schema`
//! request; the others receive a single tool whose input is the object and
//! are forced to call it. Replies that do not parse are reported as
//! `LlmError::ParseError`; nothing is repaired.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::provider::LlmProvider;
use crate::types::{
    LlmError, LlmRequestOptions, LlmResult, Message, ResponseFormat, ToolCallMode, ToolDefinition,
};

/// JSON schema for `T`, normalized for strict structured output.
pub fn strict_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    make_strict(&mut value);
    value
}

/// Every object closes `additionalProperties` and requires all its properties.
fn make_strict(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(props) = map.get("properties").and_then(|p| p.as_object()) {
                let keys: Vec<serde_json::Value> =
                    props.keys().map(|k| serde_json::json!(k)).collect();
                map.insert("required".into(), serde_json::Value::Array(keys));
                map.insert("additionalProperties".into(), serde_json::json!(false));
            }
            if matches!(map.get("format"), Some(serde_json::Value::String(_))) {
                map.remove("format");
            }
            for child in map.values_mut() {
                make_strict(child);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                make_strict(item);
            }
        }
        _ => {}
    }
}

/// Generate a structured object of type `T`.
pub async fn generate_object<T>(
    provider: &dyn LlmProvider,
    schema_name: &str,
    system: Option<String>,
    messages: Vec<Message>,
) -> LlmResult<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = strict_schema_for::<T>();

    if provider.supports_response_format() {
        let options = LlmRequestOptions {
            response_format: Some(ResponseFormat::JsonSchema {
                name: schema_name.to_string(),
                schema,
                strict: true,
            }),
            ..Default::default()
        };
        let response = provider.send_message(messages, system, vec![], options).await?;
        let text = response.content.ok_or_else(|| LlmError::ParseError {
            message: format!("{}: empty structured reply", schema_name),
        })?;
        return serde_json::from_str(&text).map_err(|e| LlmError::ParseError {
            message: format!("{}: {}", schema_name, e),
        });
    }

    let tool = ToolDefinition::new(
        schema_name,
        format!("Return the {} result.", schema_name),
        schema,
    );
    let options = LlmRequestOptions {
        tool_call_mode: ToolCallMode::Required,
        ..Default::default()
    };
    let response = provider
        .send_message(messages, system, vec![tool], options)
        .await?;
    let call = response
        .tool_calls
        .into_iter()
        .find(|c| c.name == schema_name)
        .ok_or_else(|| LlmError::MissingToolCall {
            message: format!("expected a {} call", schema_name),
        })?;
    serde_json::from_value(call.arguments).map_err(|e| LlmError::ParseError {
        message: format!("{}: {}", schema_name, e),
    })
}
