//! Model server discovery.
//!
//! Asks the OpenAI-compatible `/v1/models` endpoint which models are
//! available so the operator learns about a missing model before the first
//! utterance instead of after it.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Return the ids of every model the server offers.
///
/// `Err(reason)` when the server is offline or answers with something other
/// than a model list.
pub fn list_models(base_url: &str, api_key: &str) -> Result<Vec<String>, String> {
    let url = format!("{}/v1/models", base_url.trim_end_matches('/'));
    let mut request = reqwest::blocking::Client::new().get(&url);
    if !api_key.is_empty() {
        request = request.bearer_auth(api_key);
    }
    let response = request
        .send()
        .map_err(|e| format!("model server unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("model server returned HTTP {}", response.status()));
    }

    let body = response
        .text()
        .map_err(|e| format!("Failed to read model list: {}", e))?;
    parse_model_list(&body)
}

fn parse_model_list(body: &str) -> Result<Vec<String>, String> {
    let list: ModelList =
        serde_json::from_str(body).map_err(|e| format!("Failed to parse model list: {}", e))?;
    Ok(list.data.into_iter().map(|m| m.id).collect())
}

/// Whether `wanted` is among `available`, ignoring an implicit `:latest` tag.
pub fn has_model(available: &[String], wanted: &str) -> bool {
    available.iter().any(|m| {
        m == wanted || m.strip_suffix(":latest") == Some(wanted)
    })
}
