use serde_json::{json, Map, Value};

use crate::error_handling::{categorize_reqwest_error, ProbeError, TransportError};
use crate::models::Target;

use super::endpoint_of;

pub(super) async fn probe(client: &reqwest::Client, target: &Target) -> Result<Value, ProbeError> {
    let (port, scheme) = endpoint_of(target)?;
    let url = format!("{scheme}://{}:{port}/", target.host());

    let response = client.get(&url).send().await.map_err(|e| {
        match categorize_reqwest_error(&e) {
            TransportError::Connect(msg) | TransportError::Timeout(msg) => {
                ProbeError::Unreachable(format!("{url}: {msg}"))
            }
            other => ProbeError::Failed(format!("{url}: {other}")),
        }
    })?;

    let mut headers = Map::new();
    for (name, value) in response.headers() {
        // Repeated headers: the first occurrence wins, as browsers do for these
        if headers.contains_key(name.as_str()) {
            continue;
        }
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers.insert(name.as_str().to_string(), Value::String(value));
    }

    Ok(json!({
        "scheme": scheme,
        "status": response.status().as_u16(),
        "headers": headers,
    }))
}
