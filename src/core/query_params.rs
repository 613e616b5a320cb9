use std::borrow::Cow;
use std::collections::HashMap;

/// Parse query parameters from a URI string.
///
/// Values are percent-decoded (`+` is not treated as a space). A repeated key keeps
/// its last value; a key without `=` maps to an empty string.
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    let Some((_, query)) = uri.split_once('?') else {
        return params;
    };

    for param in query.split('&').filter(|p| !p.is_empty()) {
        match param.split_once('=') {
            Some((key, value)) => {
                params.insert(key.to_string(), decode(value));
            }
            None => {
                params.insert(param.to_string(), String::new());
            }
        }
    }

    params
}

/// Percent-decodes a path segment or query value, keeping the raw text when it is not valid UTF-8.
pub fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .unwrap_or(Cow::Borrowed(raw))
        .into_owned()
}

/// Non-blank string parameter.
pub fn get_string(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
