//! Secret masking for log output.
//!
//! Upstream URLs carry tokens in the query string; error messages carry the
//! URL. Redaction happens at the point the URL is attached to an error, not
//! at the logging layer, so no call site can forget it.

const SECRET_QUERY_KEYS: [&str; 6] = ["key", "token", "pass", "password", "secret", "access_token"];

/// Mask the values of secret-looking query parameters, keep everything else.
pub fn redact_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let masked: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((k, _)) if is_secret_key(k) => format!("{k}=***"),
            _ => pair.to_string(),
        })
        .collect();

    format!("{base}?{}", masked.join("&"))
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_QUERY_KEYS.iter().any(|s| lower.contains(s))
}

/// Mask all but the first and last character of a secret value for display.
pub fn mask_secret(value: &str) -> String {
    let n = value.chars().count();
    if n <= 4 {
        return "***".to_string();
    }
    let first = value.chars().next().unwrap_or('*');
    let last = value.chars().last().unwrap_or('*');
    format!("{first}***{last}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_token_values_keeps_rest() {
        let url = "https://pos.local/resto/api/products?key=abc123&includeDeleted=false";
        assert_eq!(
            redact_url(url),
            "https://pos.local/resto/api/products?key=***&includeDeleted=false"
        );
    }

    #[test]
    fn url_without_query_is_unchanged() {
        let url = "https://pos.local/resto/api/logout";
        assert_eq!(redact_url(url), url);
    }

    #[test]
    fn masks_access_token_case_insensitively() {
        let url = "https://fin.example/v1/deals?Access_Token=xyz";
        assert_eq!(redact_url(url), "https://fin.example/v1/deals?Access_Token=***");
    }

    #[test]
    fn short_secrets_fully_masked() {
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret("supersecret"), "s***t");
    }
}
