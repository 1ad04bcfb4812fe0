//! Collaborator endpoint URLs and error-body excerpts.

use thiserror::Error;

/// Longest excerpt of a remote error body carried into error messages.
const EXCERPT_CHARS: usize = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("{0} URL must not be empty")]
    Empty(&'static str),
    #[error("{0} URL must include http:// or https://")]
    NotHttp(&'static str),
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Validate a collaborator base URL named `name` and strip trailing slashes.
pub fn endpoint_url(raw: &str, name: &'static str) -> Result<String, EndpointError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EndpointError::Empty(name));
    }
    if !is_http_url(trimmed) {
        return Err(EndpointError::NotHttp(name));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Single-line excerpt of a response body: whitespace runs collapse to one
/// space and the result is cut to a bounded number of characters.
pub fn response_excerpt(body: &str) -> String {
    body.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(EXCERPT_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn endpoint_url_trims_and_strips_trailing_slash() {
        assert_eq!(
            endpoint_url("  https://www.googleapis.com/notes/v1/ ", "notes API").unwrap(),
            "https://www.googleapis.com/notes/v1"
        );
    }

    #[test]
    fn endpoint_url_names_the_rejected_endpoint() {
        assert_eq!(endpoint_url("  ", "auth"), Err(EndpointError::Empty("auth")));
        let error = endpoint_url("android.clients.google.com/auth", "auth").unwrap_err();
        assert_eq!(error, EndpointError::NotHttp("auth"));
        assert_eq!(error.to_string(), "auth URL must include http:// or https://");
    }

    #[test]
    fn excerpt_flattens_html_error_pages() {
        let body = "<html>\n  <body>\n    Error 404 (Not Found)\n  </body>\n</html>\n";
        assert_eq!(
            response_excerpt(body),
            "<html> <body> Error 404 (Not Found) </body> </html>"
        );
        assert_eq!(response_excerpt(&"x ".repeat(500)).chars().count(), EXCERPT_CHARS);
    }
}
