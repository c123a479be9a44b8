use hyper::StatusCode;
use thiserror::Error;

use crate::fetcher::RedirectHop;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Redirect limit of {limit} exceeded after {} hops", chain.len())]
    RedirectLimitExceeded { limit: usize, chain: Vec<RedirectHop> },

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream denied {url} with status {status}")]
    UpstreamDenied {
        status: StatusCode,
        url: String,
        snippet: String,
    },

    #[error("Rewrite error: {0}")]
    Rewrite(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ProxyError {
    /// Status code the client sees for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingParameter(_) | ProxyError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            ProxyError::RedirectLimitExceeded { .. } | ProxyError::UpstreamUnreachable(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::UpstreamDenied { status, .. } => *status,
            ProxyError::Url(_) => StatusCode::BAD_REQUEST,
            ProxyError::Rewrite(_)
            | ProxyError::Config(_)
            | ProxyError::Io(_)
            | ProxyError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body describing the failure.
    pub fn diagnostic(&self) -> String {
        match self {
            ProxyError::RedirectLimitExceeded { chain, .. } => {
                let mut body = self.to_string();
                for (i, hop) in chain.iter().enumerate() {
                    body.push_str(&format!(
                        "\n  {}. {} {} -> {}",
                        i + 1,
                        hop.status.as_u16(),
                        hop.url,
                        hop.location
                    ));
                }
                body
            }
            ProxyError::UpstreamDenied { snippet, .. } if !snippet.is_empty() => {
                format!("{}\n\n{}", self, snippet)
            }
            _ => self.to_string(),
        }
    }
}
