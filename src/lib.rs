pub mod classify;
pub mod config;
pub mod config_validation;
pub mod cookies;
pub mod css;
pub mod error;
pub mod fetcher;
pub mod handler;
pub mod html;
pub mod logging;
pub mod profiles;
pub mod response;
pub mod script;
pub mod server;
pub mod transport;
pub mod url_policy;

pub use config::Config;
pub use error::ProxyError;
pub use handler::RewritingProxy;
