//! Upstream endpoint configuration shared by both connector variants.

use url::Url;

/// Host, port, path and basic-auth credentials for one upstream endpoint.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub username: String,
    pub password: String,
}

impl HttpConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Build the request URL. Port 443 selects https, anything else http.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.port == 443 { "https" } else { "http" };
        Url::parse(&format!(
            "{}://{}:{}{}",
            scheme, self.host, self.port, self.path
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_on_port_443() {
        let config = HttpConfig::new("feed.example.com", 443, "/content/notifications", "u", "p");
        let url = config.url().unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.path(), "/content/notifications");
    }

    #[test]
    fn test_http_on_other_ports() {
        let config = HttpConfig::new("localhost", 8080, "/feed", "u", "p");
        let url = config.url().unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(8080));
    }
}
