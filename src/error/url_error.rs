/// Indicates the specific cause of a URL error.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum UrlError {
    /// The URL failed to parse.
    #[error("{0}")]
    Parse(#[from] url::ParseError),
    /// The URL scheme is not `http`, `https`, `ws` or `wss`.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    /// The URL does not contain a host name.
    #[error("No host name in the URL")]
    NoHostName,
    /// The URL does not resolve to a port to connect to.
    #[error("No port in the URL")]
    NoPort,
    /// `wss` URLs need TLS, which is not wired into this transport.
    #[error("TLS support not compiled in")]
    TlsNotSupported,
}
