//! SOCKS5 proxy connector.
//!
//! Attach a [`Socks5Config`] to [`crate::Config::proxy`] and every DC
//! connection is tunnelled through the proxy.
//!
//! # Example
//! ```rust,no_run
//! use mtp_sender::{Config, Socks5Config};
//!
//! let cfg = Config {
//!     proxy: Some(Socks5Config::new("127.0.0.1:1080")),
//!     ..Default::default()
//! };
//! ```

use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

use crate::connection::ConnectionError;

/// SOCKS5 proxy configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Socks5Config {
    /// Host:port of the SOCKS5 proxy server.
    pub proxy_addr: String,
    /// Optional username and password for proxy authentication.
    pub auth: Option<(String, String)>,
}

impl Socks5Config {
    /// Create an unauthenticated SOCKS5 config.
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Self { proxy_addr: proxy_addr.into(), auth: None }
    }

    /// Create a SOCKS5 config with username/password authentication.
    pub fn with_auth(
        proxy_addr: impl Into<String>,
        username:   impl Into<String>,
        password:   impl Into<String>,
    ) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            auth: Some((username.into(), password.into())),
        }
    }

    /// Open a TCP stream to `target` through the proxy.
    pub async fn connect(&self, target: &str) -> Result<TcpStream, ConnectionError> {
        tracing::debug!("[socks5] connecting via {} → {target}", self.proxy_addr);
        let stream = match &self.auth {
            None => Socks5Stream::connect(self.proxy_addr.as_str(), target).await?,
            Some((user, pass)) => {
                Socks5Stream::connect_with_password(
                    self.proxy_addr.as_str(),
                    target,
                    user.as_str(),
                    pass.as_str(),
                )
                .await?
            }
        };
        Ok(stream.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Accept one client, complete a no-auth handshake and return the
    /// requested target port.
    async fn fake_proxy(listener: TcpListener) -> u16 {
        let (mut s, _) = listener.accept().await.unwrap();
        let mut head = [0u8; 2];
        s.read_exact(&mut head).await.unwrap();
        assert_eq!(head[0], 5);
        let mut methods = vec![0u8; head[1] as usize];
        s.read_exact(&mut methods).await.unwrap();
        assert!(methods.contains(&0));
        s.write_all(&[5, 0]).await.unwrap();

        let mut req = [0u8; 4];
        s.read_exact(&mut req).await.unwrap();
        assert_eq!(&req[..3], &[5, 1, 0]);
        let addr_len = match req[3] {
            1 => 4,
            4 => 16,
            _ => s.read_u8().await.unwrap() as usize,
        };
        let mut addr = vec![0u8; addr_len];
        s.read_exact(&mut addr).await.unwrap();
        let port = s.read_u16().await.unwrap();

        s.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0]).await.unwrap();
        s.write_all(b"ok").await.unwrap();
        port
    }

    #[tokio::test]
    async fn tunnels_through_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Socks5Config::new(listener.local_addr().unwrap().to_string());
        let server = tokio::spawn(fake_proxy(listener));

        let mut stream = proxy.connect("149.154.167.50:443").await.unwrap();
        let mut greeting = [0u8; 2];
        stream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"ok");
        assert_eq!(server.await.unwrap(), 443);
    }

    #[tokio::test]
    async fn unreachable_proxy_is_a_proxy_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let err = Socks5Config::new(addr.to_string()).connect("149.154.167.50:443").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Proxy(_)), "{err}");
    }
}
