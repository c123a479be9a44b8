use crate::error::ProxyError;
use crate::handler::RewritingProxy;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use rustls::ServerConfig;
use std::convert::Infallible;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Loads a rustls server config from PEM certificate and key files.
pub fn load_tls_config(private_key_path: &str, cert_path: &str) -> Result<ServerConfig, ProxyError> {
    let mut private_key_file = BufReader::new(
        File::open(private_key_path)
            .map_err(|e| ProxyError::Config(format!("Failed to open private key file: {}", e)))?,
    );
    let mut cert_file = BufReader::new(
        File::open(cert_path)
            .map_err(|e| ProxyError::Config(format!("Failed to open certificate file: {}", e)))?,
    );

    let certs = rustls_pemfile::certs(&mut cert_file)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Config(format!("Failed to read certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(ProxyError::Config("No valid certificate found".to_string()));
    }

    let private_key = rustls_pemfile::private_key(&mut private_key_file)
        .map_err(|e| ProxyError::Config(format!("Failed to read private key: {}", e)))?
        .ok_or_else(|| ProxyError::Config("No valid private key found".to_string()))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .map_err(|e| ProxyError::Config(format!("Failed to create TLS config: {}", e)))
}

pub struct ProxyServer {
    handler: Arc<RewritingProxy>,
    addr: SocketAddr,
    private_key: Option<String>,
    certificate: Option<String>,
}

impl ProxyServer {
    pub fn new(handler: RewritingProxy) -> Self {
        let config = handler.config();
        let addr = config.listen_addr;
        let private_key = config.private_key.clone();
        let certificate = config.certificate.clone();
        Self {
            handler: Arc::new(handler),
            addr,
            private_key,
            certificate,
        }
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), ProxyError> {
        match (self.private_key.as_deref(), self.certificate.as_deref()) {
            (Some(private_key_path), Some(cert_path)) => {
                info!("Enabling HTTPS/TLS mode");
                debug!("Loading TLS certificate from: {}", cert_path);
                debug!("Loading TLS private key from: {}", private_key_path);
                let tls_config = load_tls_config(private_key_path, cert_path)?;
                let acceptor = TlsAcceptor::from(Arc::new(tls_config));

                let listener = TcpListener::bind(self.addr).await?;
                info!("Rewriting proxy listening on: https://{}", self.addr);

                loop {
                    let (tcp_stream, remote_addr) = listener.accept().await?;
                    let acceptor = acceptor.clone();
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        match acceptor.accept(tcp_stream).await {
                            Ok(tls_stream) => serve_connection(tls_stream, handler, remote_addr).await,
                            Err(e) => warn!("Error establishing TLS connection from {}: {}", remote_addr, e),
                        }
                    });
                }
            }
            _ => {
                let listener = TcpListener::bind(self.addr).await?;
                info!("Rewriting proxy listening on: http://{}", self.addr);

                loop {
                    let (stream, remote_addr) = listener.accept().await?;
                    let handler = self.handler.clone();
                    tokio::spawn(serve_connection(stream, handler, remote_addr));
                }
            }
        }
    }
}

async fn serve_connection<S>(stream: S, handler: Arc<RewritingProxy>, remote_addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(req).await) }
    });

    if let Err(e) = ServerBuilder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        error!("Error serving connection from {}: {}", remote_addr, e);
    }
}
