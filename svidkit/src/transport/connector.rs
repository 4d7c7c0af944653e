//! Builds a `tonic::transport::Channel` from a parsed [`Endpoint`].
//!
//! Supported transports:
//! - `unix:///path` or `unix:/path` (Unix platforms only)
//! - `tcp://1.2.3.4:port`

use std::net::IpAddr;
use std::path::Path;

use hyper_util::rt::TokioIo;
#[cfg(unix)]
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint as TonicEndpoint, Uri};
use tower::service_fn;

use crate::endpoint::Endpoint;
use crate::transport::TransportError;

// Tonic requires a URI even when a custom connector supplies the stream.
const TONIC_DUMMY_URI: &str = "http://localhost";

/// Connects to a Workload API endpoint and returns a gRPC channel.
///
/// # Errors
///
/// Returns a [`TransportError`] if the transport is unsupported on this
/// platform or the connection cannot be established.
pub async fn connect(endpoint: &Endpoint) -> Result<Channel, TransportError> {
    match endpoint {
        Endpoint::Unix(path) => connect_unix(path).await,
        Endpoint::Tcp { host, port } => connect_tcp(*host, *port).await,
    }
}

async fn connect_tcp(host: IpAddr, port: u16) -> Result<Channel, TransportError> {
    let uri = format!("http://{host}:{port}");
    Ok(TonicEndpoint::try_from(uri)?.connect().await?)
}

async fn connect_unix(path: &Path) -> Result<Channel, TransportError> {
    #[cfg(not(unix))]
    {
        let _ = path;
        Err(TransportError::UnsupportedEndpointTransport { scheme: "unix" })
    }

    #[cfg(unix)]
    {
        let path = path.to_owned();

        let channel = TonicEndpoint::try_from(TONIC_DUMMY_URI)?
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = path.clone();
                async move {
                    let stream = UnixStream::connect(&path).await?;
                    Ok::<_, std::io::Error>(TokioIo::new(stream))
                }
            }))
            .await?;

        Ok(channel)
    }
}
