use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use std::path::Path;
use tokio::net::UnixStream;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ClientError {
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Request(#[from] http::Error),

    #[error(transparent)]
    Http(#[from] hyper::Error),
}

/// Sends one HTTP/1.1 request over a unix socket and reads the full response.
pub(crate) async fn send(
    socket: &Path,
    req: http::request::Builder,
    body: Bytes,
) -> Result<(http::StatusCode, Bytes), ClientError> {
    let stream = UnixStream::connect(socket)
        .await
        .map_err(|source| ClientError::Connect {
            path: socket.display().to_string(),
            source,
        })?;
    let (mut tx, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(error) = conn.await {
            tracing::debug!(%error, "Connection closed");
        }
    });

    let req = req
        .header(http::header::HOST, "localhost")
        .body(Full::new(body))?;
    let rsp = tx.send_request(req).await?;
    let status = rsp.status();
    let body = rsp.into_body().collect().await?.to_bytes();
    Ok((status, body))
}
