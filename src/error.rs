//! Pipeline error types and their mapping onto synthetic client responses.

use bytes::Bytes;
use thiserror::Error;

use crate::http::error_page;

/// Everything that can end a connection's pipeline early.
///
/// Only some variants owe the client a response: protocol-level rejections
/// happen before any response bytes have been sent, so a synthetic page is
/// safe. I/O and timeout failures can strike mid-stream, where injecting a
/// page would corrupt whatever was already written, so those close the
/// connection silently.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The client connected and went away without a request.
    #[error("client closed without sending a request")]
    ClientGone,

    /// Request head that never parsed, or grew past the request bound.
    #[error("malformed request")]
    BadRequest,

    /// Non-GET method, or a URI asking for https.
    #[error("unsupported request: {0}")]
    Unsupported(String),

    /// The origin could not be reached.
    #[error("could not reach {host}:{port}")]
    DialFailed { host: String, port: u16 },

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

impl ProxyError {
    /// The synthetic response owed to the client, if any.
    pub fn error_page(&self) -> Option<Bytes> {
        match self {
            ProxyError::BadRequest => Some(error_page(
                501,
                "Not Implemented",
                "request",
                "Tiny could not parse this request",
            )),
            ProxyError::Unsupported(what) => Some(error_page(
                501,
                "Not Implemented",
                what,
                "Tiny does not implement this method",
            )),
            ProxyError::DialFailed { host, .. } => Some(error_page(
                404,
                "Not Found",
                host,
                "Tiny could not reach the origin server",
            )),
            ProxyError::ClientGone | ProxyError::Io(_) | ProxyError::Timeout(_) => None,
        }
    }
}
