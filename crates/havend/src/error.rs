use thiserror::Error;

/// Errors that can occur while serving the message bus.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The admission handshake response was malformed or invalid.
    #[error("invalid admission response")]
    InvalidAdmission,
    /// The admission timestamp is outside the acceptable window.
    #[error("admission timestamp expired")]
    TimestampExpired,
    /// Binary frame encoding or decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] haven_common::frame::FrameError),
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
}
