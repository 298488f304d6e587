//! Frame transport seams between the session tasks and the socket.
//!
//! The reader and writer only see [`FrameSource`] and [`FrameSink`]; axum's
//! split WebSocket halves implement them for production, and tests drive
//! sessions over in-memory channels.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use chorus_core::{Frame, TransportError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

/// Inbound half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, a transport error, or `None` at end of stream.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Outbound half of a connection. Owned by the writer task alone.
#[async_trait]
pub trait FrameSink: Send {
    /// Transmit one frame.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send a close frame and release the stream.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl FrameSource for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        match self.next().await? {
            Ok(message) => Some(Ok(from_ws(message))),
            Err(error) => Some(Err(TransportError::Read(error.to_string()))),
        }
    }
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, WsMessage> {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.send(to_ws(frame))
            .await
            .map_err(|error| TransportError::Write(error.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self)
            .await
            .map_err(|error| TransportError::Write(error.to_string()))
    }
}

fn from_ws(message: WsMessage) -> Frame {
    match message {
        WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        WsMessage::Binary(data) => Frame::Binary(data),
        WsMessage::Ping(data) => Frame::Ping(data),
        WsMessage::Pong(data) => Frame::Pong(data),
        WsMessage::Close(_) => Frame::Close,
    }
}

fn to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Binary(data) => WsMessage::Binary(data),
        Frame::Ping(data) => WsMessage::Ping(data),
        Frame::Pong(data) => WsMessage::Pong(data),
        Frame::Close => WsMessage::Close(None),
    }
}
