//! In-memory transports and fixtures for session tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chorus_core::{ConnectionId, Frame, Message, RenderError, Renderer, TransportError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connection::Connection;
use super::transport::{FrameSink, FrameSource};

/// Frame source fed by the test through an unbounded channel.
pub(crate) struct ChannelSource(mpsc::UnboundedReceiver<Result<Frame, TransportError>>);

pub(crate) type SourceHandle = mpsc::UnboundedSender<Result<Frame, TransportError>>;

pub(crate) fn channel_source() -> (SourceHandle, ChannelSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelSource(rx))
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.0.recv().await
    }
}

/// Sink that records frames; clones share state.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    frames: Arc<Mutex<Vec<Frame>>>,
    fail_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    pub(crate) fn failing() -> Self {
        let sink = Self::default();
        sink.fail_writes.store(true, Ordering::SeqCst);
        sink
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn pings(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|frame| matches!(frame, Frame::Ping(_)))
            .count()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` text frames were written.
    pub(crate) async fn wait_for_texts(&self, count: usize) -> Vec<String> {
        for _ in 0..400 {
            let texts = self.texts();
            if texts.len() >= count {
                return texts;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.texts()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write("broken pipe".into()));
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Renders `plain` as the bare content; every other template fails.
pub(crate) struct PlainRenderer;

pub(crate) const PLAIN: &str = "plain";

impl Renderer for PlainRenderer {
    fn render(&self, template: &str, message: &Message) -> Result<String, RenderError> {
        if template == PLAIN {
            Ok(message.content().to_owned())
        } else {
            Err(RenderError::UnknownTemplate(template.to_owned()))
        }
    }
}

/// Renders everything except content equal to `"poison"`.
pub(crate) struct PickyRenderer;

impl Renderer for PickyRenderer {
    fn render(&self, template: &str, message: &Message) -> Result<String, RenderError> {
        if message.content() == "poison" {
            return Err(RenderError::Template {
                name: template.to_owned(),
                message: "refused".into(),
            });
        }
        Ok(message.content().to_owned())
    }
}

pub(crate) fn test_connection(capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Arc<Message>>) {
    let (tx, rx) = mpsc::channel(capacity);
    let conn = Connection::new(ConnectionId::new(), tx, CancellationToken::new());
    (Arc::new(conn), rx)
}

pub(crate) fn text(payload: &str) -> Result<Frame, TransportError> {
    Ok(Frame::Text(payload.to_owned()))
}
