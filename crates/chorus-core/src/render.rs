//! Injected render capability.

use crate::errors::RenderError;
use crate::message::Message;

/// Turns a message into outbound frame text using a named template.
///
/// Implementations are shared by every Writer task and must not hold mutable
/// global state.
pub trait Renderer: Send + Sync {
    /// Render `message` with the template registered as `template`.
    fn render(&self, template: &str, message: &Message) -> Result<String, RenderError>;
}
