//! HTML rendering with compiled askama templates.

use askama::Template;
use chorus_core::{Message, RenderError, Renderer};

/// Relayed message with its content.
pub const MESSAGE_TEMPLATE: &str = "message.html";
/// Fixed notice that ignores the message content.
pub const NOTICE_TEMPLATE: &str = "notice.html";

#[derive(Template)]
#[template(path = "message.html")]
struct MessageView<'a> {
    id: &'a str,
    content: &'a str,
    origin: &'a str,
    topic: &'a str,
    sent_at: String,
    sent_at_short: String,
}

#[derive(Template)]
#[template(path = "notice.html")]
struct NoticeView<'a> {
    id: &'a str,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage<'a> {
    ws_path: &'a str,
    strategy: &'a str,
}

/// Whether `name` is a template [`TemplateRenderer`] can render messages with.
pub fn is_known_template(name: &str) -> bool {
    matches!(name, MESSAGE_TEMPLATE | NOTICE_TEMPLATE)
}

/// Renders messages as htmx out-of-band fragments.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateRenderer;

impl Renderer for TemplateRenderer {
    fn render(&self, template: &str, message: &Message) -> Result<String, RenderError> {
        let rendered = match template {
            MESSAGE_TEMPLATE => {
                let sent_at = message.sent_at();
                MessageView {
                    id: message.id().as_str(),
                    content: message.content(),
                    origin: message.origin().connection().as_str(),
                    topic: message.origin().topic().unwrap_or_default(),
                    sent_at: sent_at.to_rfc3339(),
                    sent_at_short: sent_at.format("%H:%M:%S").to_string(),
                }
                .render()
            }
            NOTICE_TEMPLATE => NoticeView {
                id: message.id().as_str(),
            }
            .render(),
            other => return Err(RenderError::UnknownTemplate(other.to_owned())),
        };
        rendered.map_err(|error| RenderError::Template {
            name: template.to_owned(),
            message: error.to_string(),
        })
    }
}

/// Landing page wired to the WebSocket endpoint.
pub fn render_index(ws_path: &str, strategy: &str) -> Result<String, RenderError> {
    IndexPage { ws_path, strategy }
        .render()
        .map_err(|error| RenderError::Template {
            name: "index.html".into(),
            message: error.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chorus_core::ConnectionId;

    #[test]
    fn message_template_includes_content() {
        let message = Message::new(ConnectionId::new(), "hi there");
        let html = TemplateRenderer.render(MESSAGE_TEMPLATE, &message).unwrap();
        assert!(html.contains("hi there"));
        assert!(html.contains(message.id().as_str()));
        assert!(html.contains("hx-swap-oob"));
    }

    #[test]
    fn content_is_html_escaped() {
        let message = Message::new(ConnectionId::new(), "<script>alert(1)</script>");
        let html = TemplateRenderer.render(MESSAGE_TEMPLATE, &message).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&#60;script&#62;alert(1)&#60;/script&#62;"));
    }

    #[test]
    fn topic_shown_for_bus_messages() {
        let message = Message::new(ConnectionId::new(), "x").via_topic("lobby");
        let html = TemplateRenderer.render(MESSAGE_TEMPLATE, &message).unwrap();
        assert!(html.contains("#lobby"));

        let direct = Message::new(ConnectionId::new(), "x");
        let html = TemplateRenderer.render(MESSAGE_TEMPLATE, &direct).unwrap();
        assert!(!html.contains("class=\"topic\""));
    }

    #[test]
    fn notice_template_ignores_content() {
        let message = Message::new(ConnectionId::new(), "secret payload");
        let html = TemplateRenderer.render(NOTICE_TEMPLATE, &message).unwrap();
        assert!(!html.contains("secret payload"));
        assert!(html.contains("New message"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let message = Message::new(ConnectionId::new(), "x");
        assert_matches!(
            TemplateRenderer.render("missing.html", &message),
            Err(RenderError::UnknownTemplate(name)) if name == "missing.html"
        );
    }

    #[test]
    fn known_templates() {
        assert!(is_known_template(MESSAGE_TEMPLATE));
        assert!(is_known_template(NOTICE_TEMPLATE));
        assert!(!is_known_template("index.html"));
    }

    #[test]
    fn index_page_points_at_ws() {
        let html = render_index("/ws", "direct").unwrap();
        assert!(html.contains("ws-connect=\"/ws\""));
        assert!(html.contains("relay: direct"));
    }
}
