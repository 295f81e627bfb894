// Markdown-to-HTML rendering and its bus endpoint.
use pulldown_cmark::{Options, Parser, html};
use serde_json::Value;

use crate::bus::{EventBus, ReplyFailure, ServiceRegistration};
use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_ADDRESS: &str = "app.markdown";

pub fn render(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Request body is a markdown string; the reply is the rendered HTML string.
pub fn register(bus: &EventBus, address: &str) -> ServiceRegistration {
    ServiceRegistration::spawn(bus.consumer(address), |mut message| async move {
        match message.take_body() {
            Value::String(markdown) => {
                message.reply(Value::String(render(&markdown)));
            }
            _ => {
                let err = Error::new(ErrorKind::Usage).with_message("expected a markdown string");
                message.fail(ReplyFailure::from(&err));
            }
        }
    })
}
