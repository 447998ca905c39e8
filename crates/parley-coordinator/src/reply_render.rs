//! Converts a [`FeedbackResult`] into blocks a tool caller can return.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::warn;

use crate::types::{ContentItem, FeedbackResult};

pub const NO_FEEDBACK_MESSAGE: &str = "[User provided no feedback]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedBlock {
    Text(String),
    Image { data: Vec<u8>, format: String },
}

/// Renders every usable item in order.
///
/// Blank text and incomplete image or file items are skipped; an image whose
/// payload does not decode becomes a visible note. When nothing is left the
/// single [`NO_FEEDBACK_MESSAGE`] block is returned.
pub fn render_reply(result: &FeedbackResult) -> Vec<RenderedBlock> {
    let mut blocks = Vec::with_capacity(result.content.len());
    for item in &result.content {
        match item {
            ContentItem::Text { text } => {
                if !text.is_empty() {
                    blocks.push(RenderedBlock::Text(text.clone()));
                }
            }
            ContentItem::Image { data, mime_type } => {
                if data.is_empty() || mime_type.is_empty() {
                    continue;
                }
                match STANDARD.decode(data.as_bytes()) {
                    Ok(bytes) => blocks.push(RenderedBlock::Image {
                        data: bytes,
                        format: image_format(mime_type),
                    }),
                    Err(error) => {
                        warn!(
                            reason_code = "reply_image_decode_failed",
                            task_id = %result.task_id,
                            mime_type = %mime_type,
                            error = %error,
                            "image payload could not be decoded"
                        );
                        blocks.push(RenderedBlock::Text(format!(
                            "[Image processing failed: {mime_type}]"
                        )));
                    }
                }
            }
            ContentItem::FileReference { display_name, path } => {
                if !display_name.is_empty() && !path.is_empty() {
                    blocks.push(RenderedBlock::Text(format!(
                        "Referenced File: {display_name} [Path: {path}]"
                    )));
                }
            }
            ContentItem::Error {
                reason_code,
                message,
            } => blocks.push(RenderedBlock::Text(format!(
                "[Error: {reason_code}] {message}"
            ))),
        }
    }
    if blocks.is_empty() {
        blocks.push(RenderedBlock::Text(NO_FEEDBACK_MESSAGE.to_string()));
    }
    blocks
}

fn image_format(mime_type: &str) -> String {
    let subtype = mime_type
        .rsplit('/')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();
    if subtype == "jpeg" {
        "jpg".to_string()
    } else {
        subtype
    }
}
