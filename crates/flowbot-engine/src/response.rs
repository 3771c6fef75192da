use flowbot_core::MediaItem;
use serde_json::json;

/// The single payload a run hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Button { text: String, buttons: Vec<String> },
    Media { text: String, images: Vec<MediaItem> },
}

/// Buttons shown by a paused button node.
#[derive(Debug, Clone, PartialEq)]
pub struct ButtonPayload {
    pub text: String,
    pub buttons: Vec<String>,
}

impl Reply {
    /// Pick the reply shape for what a run produced.
    ///
    /// Buttons beat media, media beats plain text, and an empty run gets
    /// the fallback text.
    pub fn assemble(
        messages: &[String],
        media: Vec<MediaItem>,
        buttons: Option<ButtonPayload>,
        fallback: &str,
    ) -> Self {
        if let Some(b) = buttons {
            return Self::Button {
                text: b.text,
                buttons: b.buttons,
            };
        }
        let text = messages.join("\n");
        if !media.is_empty() {
            return Self::Media {
                text,
                images: media,
            };
        }
        if !text.is_empty() {
            return Self::Text(text);
        }
        Self::Text(fallback.to_string())
    }

    /// Render the `reply` field of the HTTP response.
    ///
    /// Plain text goes out as-is; structured replies are JSON encoded into the string.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Button { text, buttons } => json!({
                "type": "button",
                "text": text,
                "buttons": buttons,
            })
            .to_string(),
            Self::Media { text, images } => json!({
                "type": "media",
                "text": text,
                "images": images
                    .iter()
                    .map(|m| json!({"type": "image", "url": m.url, "caption": m.caption}))
                    .collect::<Vec<_>>(),
            })
            .to_string(),
        }
    }
}
