//! # zapflow-providers
//!
//! Model provider implementations for zapflow.

pub mod gemini;
pub mod openai;

use zapflow_core::message::{MediaItem, MediaKind};

/// Text stand-in for a media item a provider cannot consume.
pub fn media_placeholder(item: &MediaItem) -> String {
    let label = item.kind.as_str();
    match item.caption.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => format!("[{label}] {c}"),
        _ => format!("[{label}]"),
    }
}

/// Whether an image can be sent to a remote model by reference.
pub(crate) fn is_remote_image(item: &MediaItem) -> bool {
    item.kind == MediaKind::Image
        && (item.url.starts_with("http://") || item.url.starts_with("https://"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str, caption: Option<&str>) -> MediaItem {
        MediaItem {
            kind: MediaKind::Image,
            url: url.to_string(),
            mime: None,
            caption: caption.map(str::to_string),
        }
    }

    #[test]
    fn test_media_placeholder() {
        assert_eq!(
            media_placeholder(&image("https://x/a.jpg", Some("boleto"))),
            "[image] boleto"
        );
        assert_eq!(media_placeholder(&image("a.jpg", Some("  "))), "[image]");
    }

    #[test]
    fn test_is_remote_image() {
        assert!(is_remote_image(&image("https://x/a.jpg", None)));
        assert!(!is_remote_image(&image("/tmp/a.jpg", None)));
        let audio = MediaItem {
            kind: MediaKind::Audio,
            ..image("https://x/a.ogg", None)
        };
        assert!(!is_remote_image(&audio));
    }
}
