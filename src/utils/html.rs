use html2text::from_read;
use once_cell::sync::Lazy;
use regex::Regex;

static IMG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img\s+[^>]*alt=["']([^"']*)["'][^>]*>"#).unwrap());

/// Render a comment body to terminal text. The server sanitizes bodies down
/// to `a`, `code`, `i` and `strong`, but attachments and legacy rows can
/// still carry inline images, which become `[Image: alt]` placeholders.
pub fn comment_body_text(html: &str, width: usize) -> String {
    let with_placeholders = IMG_REGEX.replace_all(html, "[Image: $1]");
    let mut bytes = with_placeholders.as_bytes();
    from_read(&mut bytes, width.max(20))
        .unwrap_or_default()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_allowed_tags_as_text() {
        let out = comment_body_text("<strong>Bold</strong> and <i>italic</i> and <code>x</code>", 80);
        assert!(out.contains("Bold"));
        assert!(out.contains("italic"));
        assert!(out.contains("x"));
    }

    #[test]
    fn keeps_link_text() {
        let out = comment_body_text(r#"see <a href="https://example.com">the docs</a>"#, 80);
        assert!(out.contains("the docs"));
    }

    #[test]
    fn images_become_placeholders() {
        let out = comment_body_text(r#"<img src="cat.png" alt="A cat" />"#, 80);
        assert!(out.contains("[Image: A cat]"));
    }

    #[test]
    fn plain_text_survives_narrow_widths() {
        let out = comment_body_text("just words", 1);
        assert!(out.contains("just"));
    }
}
