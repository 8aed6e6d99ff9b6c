//! Output rendering for collected message records.
//!
//! Supports three output formats: JSON, plain text, and styled HTML.
//! Output depends only on the records passed in, so rendering the same
//! records twice yields byte-identical files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::domain::{AppError, FormatSet, MessageRecord, OutputFormat, Result};
use crate::infrastructure::write_atomic;

/// Extensions rendered inline as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const STYLE: &str = r"
body { font-family: sans-serif; background: #313338; color: #dbdee1; margin: 0; padding: 24px; }
h1 { color: #f2f3f5; font-size: 20px; border-bottom: 1px solid #4e5058; padding-bottom: 8px; }
.message { padding: 8px 12px; border-radius: 4px; margin-bottom: 4px; }
.message:hover { background: #2e3035; }
.author { font-weight: 600; color: #f2f3f5; }
.time { color: #949ba4; font-size: 12px; margin-left: 8px; }
.badge { font-size: 10px; background: #5865f2; color: #fff; border-radius: 3px; padding: 1px 4px; margin-left: 6px; }
.content { white-space: pre-wrap; word-wrap: break-word; margin-top: 2px; }
.notice { color: #949ba4; font-style: italic; }
.reply { color: #949ba4; font-size: 12px; }
.attachment img { max-width: 400px; max-height: 300px; border-radius: 4px; margin-top: 4px; }
.embed { border-left: 4px solid #4e5058; background: #2b2d31; padding: 6px 10px; margin-top: 4px; }
.reactions span { background: #2b2d31; border-radius: 8px; padding: 1px 6px; margin-right: 4px; font-size: 12px; }
";

/// Name of the sibling attachment directory for a file stem.
#[must_use]
pub fn attachments_dir_name(stem: &str) -> String {
    format!("{stem}_attachments")
}

/// Escape text for HTML element content and attribute values.
#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-escape characters that would end a relative URL path early.
fn escape_href_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}

fn is_image(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(_, ext)| {
        let ext = ext.to_ascii_lowercase();
        IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
}

/// Formats records as indented JSON, non-ASCII kept verbatim.
///
/// # Errors
/// Returns error if serialization fails.
pub fn render_json(messages: &[MessageRecord]) -> Result<String> {
    let mut out = serde_json::to_string_pretty(messages).map_err(AppError::json)?;
    out.push('\n');
    Ok(out)
}

/// Formats records as `[timestamp] author: content`, one line per message.
pub fn render_txt(messages: &[MessageRecord]) -> String {
    let mut out = String::new();

    for msg in messages {
        let text = msg.display_text().replace('\r', "").replace('\n', "\\n");
        let _ = write!(
            out,
            "[{}] {}: {}",
            msg.timestamp.format(TIMESTAMP_FORMAT),
            msg.author,
            text
        );

        if !msg.attachments.is_empty() {
            let names: Vec<_> = msg.attachments.iter().map(|a| a.filename.as_str()).collect();
            let _ = write!(out, " [attachments: {}]", names.join(", "));
        }

        out.push('\n');
    }

    out
}

/// Formats records as a standalone HTML page headed by `title`.
///
/// Attachments point at `{stem}_attachments/` next to the page.
pub fn render_html(title: &str, stem: &str, messages: &[MessageRecord]) -> String {
    let mut out = String::new();
    let title = escape_html(title);
    let attachments_dir = escape_href_segment(&attachments_dir_name(stem));

    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>#{title}</h1>\n"
    );

    for msg in messages {
        render_html_message(&mut out, &attachments_dir, msg);
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn render_html_message(out: &mut String, attachments_dir: &str, msg: &MessageRecord) {
    let _ = writeln!(out, "<div class=\"message\" id=\"m{}\">", msg.id);

    // Header
    let _ = write!(
        out,
        "<div class=\"meta\"><span class=\"author\">{}</span><span class=\"time\">{}</span>",
        escape_html(&msg.author),
        msg.timestamp.format(TIMESTAMP_FORMAT)
    );
    if msg.webhook {
        out.push_str("<span class=\"badge\">BOT</span>");
    }
    if msg.pinned {
        out.push_str("<span class=\"badge\">PINNED</span>");
    }
    out.push_str("</div>\n");

    if let Some(reply) = msg.reply_to {
        let _ = writeln!(
            out,
            "<div class=\"reply\">replying to <a href=\"#m{reply}\">{reply}</a></div>"
        );
    }

    if msg.content.is_empty() {
        if let Some(notice) = &msg.system_content {
            let _ = writeln!(out, "<div class=\"content notice\">{}</div>", escape_html(notice));
        }
    } else {
        let _ = writeln!(out, "<div class=\"content\">{}</div>", escape_html(&msg.content));
    }

    for (index, attachment) in msg.attachments.iter().enumerate() {
        let local = attachment.local_name(msg.id, index);
        let href = escape_html(&format!("{attachments_dir}/{}", escape_href_segment(&local)));
        let label = escape_html(&attachment.filename);

        if is_image(&local) {
            let _ = writeln!(
                out,
                "<div class=\"attachment\"><a href=\"{href}\"><img src=\"{href}\" alt=\"{label}\"></a></div>"
            );
        } else {
            let _ = writeln!(
                out,
                "<div class=\"attachment\"><a href=\"{href}\">{label}</a></div>"
            );
        }
    }

    for embed in &msg.embeds {
        render_html_embed(out, embed);
    }

    if !msg.stickers.is_empty() {
        let names: Vec<_> = msg.stickers.iter().map(|s| escape_html(s)).collect();
        let _ = writeln!(out, "<div class=\"notice\">stickers: {}</div>", names.join(", "));
    }

    if !msg.reactions.is_empty() {
        out.push_str("<div class=\"reactions\">");
        for reaction in &msg.reactions {
            let users: Vec<_> = reaction.users.iter().map(|u| u.name.as_str()).collect();
            let _ = write!(
                out,
                "<span title=\"{}\">{} {}</span>",
                escape_html(&users.join(", ")),
                escape_html(&reaction.emoji),
                reaction.users.len()
            );
        }
        out.push_str("</div>\n");
    }

    out.push_str("</div>\n");
}

fn render_html_embed(out: &mut String, embed: &serde_json::Value) {
    let title = embed.get("title").and_then(serde_json::Value::as_str);
    let description = embed.get("description").and_then(serde_json::Value::as_str);
    if title.is_none() && description.is_none() {
        return;
    }

    out.push_str("<div class=\"embed\">");
    if let Some(title) = title {
        let _ = write!(out, "<div class=\"author\">{}</div>", escape_html(title));
    }
    if let Some(description) = description {
        let _ = write!(out, "<div class=\"content\">{}</div>", escape_html(description));
    }
    out.push_str("</div>\n");
}

/// Write `messages` under `target_dir` as `{stem}.{ext}` for each selected format.
///
/// `title` is the source's display name; `stem` only names files.
/// Returns the written paths in format order.
///
/// # Errors
/// Returns error if serialization or any write fails.
pub async fn render(
    title: &str,
    stem: &str,
    messages: &[MessageRecord],
    target_dir: &Path,
    formats: &FormatSet,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for format in formats.iter() {
        let content = match format {
            OutputFormat::Json => render_json(messages)?,
            OutputFormat::Txt => render_txt(messages),
            OutputFormat::Html => render_html(title, stem, messages),
        };

        let path = target_dir.join(format!("{stem}.{}", format.extension()));
        write_atomic(&path, content.as_bytes()).await?;
        written.push(path);
    }

    tracing::debug!(
        stem,
        files = written.len(),
        messages = messages.len(),
        "Rendered"
    );

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::normalizer::normalize_message;
    use crate::infrastructure::discord::fake::{message, with_attachment};
    use tempfile::tempdir;

    fn sample() -> Vec<MessageRecord> {
        vec![
            normalize_message(&message(1, "mira", "héllo\nworld")),
            normalize_message(&message(2, "kai", "<script>alert('x')</script>")),
            normalize_message(&with_attachment(
                with_attachment(
                    message(3, "mira", "look"),
                    "https://cdn.example.com/1/cat.png?ex=9",
                    "cat.png",
                ),
                "https://cdn.example.com/2/notes%231.pdf",
                "notes#1.pdf",
            )),
        ]
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_html_escapes_script() {
        let html = render_html("chat", "chat", &sample());
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
    }

    #[test]
    fn test_html_message_blocks_and_attachments() {
        let html = render_html("chat", "chat", &sample());

        assert_eq!(html.matches("<div class=\"message\"").count(), 3);
        assert!(html.contains("<img src=\"chat_attachments/3_0_cat.png\""));
        assert!(html.contains("<a href=\"chat_attachments/3_1_notes%25231.pdf\">notes#1.pdf</a>"));
        assert!(!html.contains("cdn.example.com"));
    }

    #[test]
    fn test_html_title_is_display_name() {
        let html = render_html("ideas & plans", "ideas_51", &sample());

        assert!(html.contains("<title>ideas &amp; plans</title>"));
        assert!(html.contains("<h1>#ideas &amp; plans</h1>"));
        assert!(!html.contains("<title>ideas_51"));
        assert!(html.contains("<img src=\"ideas_51_attachments/3_0_cat.png\""));
    }

    #[test]
    fn test_txt_one_line_per_message() {
        let txt = render_txt(&sample());
        let lines: Vec<_> = txt.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "[2024-05-01 10:01:00] mira: héllo\\nworld");
        assert!(lines[2].ends_with("look [attachments: cat.png, notes#1.pdf]"));
    }

    #[test]
    fn test_json_keeps_non_ascii() {
        let json = render_json(&sample()).unwrap();
        assert!(json.contains("héllo"));

        let parsed: Vec<MessageRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_is_image() {
        assert!(is_image("1_0_photo.JPG"));
        assert!(!is_image("1_0_archive.zip"));
        assert!(!is_image("noext"));
    }

    #[tokio::test]
    async fn test_render_selected_formats_is_idempotent() {
        let dir = tempdir().unwrap();
        let formats = FormatSet::new([OutputFormat::Json, OutputFormat::Html]);

        let first = render("chat", "chat", &sample(), dir.path(), &formats).await.unwrap();
        let before: Vec<_> = first.iter().map(|p| std::fs::read(p).unwrap()).collect();

        let second = render("chat", "chat", &sample(), dir.path(), &formats).await.unwrap();
        let after: Vec<_> = second.iter().map(|p| std::fs::read(p).unwrap()).collect();

        assert_eq!(first, second);
        assert_eq!(before, after);
        assert!(dir.path().join("chat.json").exists());
        assert!(dir.path().join("chat.html").exists());
        assert!(!dir.path().join("chat.txt").exists());
    }

    #[tokio::test]
    async fn test_empty_history_renders_empty_list() {
        let dir = tempdir().unwrap();
        render("quiet", "quiet", &[], dir.path(), &FormatSet::new([OutputFormat::Json]))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("quiet.json")).unwrap(),
            "[]\n"
        );
    }
}
