//! Netscape bookmark file export.
//!
//! Produces the HTML dialect every major browser imports:
//!
//! ```text
//! <!DOCTYPE NETSCAPE-Bookmark-file-1>
//! <META HTTP-EQUIV="Content-Type" CONTENT="text/html; charset=UTF-8">
//! <TITLE>Bookmarks</TITLE>
//! <H1>Bookmarks</H1>
//! <DL><p>
//!     <DT><A HREF="https://example.com" ADD_DATE="1700000000">Example</A>
//!     <DD>Optional description
//! </DL><p>
//! ```

use crate::models::Link;

/// Render links as a Netscape bookmark file.
///
/// Links without a title use their URL as the anchor text.
pub fn export_netscape(links: &[Link]) -> String {
    let mut out = String::from(
        "<!DOCTYPE NETSCAPE-Bookmark-file-1>\n\
         <META HTTP-EQUIV=\"Content-Type\" CONTENT=\"text/html; charset=UTF-8\">\n\
         <TITLE>Bookmarks</TITLE>\n\
         <H1>Bookmarks</H1>\n\
         <DL><p>\n",
    );

    for link in links {
        let title = link
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&link.url);
        out.push_str(&format!(
            "    <DT><A HREF=\"{}\" ADD_DATE=\"{}\">{}</A>\n",
            escape_html(&link.url),
            link.created_at.timestamp(),
            escape_html(title)
        ));
        if let Some(description) = link.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!("    <DD>{}\n", escape_html(description)));
        }
    }

    out.push_str("</DL><p>\n");
    out
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinkState;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn link(url: &str, title: Option<&str>, description: Option<&str>) -> Link {
        Link {
            id: Uuid::new_v4(),
            url: url.to_string(),
            title: title.map(str::to_string),
            description: description.map(str::to_string),
            image: None,
            state: LinkState::Processed,
            notes: None,
            notes_text: None,
            has_embedding: false,
            user_id: Uuid::nil(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_export_empty() {
        let html = export_netscape(&[]);
        assert!(html.starts_with("<!DOCTYPE NETSCAPE-Bookmark-file-1>"));
        assert!(html.trim_end().ends_with("</DL><p>"));
        assert!(!html.contains("<DT>"));
    }

    #[test]
    fn test_export_entry_with_description() {
        let html = export_netscape(&[link(
            "https://example.com",
            Some("Example"),
            Some("An example site"),
        )]);
        assert!(html.contains(
            "<DT><A HREF=\"https://example.com\" ADD_DATE=\"1700000000\">Example</A>"
        ));
        assert!(html.contains("<DD>An example site"));
    }

    #[test]
    fn test_export_untitled_uses_url() {
        let html = export_netscape(&[link("https://example.com/a", None, None)]);
        assert!(html.contains(">https://example.com/a</A>"));
        assert!(!html.contains("<DD>"));
    }

    #[test]
    fn test_export_escapes_markup() {
        let html = export_netscape(&[link(
            "https://example.com/?a=1&b=\"2\"",
            Some("<script>alert('x')</script>"),
            None,
        )]);
        assert!(html.contains("HREF=\"https://example.com/?a=1&amp;b=&quot;2&quot;\""));
        assert!(html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
