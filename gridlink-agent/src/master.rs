//! Master document handling
//!
//! A project's master URL serves a page listing its current scheduler URLs
//! as `<scheduler>URL</scheduler>` elements. The client fetches it when the
//! known schedulers keep failing and merges what it finds into the project.

use thiserror::Error;
use tracing::debug;

const OPEN_TAG: &str = "<scheduler>";
const CLOSE_TAG: &str = "</scheduler>";

/// Errors from parsing a master document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MasterParseError {
    #[error("master document is not valid UTF-8")]
    Encoding,

    #[error("unterminated <scheduler> element at byte {0}")]
    Unterminated(usize),
}

/// Extracts scheduler URLs from a master document, in document order
///
/// Entries that are not http(s) URLs are skipped, as are repeats. An empty
/// result is valid and means the document lists no schedulers.
pub fn parse_master_document(body: &[u8]) -> Result<Vec<String>, MasterParseError> {
    let text = std::str::from_utf8(body).map_err(|_| MasterParseError::Encoding)?;

    let mut urls: Vec<String> = Vec::new();
    let mut rest = text;
    let mut offset = 0;

    while let Some(start) = rest.find(OPEN_TAG) {
        let content_start = start + OPEN_TAG.len();
        let Some(len) = rest[content_start..].find(CLOSE_TAG) else {
            return Err(MasterParseError::Unterminated(offset + start));
        };

        let url = rest[content_start..content_start + len].trim();
        if !is_http_url(url) {
            debug!("Skipping scheduler entry '{}'", url);
        } else if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }

        let consumed = content_start + len + CLOSE_TAG.len();
        offset += consumed;
        rest = &rest[consumed..];
    }

    Ok(urls)
}

fn is_http_url(url: &str) -> bool {
    let host = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    matches!(host, Some(h) if !h.is_empty() && !h.contains(char::is_whitespace))
}

/// Merges fetched URLs into an existing list
///
/// Existing entries keep their position, new ones are appended in fetched
/// order and duplicates are dropped. Returns `None` when nothing changes,
/// which includes an empty fetched list.
pub fn merge_urls(existing: &[String], fetched: &[String]) -> Option<Vec<String>> {
    let mut merged = existing.to_vec();

    for url in fetched {
        if !merged.contains(url) {
            merged.push(url.clone());
        }
    }

    (merged.len() != existing.len()).then_some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_master_page() {
        let page = br#"
            <html><head><title>Example@Home</title>
            <!--
            <scheduler>http://a.example.org/cgi/sched</scheduler>
            -->
            <scheduler> https://b.example.org/cgi/sched </scheduler>
            </head><body>Welcome</body></html>
        "#;

        let parsed = parse_master_document(page).unwrap();
        assert_eq!(
            parsed,
            urls(&["http://a.example.org/cgi/sched", "https://b.example.org/cgi/sched"])
        );
    }

    #[test]
    fn test_parse_skips_invalid_and_duplicate_entries() {
        let page = b"<scheduler>ftp://x/</scheduler>\
            <scheduler></scheduler>\
            <scheduler>http://a/</scheduler>\
            <scheduler>http://a/</scheduler>\
            <scheduler>http://</scheduler>";

        assert_eq!(parse_master_document(page).unwrap(), urls(&["http://a/"]));
    }

    #[test]
    fn test_parse_without_schedulers_is_empty() {
        assert!(parse_master_document(b"<html>moved</html>").unwrap().is_empty());
        assert!(parse_master_document(b"").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_master_document(b"ok <scheduler>http://a/"),
            Err(MasterParseError::Unterminated(3))
        );
        assert_eq!(
            parse_master_document(&[0x3c, 0xff, 0xfe]),
            Err(MasterParseError::Encoding)
        );
    }

    #[test]
    fn test_unterminated_offset_after_earlier_entries() {
        let page = b"<scheduler>http://a/</scheduler> <scheduler>http://b/";
        assert_eq!(
            parse_master_document(page),
            Err(MasterParseError::Unterminated(33))
        );
    }

    #[test]
    fn test_merge_empty_fetch_keeps_list() {
        let existing = urls(&["A", "B"]);
        assert_eq!(merge_urls(&existing, &[]), None);
    }

    #[test]
    fn test_merge_appends_new_entries_in_order() {
        let existing = urls(&["A", "B"]);
        assert_eq!(
            merge_urls(&existing, &urls(&["B", "C"])),
            Some(urls(&["A", "B", "C"]))
        );
        assert_eq!(merge_urls(&existing, &urls(&["B", "A"])), None);
        assert_eq!(
            merge_urls(&[], &urls(&["C", "C", "D"])),
            Some(urls(&["C", "D"]))
        );
    }
}
