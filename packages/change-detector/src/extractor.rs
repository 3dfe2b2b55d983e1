//! Path-literal discovery in fetched bodies.
//!
//! Bodies are not parsed. Any quoted string that looks like an absolute path
//! on the origin (optionally spelled as a full or protocol-relative URL to
//! the origin host) is treated as a link.

use regex::Regex;

/// How much of a body the binary sniffing looks at.
pub const SNIFF_LEN: usize = 0x1000;

/// Bytes that never appear in text: C0 controls other than TAB/LF/CR, and
/// bytes that can't occur in UTF-8.
fn is_suspect(byte: u8) -> bool {
    (byte < 0x20 && byte != b'\t' && byte != b'\n' && byte != b'\r') || byte >= 0xF6
}

/// True when at most 1% of the first [`SNIFF_LEN`] bytes are suspect.
/// Empty bodies are not text.
pub fn looks_like_text(body: &[u8]) -> bool {
    let sample = &body[..body.len().min(SNIFF_LEN)];
    if sample.is_empty() {
        return false;
    }
    let suspect = sample.iter().filter(|&&b| is_suspect(b)).count();
    suspect * 100 <= sample.len()
}

/// Finds path literals in text bodies served by one origin host.
#[derive(Debug, Clone)]
pub struct PathExtractor {
    pattern: Regex,
}

impl PathExtractor {
    pub fn new(origin_host: Option<&str>) -> Self {
        let prefix = match origin_host {
            Some(host) => format!(r"(?:(?:https?:)?//{})?", regex::escape(host)),
            None => String::new(),
        };
        let shape = r"(/[A-Za-z0-9\-_.!#$%&][A-Za-z0-9\-_./!#$%&]+)";
        let pattern = format!(r#""{prefix}{shape}"|'{prefix}{shape}'|`{prefix}{shape}`"#);

        Self {
            // Built from an escaped host and fixed fragments.
            pattern: Regex::new(&pattern).expect("path literal pattern is valid"),
        }
    }

    /// Every path literal in `body`, in order of appearance. Binary bodies
    /// yield nothing.
    pub fn extract(&self, body: &[u8]) -> Vec<String> {
        if !looks_like_text(body) {
            return Vec::new();
        }
        let text = String::from_utf8_lossy(body);

        let mut paths = Vec::new();
        let mut start = 0;
        while let Some(caps) = self.pattern.captures_at(&text, start) {
            let Some(whole) = caps.get(0) else { break };
            if let Some(path) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
                paths.push(path.as_str().to_string());
            }
            // The closing delimiter may open the next literal.
            start = whole.end() - 1;
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> PathExtractor {
        PathExtractor::new(Some("example.com"))
    }

    #[test]
    fn test_extracts_each_delimiter_style() {
        let body = br#"<script src="/a.js"></script><link href='/b.css'> let x = `/c/d.json`;"#;
        assert_eq!(extractor().extract(body), vec!["/a.js", "/b.css", "/c/d.json"]);
    }

    #[test]
    fn test_strips_origin_prefixes() {
        let body = br#"["http://example.com/x.png", "https://example.com/y.png", "//example.com/z.png"]"#;
        assert_eq!(extractor().extract(body), vec!["/x.png", "/y.png", "/z.png"]);
    }

    #[test]
    fn test_ignores_foreign_hosts_and_mismatched_delimiters() {
        let body = br#""http://other.org/x.png" "/ok.html' '/fine.txt'"#;
        assert_eq!(extractor().extract(body), vec!["/fine.txt"]);
    }

    #[test]
    fn test_shared_delimiter_between_literals() {
        // The quote closing "/a" also opens "/b".
        let body = br#""/aa"/bb""#;
        assert_eq!(extractor().extract(body), vec!["/aa", "/bb"]);
    }

    #[test]
    fn test_rejects_too_short_and_double_slash() {
        let body = br#""/" "/a" "//cdn""#;
        assert!(extractor().extract(body).is_empty());
    }

    #[test]
    fn test_binary_body_is_not_scanned() {
        let mut body = vec![0u8; 100];
        body.extend_from_slice(br#""/hidden.js""#);
        assert!(!looks_like_text(&body));
        assert!(extractor().extract(&body).is_empty());
    }

    #[test]
    fn test_sniff_threshold_is_one_percent() {
        let mut body = vec![b'a'; 200];
        body[0] = 0x00;
        body[1] = 0xFF;
        assert!(looks_like_text(&body));
        body[2] = 0x01;
        assert!(!looks_like_text(&body));
        assert!(!looks_like_text(b""));
    }

    #[test]
    fn test_only_prefix_is_sniffed() {
        let mut body = vec![b' '; SNIFF_LEN];
        body.extend(std::iter::repeat(0u8).take(1000));
        assert!(looks_like_text(&body));
    }
}
