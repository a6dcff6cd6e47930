//! Minimal `multipart/related` splitting for WADO-RS and rad69 (MTOM) responses.

use super::{ClientResult, DicomClientError};

/// One body part with its lower-cased Content-Type (empty if the part had none).
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Part {
    pub fn is_xml(&self) -> bool {
        self.content_type.contains("xml")
    }
}

/// Boundary parameter from a Content-Type header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .filter(|b| !b.is_empty())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Split a multipart body into parts. The preamble and epilogue are dropped.
pub fn split_parts(body: &[u8], boundary: &str) -> ClientResult<Vec<Part>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut cursor = find(body, delimiter, 0).ok_or_else(|| {
        DicomClientError::InvalidResponse(format!("multipart boundary '{boundary}' not found"))
    })?;
    let mut parts = Vec::new();

    loop {
        let after = cursor + delimiter.len();
        if body[after..].starts_with(b"--") {
            break;
        }
        let headers_start = after + line_break_len(&body[after..]);
        let headers_end = find(body, b"\r\n\r\n", headers_start).ok_or_else(|| {
            DicomClientError::InvalidResponse("multipart part without header terminator".into())
        })?;
        let content_start = headers_end + 4;
        let next = find(body, delimiter, content_start).ok_or_else(|| {
            DicomClientError::InvalidResponse("unterminated multipart body".into())
        })?;
        // The CRLF before the next delimiter belongs to the delimiter.
        let content_end = if next >= 2 && &body[next - 2..next] == b"\r\n" {
            next - 2
        } else {
            next
        };

        let headers = String::from_utf8_lossy(&body[headers_start..headers_end]);
        let content_type = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim()
                    .eq_ignore_ascii_case("content-type")
                    .then(|| value.trim().to_ascii_lowercase())
            })
            .unwrap_or_default();

        parts.push(Part {
            content_type,
            body: body[content_start.min(content_end)..content_end].to_vec(),
        });
        cursor = next;
    }

    Ok(parts)
}

fn line_break_len(rest: &[u8]) -> usize {
    if rest.starts_with(b"\r\n") {
        2
    } else if rest.starts_with(b"\n") {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_read_quoted_or_bare() {
        assert_eq!(
            boundary_from_content_type(
                "multipart/related; type=\"application/dicom\"; boundary=\"abc123\""
            )
            .as_deref(),
            Some("abc123")
        );
        assert_eq!(
            boundary_from_content_type("multipart/related;boundary=xyz").as_deref(),
            Some("xyz")
        );
        assert_eq!(boundary_from_content_type("application/dicom"), None);
    }

    #[test]
    fn parts_are_split_with_their_content_types() {
        let body = b"preamble\r\n--b1\r\nContent-Type: application/xop+xml\r\n\r\n<soap/>\r\n--b1\r\nContent-Type: application/dicom\r\nContent-ID: <1>\r\n\r\nDICM\x00\x01\r\n--b1--\r\n";
        let parts = split_parts(body, "b1").expect("split");

        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_xml());
        assert_eq!(parts[0].body, b"<soap/>");
        assert_eq!(parts[1].content_type, "application/dicom");
        assert_eq!(parts[1].body, b"DICM\x00\x01");
    }

    #[test]
    fn missing_boundary_is_an_error() {
        assert!(split_parts(b"no parts here", "b1").is_err());
    }
}
