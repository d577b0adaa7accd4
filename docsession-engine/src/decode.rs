use thiserror::Error;

/// What a decoder learned about a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub pages: usize,
    pub title: Option<String>,
    /// Identifiers of constructs the document uses that cannot be displayed.
    pub unsupported_features: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("document is encrypted")]
    PasswordRequired,
    #[error("{0}")]
    Invalid(String),
}

/// Parses document bytes. Runs on a blocking thread.
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, data: &[u8], password: Option<&str>) -> Result<Decoded, DecodeError>;
}

const HEADER: &[u8] = b"%PDF-";
const HEADER_WINDOW: usize = 1024;

/// Decoder that walks the raw object syntax without rendering anything.
///
/// Page count comes from `/Type /Page` dictionaries and the title from the first
/// literal `/Title` string. Encrypted files only require that some password is
/// supplied; content streams are never decrypted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanDecoder;

impl Decoder for ScanDecoder {
    fn decode(&self, data: &[u8], password: Option<&str>) -> Result<Decoded, DecodeError> {
        let window = &data[..data.len().min(HEADER_WINDOW)];
        if find(window, HEADER).is_none() {
            return Err(DecodeError::Invalid("missing %PDF header".to_owned()));
        }
        if find(data, b"/Encrypt").is_some() && password.is_none() {
            return Err(DecodeError::PasswordRequired);
        }

        let pages = count_pages(data);
        if pages == 0 {
            return Err(DecodeError::Invalid("no page objects found".to_owned()));
        }
        Ok(Decoded {
            pages,
            title: literal_title(data),
            unsupported_features: unsupported_features(data),
        })
    }
}

/// Features detectable from the raw bytes alone.
pub fn unsupported_features(data: &[u8]) -> Vec<String> {
    let mut features = Vec::new();
    if find(data, b"/XFA").is_some() {
        features.push("forms".to_owned());
    }
    features
}

fn count_pages(data: &[u8]) -> usize {
    let mut count = 0;
    let mut rest = data;
    while let Some(at) = find(rest, b"/Type") {
        rest = &rest[at + b"/Type".len()..];
        let name = skip_whitespace(rest);
        if name.starts_with(b"/Page") && !name[b"/Page".len()..].starts_with(b"s") {
            count += 1;
        }
    }
    count
}

fn literal_title(data: &[u8]) -> Option<String> {
    let at = find(data, b"/Title")?;
    let rest = skip_whitespace(&data[at + b"/Title".len()..]);
    let rest = rest.strip_prefix(b"(")?;

    let mut title = Vec::new();
    let mut depth = 0usize;
    let mut bytes = rest.iter();
    while let Some(&byte) = bytes.next() {
        match byte {
            b'\\' => {
                if let Some(&escaped) = bytes.next() {
                    title.push(match escaped {
                        b'n' => b'\n',
                        b't' => b'\t',
                        other => other,
                    });
                }
            }
            b'(' => {
                depth += 1;
                title.push(byte);
            }
            b')' if depth == 0 => {
                let title = String::from_utf8_lossy(&title).trim().to_owned();
                return (!title.is_empty()).then_some(title);
            }
            b')' => {
                depth -= 1;
                title.push(byte);
            }
            _ => title.push(byte),
        }
    }
    None
}

fn skip_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TWO_PAGES: &[u8] = b"%PDF-1.4
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj
2 0 obj << /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >> endobj
3 0 obj << /Type /Page /Parent 2 0 R >> endobj
4 0 obj << /Type/Page /Parent 2 0 R >> endobj
5 0 obj << /Title (Quarterly \\(Q3\\) Report) >> endobj
trailer << /Root 1 0 R /Info 5 0 R >>
%%EOF";

    pub(crate) const ENCRYPTED: &[u8] = b"%PDF-1.6
1 0 obj << /Type /Page >> endobj
trailer << /Encrypt 9 0 R >>
%%EOF";

    #[test]
    fn counts_pages_and_reads_title() {
        let decoded = ScanDecoder.decode(TWO_PAGES, None).unwrap();
        assert_eq!(decoded.pages, 2);
        assert_eq!(decoded.title.as_deref(), Some("Quarterly (Q3) Report"));
        assert!(decoded.unsupported_features.is_empty());
    }

    #[test]
    fn rejects_files_without_header_or_pages() {
        assert_eq!(
            ScanDecoder.decode(b"<html>nope</html>", None),
            Err(DecodeError::Invalid("missing %PDF header".to_owned()))
        );
        assert!(matches!(
            ScanDecoder.decode(b"%PDF-1.7\n%%EOF", None),
            Err(DecodeError::Invalid(_))
        ));
    }

    #[test]
    fn encrypted_files_need_a_password() {
        assert_eq!(
            ScanDecoder.decode(ENCRYPTED, None),
            Err(DecodeError::PasswordRequired)
        );
        assert_eq!(ScanDecoder.decode(ENCRYPTED, Some("pw")).unwrap().pages, 1);
    }

    #[test]
    fn xfa_forms_are_reported() {
        let data = b"%PDF-1.7\n1 0 obj << /Type /Page >> endobj\n2 0 obj << /AcroForm << /XFA 3 0 R >> >> endobj";
        let decoded = ScanDecoder.decode(data, None).unwrap();
        assert_eq!(decoded.unsupported_features, vec!["forms".to_owned()]);
        assert_eq!(decoded.title, None);
    }
}
