//! Filename and title heuristics for document URLs.

use percent_encoding::percent_decode_str;

pub const DEFAULT_FILENAME: &str = "document.pdf";

/// Returns the URL without its fragment.
pub fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// Finds the most plausible `*.pdf` filename in `url`, looking at the path,
/// then the query, then the fragment. Falls back to `default`.
pub fn pdf_file_name_from_url(url: &str, default: &str) -> String {
    if is_data_scheme(url) {
        return default.to_owned();
    }

    let (path, query, fragment) = split_uri(url);
    let Some(found) = [path, query, fragment].into_iter().find_map(last_pdf_name) else {
        return default.to_owned();
    };

    if found.contains('%') {
        if let Ok(decoded) = percent_decode_str(found).decode_utf8() {
            if let Some(name) = last_pdf_name(&decoded) {
                return name.to_owned();
            }
        }
    }
    found.to_owned()
}

/// Last path segment, with query and fragment removed.
pub fn filename_from_url(url: &str) -> &str {
    let end = url.find(|c| c == '#' || c == '?').unwrap_or(url.len());
    let anchor = &url[..end];
    let start = anchor.rfind('/').map_or(0, |idx| idx + 1);
    &anchor[start..]
}

/// Window title for a document opened from `url`.
pub fn title_from_url(url: &str) -> String {
    let title = pdf_file_name_from_url(url, "");
    if !title.is_empty() {
        return title;
    }
    match percent_decode_str(filename_from_url(url)).decode_utf8() {
        Ok(decoded) if !decoded.is_empty() => decoded.into_owned(),
        _ => url.to_owned(),
    }
}

/// Extracts a `.pdf` filename from a `Content-Disposition` header value.
/// `filename*` (RFC 5987) wins over a plain `filename` parameter.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    for part in header.split(';') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
                if let Ok(decoded) = percent_decode_str(unquote(encoded)).decode_utf8() {
                    if let Some(name) = pdf_basename(&decoded) {
                        return Some(name);
                    }
                }
            }
            "filename" => plain = pdf_basename(unquote(value)),
            _ => {}
        }
    }
    plain
}

fn pdf_basename(name: &str) -> Option<String> {
    let start = name.rfind(|c| c == '/' || c == '\\').map_or(0, |idx| idx + 1);
    let name = name[start..].trim();
    if name.len() > 4 && name.to_ascii_lowercase().ends_with(".pdf") {
        Some(name.to_owned())
    } else {
        None
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn is_data_scheme(url: &str) -> bool {
    let trimmed = url.trim_start_matches(' ');
    trimmed
        .as_bytes()
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(b"data:"))
}

/// Splits into (path, query, fragment); query keeps its `?`, fragment its `#`.
fn split_uri(url: &str) -> (&str, &str, &str) {
    let rest = strip_authority(url);
    let path_end = rest.find(|c| c == '?' || c == '#').unwrap_or(rest.len());
    let (path, tail) = rest.split_at(path_end);
    if tail.starts_with('?') {
        let query_end = tail.find('#').unwrap_or(tail.len());
        let (query, fragment) = tail.split_at(query_end);
        (path, query, fragment)
    } else {
        (path, "", tail)
    }
}

fn strip_authority(url: &str) -> &str {
    let after_scheme = if url.starts_with("//") {
        Some(&url[2..])
    } else {
        url.find(':')
            .filter(|idx| *idx > 0)
            .and_then(|idx| url[idx + 1..].strip_prefix("//"))
    };
    match after_scheme {
        Some(rest) => {
            let host_end = rest.find('/').unwrap_or(rest.len());
            if host_end == 0 {
                url
            } else {
                &rest[host_end..]
            }
        }
        None => url,
    }
}

/// The run of filename characters ending in the last `.pdf` that is followed by a word boundary.
fn last_pdf_name(haystack: &str) -> Option<&str> {
    let lower = haystack.to_ascii_lowercase();
    let bytes = haystack.as_bytes();
    let idx = lower.rmatch_indices(".pdf").map(|(idx, _)| idx).find(|idx| {
        bytes
            .get(idx + 4)
            .map_or(true, |b| !(b.is_ascii_alphanumeric() || *b == b'_'))
    })?;
    let start = haystack[..idx]
        .rfind(|c| matches!(c, '/' | '?' | '#' | '='))
        .map_or(0, |pos| pos + 1);
    if start == idx {
        return None;
    }
    Some(&haystack[start..idx + 4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_pdf_name_in_path_query_or_fragment() {
        assert_eq!(pdf_file_name_from_url("https://x/doc.pdf", ""), "doc.pdf");
        assert_eq!(
            pdf_file_name_from_url("https://x/viewer?file=report.PDF&x=1", ""),
            "report.PDF"
        );
        assert_eq!(pdf_file_name_from_url("https://x/view#name=a.pdf", ""), "a.pdf");
        assert_eq!(pdf_file_name_from_url("https://x/a.pdf/b.pdf", ""), "b.pdf");
        assert_eq!(pdf_file_name_from_url("https://x/notes.pdfx", "fallback"), "fallback");
    }

    #[test]
    fn host_is_not_mistaken_for_a_filename() {
        assert_eq!(pdf_file_name_from_url("https://files.pdf/download", ""), "");
    }

    #[test]
    fn decodes_percent_encoded_names() {
        assert_eq!(
            pdf_file_name_from_url("https://x/annual%20report.pdf", ""),
            "annual report.pdf"
        );
    }

    #[test]
    fn data_urls_use_default_name() {
        assert_eq!(
            pdf_file_name_from_url("data:application/pdf;base64,AAAA.pdf", DEFAULT_FILENAME),
            DEFAULT_FILENAME
        );
    }

    #[test]
    fn title_falls_back_to_last_segment_then_url() {
        assert_eq!(title_from_url("https://orig/doc.pdf"), "doc.pdf");
        assert_eq!(title_from_url("https://x/files/my%20file?id=3"), "my file");
        assert_eq!(title_from_url("https://x/files/"), "https://x/files/");
    }

    #[test]
    fn strips_fragment_for_base_url() {
        assert_eq!(strip_fragment("https://x/doc.pdf#page=3"), "https://x/doc.pdf");
        assert_eq!(strip_fragment("https://x/doc.pdf"), "https://x/doc.pdf");
    }

    #[test]
    fn content_disposition_prefers_extended_filename() {
        assert_eq!(
            filename_from_content_disposition(
                "attachment; filename=\"plain.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
            ),
            Some("résumé.pdf".to_owned())
        );
        assert_eq!(
            filename_from_content_disposition("inline; filename=\"../secret/plain.pdf\""),
            Some("plain.pdf".to_owned())
        );
        assert_eq!(filename_from_content_disposition("attachment; filename=data.bin"), None);
    }

    #[test]
    fn non_ascii_names_are_kept_whole() {
        assert_eq!(title_from_url("日本語.pdf"), "日本語.pdf");
        assert_eq!(title_from_url("é"), "é");
        assert_eq!(
            pdf_file_name_from_url("file:///home/ユーザー/報告書.pdf", DEFAULT_FILENAME),
            "報告書.pdf"
        );
        assert_eq!(
            pdf_file_name_from_url("https://x/%E5%A0%B1%E5%91%8A.pdf", DEFAULT_FILENAME),
            "報告.pdf"
        );
        assert_eq!(
            title_from_url("https://x/dossiers/%C3%A9t%C3%A9?v=2"),
            "été"
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"отчёт.pdf\""),
            Some("отчёт.pdf".to_owned())
        );
        assert_eq!(
            filename_from_content_disposition(
                "attachment; filename*=UTF-8''%E6%97%A5%E6%9C%AC%E8%AA%9E.pdf"
            ),
            Some("日本語.pdf".to_owned())
        );
    }
}
