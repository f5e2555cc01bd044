//! `multipart/form-data` request body parsing.
//!
//! Text parts land in the request's form fields; file parts are spooled to
//! temporary files that are deleted when the request is finalized.

use rand::RngCore;

use crate::request::UploadedFile;

#[derive(Debug, Default)]
pub(crate) struct ParsedMultipart {
    pub(crate) fields: Vec<(String, String)>,
    pub(crate) files: Vec<UploadedFile>,
}

/// Extracts the boundary parameter from a `multipart/form-data` content
/// type.
pub(crate) fn boundary(content_type: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("boundary=") {
            let value = value.trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

pub(crate) async fn parse(body: &[u8], boundary: &str) -> crate::Result<ParsedMultipart> {
    let delimiter = {
        let mut d = Vec::with_capacity(boundary.len() + 4);
        d.extend_from_slice(b"\r\n--");
        d.extend_from_slice(boundary.as_bytes());
        d
    };

    let mut parsed = ParsedMultipart::default();

    // The first delimiter has no leading CRLF.
    let first = {
        let mut d = Vec::with_capacity(boundary.len() + 2);
        d.extend_from_slice(b"--");
        d.extend_from_slice(boundary.as_bytes());
        d
    };
    let Some(start) = find(body, &first) else {
        return Err(bad_multipart());
    };
    let mut rest = &body[start + first.len()..];

    loop {
        if rest.starts_with(b"--") {
            // closing delimiter
            return Ok(parsed);
        }
        let Some(after_crlf) = rest.strip_prefix(b"\r\n") else {
            return Err(bad_multipart());
        };
        let Some(head_end) = find(after_crlf, b"\r\n\r\n") else {
            return Err(bad_multipart());
        };
        let head = &after_crlf[..head_end];
        let after_head = &after_crlf[head_end + 4..];
        let Some(part_end) = find(after_head, &delimiter) else {
            return Err(bad_multipart());
        };
        let data = &after_head[..part_end];

        let part = PartHead::parse(head)?;
        match part.filename {
            Some(filename) => {
                let path = spool(data).await?;
                parsed.files.push(UploadedFile {
                    field_name: part.name,
                    filename,
                    content_type: part.content_type,
                    path,
                });
            }
            None => {
                let value = String::from_utf8_lossy(data).into_owned();
                parsed.fields.push((part.name, value));
            }
        }

        rest = &after_head[part_end + delimiter.len()..];
    }
}

struct PartHead {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHead {
    fn parse(head: &[u8]) -> crate::Result<PartHead> {
        let mut name = None;
        let mut filename = None;
        let mut content_type = None;

        for line in head.split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(line);
            let line = line.trim_end_matches('\r');
            let Some((header, value)) = line.split_once(':') else {
                continue;
            };
            if header.eq_ignore_ascii_case("content-disposition") {
                for param in value.split(';').skip(1) {
                    let param = param.trim();
                    if let Some(v) = param.strip_prefix("name=") {
                        name = Some(v.trim_matches('"').to_string());
                    } else if let Some(v) = param.strip_prefix("filename=") {
                        filename = Some(v.trim_matches('"').to_string());
                    }
                }
            } else if header.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }

        Ok(PartHead {
            name: name.ok_or_else(bad_multipart)?,
            filename,
            content_type,
        })
    }
}

async fn spool(data: &[u8]) -> crate::Result<std::path::PathBuf> {
    let path = std::env::temp_dir().join(format!(
        "wharf-upload-{:016x}",
        rand::thread_rng().next_u64()
    ));
    tokio::fs::write(&path, data)
        .await
        .map_err(crate::Error::new_io)?;
    Ok(path)
}

fn bad_multipart() -> crate::Error {
    crate::Error::new_parse(crate::error::Parse::Header)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"--XBOUND\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\r\n\
        hello world\r\n\
        --XBOUND\r\n\
        Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        file-contents\r\n\
        --XBOUND--\r\n";

    #[test]
    fn extracts_boundary_parameter() {
        assert_eq!(
            boundary("multipart/form-data; boundary=XBOUND"),
            Some("XBOUND".to_string())
        );
        assert_eq!(
            boundary("multipart/form-data; charset=utf-8; boundary=\"q\""),
            Some("q".to_string())
        );
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[tokio::test]
    async fn parses_fields_and_files() {
        let parsed = parse(BODY, "XBOUND").await.unwrap();
        assert_eq!(parsed.fields, vec![("title".to_string(), "hello world".to_string())]);
        assert_eq!(parsed.files.len(), 1);

        let file = &parsed.files[0];
        assert_eq!(file.field_name, "upload");
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        let contents = std::fs::read(&file.path).unwrap();
        assert_eq!(contents, b"file-contents");
        let _ = std::fs::remove_file(&file.path);
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let truncated = &BODY[..BODY.len() - 12];
        assert!(parse(truncated, "XBOUND").await.is_err());
    }
}
