//! HTTP network transport — stream audio from URLs.
//!
//! The response body is handed to the backend as a non-seekable stream.
//! Feature-gated behind `http` to keep the default build minimal.

use crate::effects::MediaHandle;
use crate::error::{ResolutionErrorKind, SourceResolutionError};
use crate::models::SourceKind;
use crate::resolver::NetworkTransport;

/// Blocking ureq transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransport;

impl NetworkTransport for HttpTransport {
    fn open(&self, url: &str) -> Result<MediaHandle, SourceResolutionError> {
        if !is_http_url(url) {
            return Err(network_error(format!("unsupported scheme: {}", url)));
        }

        let response = ureq::get(url)
            .call()
            .map_err(|e| network_error(format!("{}: {}", url, e)))?;

        let hint = extension_from_url(url).or_else(|| {
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .and_then(extension_from_content_type)
                .map(String::from)
        });
        log::debug!("maestro: streaming {} (hint {:?})", url, hint);

        let reader = response.into_body().into_reader();
        Ok(MediaHandle::Stream {
            url: url.to_string(),
            reader: Box::new(reader),
            hint,
        })
    }
}

fn network_error(detail: String) -> SourceResolutionError {
    SourceResolutionError::new(ResolutionErrorKind::NetworkError, SourceKind::Network, detail)
}

/// Extract file extension from a URL, stripping query parameters.
///
/// `"https://example.com/song.mp3?token=abc"` → `Some("mp3")`
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    let path = path.split('#').next().unwrap_or(path);
    let segment = path.rsplit('/').next()?;
    let ext = segment.rsplit('.').next()?;
    if ext == segment {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Map an audio MIME type to the extension symphonia probes for.
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_lowercase();
    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/ogg" | "application/ogg" => Some("ogg"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/aac" => Some("aac"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        _ => None,
    }
}

/// Check if a path looks like an HTTP URL.
pub fn is_http_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_url_strips_query() {
        assert_eq!(
            extension_from_url("https://example.com/song.mp3?token=abc"),
            Some("mp3".into())
        );
    }

    #[test]
    fn extension_from_url_no_extension() {
        assert_eq!(extension_from_url("https://example.com/stream"), None);
    }

    #[test]
    fn content_type_ignores_parameters() {
        assert_eq!(extension_from_content_type("audio/mpeg; charset=binary"), Some("mp3"));
        assert_eq!(extension_from_content_type("text/html"), None);
    }

    #[test]
    fn non_http_urls_are_network_errors() {
        let err = HttpTransport.open("ftp://example.com/a.mp3").unwrap_err();
        assert_eq!(err.kind, ResolutionErrorKind::NetworkError);
        assert_eq!(err.variant, SourceKind::Network);
    }
}
