use crate::{
    clock::format_http_date,
    exception::Exception,
    exchange::{Exchange, Handler},
    headers::{HeaderName, StandardHeader},
    param::*,
};

use bytes::Bytes;
use chrono::prelude::*;
use log::error;

use std::{
    ffi::OsStr,
    fs::{metadata, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

/// 响应体
#[derive(Debug, Clone)]
pub enum Content {
    Empty,
    Bytes(Bytes),
    /// 写出时从文件流式读取，长度在选择文件时确定
    File(PathBuf, u64),
}

#[derive(Debug, Clone)]
pub struct Response {
    status: HttpStatus,
    headers: Vec<(HeaderName, String)>,
    content_type: Option<String>,
    content: Content,
    date: Option<DateTime<Utc>>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self::with_status(HttpStatus::Ok)
    }

    pub fn with_status(status: HttpStatus) -> Self {
        Self {
            status,
            headers: Vec::new(),
            content_type: None,
            content: Content::Empty,
            date: None,
        }
    }

    /// `302 Found`
    pub fn found(location: &str) -> Self {
        let mut response = Self::with_status(HttpStatus::Found);
        response.set_header(StandardHeader::Location, location);
        response
    }

    /// `301 Moved Permanently`
    pub fn moved_permanently(location: &str) -> Self {
        let mut response = Self::with_status(HttpStatus::MovedPermanently);
        response.set_header(StandardHeader::Location, location);
        response
    }

    /// `303 See Other`
    pub fn see_other(location: &str) -> Self {
        let mut response = Self::with_status(HttpStatus::SeeOther);
        response.set_header(StandardHeader::Location, location);
        response
    }

    pub fn set_code(&mut self, status: HttpStatus) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_date(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.date = Some(date);
        self
    }

    /// 设置标头，替换已有的同名标头
    pub fn set_header(&mut self, name: impl Into<HeaderName>, value: &str) -> &mut Self {
        let name = name.into();
        self.headers.retain(|(n, _)| n != &name);
        self.headers.push((name, value.to_string()));
        self
    }

    /// 追加标头，保留已有的同名标头（用于 `Set-Cookie`）
    pub fn add_header(&mut self, name: impl Into<HeaderName>, value: &str) -> &mut Self {
        self.headers.push((name.into(), value.to_string()));
        self
    }

    pub fn set_content(&mut self, content_type: &str, content: impl Into<Bytes>) -> &mut Self {
        self.content_type = Some(content_type.to_string());
        self.content = Content::Bytes(content.into());
        self
    }

    /// 以文件作为响应体。内容类型按扩展名推断。
    pub fn set_file(&mut self, path: &Path) -> Result<&mut Self, Exception> {
        let meta = metadata(path)?;
        if !meta.is_file() {
            return Err(Exception::NotFound);
        }
        let mime = path.extension().map(get_mime).unwrap_or("application/octet-stream");
        self.content_type = Some(mime.to_string());
        self.content = Content::File(path.to_path_buf(), meta.len());
        Ok(self)
    }

    pub fn status(&self) -> HttpStatus {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.code()
    }

    pub fn information(&self) -> &str {
        self.status.reason_phrase()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = HeaderName::custom(name);
        self.headers
            .iter()
            .find(|(n, _)| n == &name)
            .map(|(_, v)| v.as_str())
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn get_content_length(&self) -> u64 {
        match &self.content {
            Content::Empty => 0,
            Content::Bytes(bytes) => bytes.len() as u64,
            Content::File(_, len) => *len,
        }
    }

    /// 状态行与标头，以空行结束
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = String::with_capacity(128);
        for (name, value) in self.headers.iter() {
            // 长度和日期由下面统一写出
            if matches!(
                name,
                HeaderName::Standard(StandardHeader::ContentLength | StandardHeader::Date)
            ) {
                continue;
            }
            head.push_str(&[name.capitalized().as_str(), ": ", value, CRLF].concat());
        }
        if !self.status.forbids_body() {
            if let Some(t) = &self.content_type {
                head.push_str(&["Content-Type: ", t, CRLF].concat());
            }
            head.push_str(&["Content-Length: ", &self.get_content_length().to_string(), CRLF].concat());
        }
        if let Some(date) = &self.date {
            head.push_str(&["Date: ", &format_http_date(date), CRLF].concat());
        }
        head.push_str(CRLF);

        [self.status.status_line(), head.as_bytes()].concat()
    }

    /// 完整的响应字节。文件响应体不包含在内，需通过 [`Response::write_to`] 写出。
    pub fn as_bytes(&self) -> Vec<u8> {
        let head = self.head_bytes();
        match &self.content {
            Content::Bytes(bytes) if !self.status.forbids_body() => [&head[..], &bytes[..]].concat(),
            _ => head,
        }
    }

    /// 写出响应。`head_only` 为真时（HEAD 请求）只写状态行与标头。
    pub fn write_to(&self, out: &mut dyn Write, head_only: bool) -> Result<(), Exception> {
        let write_body = !head_only && !self.status.forbids_body();
        // 先打开文件，打开失败时还没有写出任何字节
        let file = match &self.content {
            Content::File(path, len) if write_body => match File::open(path) {
                Ok(f) => Some((f, *len)),
                Err(e) => {
                    error!("无法打开文件{}：{}", path.display(), e);
                    return Err(e.into());
                }
            },
            _ => None,
        };

        out.write_all(&self.head_bytes())?;
        if write_body {
            if let Content::Bytes(bytes) = &self.content {
                out.write_all(bytes)?;
            }
            if let Some((f, len)) = file {
                let copied = io::copy(&mut f.take(len), out)?;
                if copied < len {
                    return Err(Exception::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank while sending",
                    )));
                }
            }
        }
        out.flush()?;
        Ok(())
    }
}

/// 预先构建的重定向响应
#[derive(Debug, Clone)]
pub struct Redirect {
    response: Response,
}

impl Redirect {
    pub fn found(location: &str) -> Self {
        Self {
            response: Response::found(location),
        }
    }

    pub fn moved_permanently(location: &str) -> Self {
        Self {
            response: Response::moved_permanently(location),
        }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }
}

impl Handler for Redirect {
    fn handle(&self, http: &mut Exchange<'_>) -> Result<(), Exception> {
        http.respond(self.response.clone())
    }
}

/// 预先构建的 `405 Method Not Allowed` 响应，携带 `Allow` 标头
#[derive(Debug, Clone)]
pub struct MethodNotAllowed {
    response: Response,
}

impl MethodNotAllowed {
    pub fn new(allowed: &[HttpRequestMethod]) -> Self {
        let allow = allowed
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut response = Response::with_status(HttpStatus::MethodNotAllowed);
        response.set_header(StandardHeader::Allow, &allow);
        Self { response }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }
}

impl Handler for MethodNotAllowed {
    fn handle(&self, http: &mut Exchange<'_>) -> Result<(), Exception> {
        http.respond(self.response.clone())
    }
}

pub fn get_mime(extension: &OsStr) -> &'static str {
    let extension = match extension.to_str() {
        Some(e) => e.to_ascii_lowercase(),
        None => {
            error!("无法将&OsStr转换为&str类型");
            return "application/octet-stream";
        }
    };
    match extension.as_str() {
        "html" | "htm" => "text/html;charset=utf-8",
        "css" => "text/css;charset=utf-8",
        "js" | "mjs" => "text/javascript;charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain;charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn to_string(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn test_get_mime() {
        assert_eq!(get_mime(OsStr::new("html")), "text/html;charset=utf-8");
        assert_eq!(get_mime(OsStr::new("PNG")), "image/png");
        assert_eq!(get_mime(OsStr::new("pdf")), "application/pdf");
        assert_eq!(get_mime(OsStr::new("unknown")), "application/octet-stream");
    }

    #[test]
    fn test_response_new() {
        let response = Response::new();

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.information(), "OK");
        assert_eq!(response.get_content_length(), 0);
    }

    #[test]
    fn test_response_as_bytes_basic() {
        let response = Response::new();
        let response_str = to_string(&response.as_bytes());

        assert_eq!(response_str, "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn test_response_as_bytes_with_content() {
        let mut response = Response::new();
        response.set_content("text/plain", "Hello");

        let response_str = to_string(&response.as_bytes());

        assert!(response_str.contains("Content-Type: text/plain\r\n"));
        assert!(response_str.contains("Content-Length: 5\r\n"));
        assert!(response_str.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn test_response_status_code_setter() {
        let mut response = Response::new();
        response.set_code(HttpStatus::NotFound);

        assert_eq!(response.status_code(), 404);
        assert_eq!(response.information(), "Not Found");
    }

    #[test]
    fn test_redirect_head() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut response = Response::found("/login");
        response.set_date(date);

        let response_str = to_string(&response.as_bytes());
        assert_eq!(
            response_str,
            "HTTP/1.1 302 Found\r\nLocation: /login\r\nContent-Length: 0\r\nDate: Fri, 01 Mar 2024 12:00:00 GMT\r\n\r\n"
        );
    }

    #[test]
    fn test_no_content_has_no_length() {
        let mut response = Response::with_status(HttpStatus::NoContent);
        response.set_content("text/plain", "ignored");
        let response_str = to_string(&response.as_bytes());
        assert_eq!(response_str, "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn test_set_and_add_header() {
        let mut response = Response::new();
        response.set_header(HeaderName::custom("X-Trace"), "1");
        response.set_header(HeaderName::custom("x-trace"), "2");
        response.add_header(StandardHeader::SetCookie, "a=1");
        response.add_header(StandardHeader::SetCookie, "b=2");
        // 手动设置的长度被忽略
        response.set_header(StandardHeader::ContentLength, "99");

        let response_str = to_string(&response.as_bytes());
        assert!(response_str.contains("X-Trace: 2\r\n"));
        assert!(!response_str.contains("X-Trace: 1"));
        assert!(response_str.contains("Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n"));
        assert_eq!(response_str.matches("Content-Length").count(), 1);
        assert!(response_str.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_method_not_allowed_allow_header() {
        let not_allowed =
            MethodNotAllowed::new(&[HttpRequestMethod::Get, HttpRequestMethod::Head]);
        assert_eq!(not_allowed.response().status_code(), 405);
        assert_eq!(not_allowed.response().header("Allow"), Some("GET, HEAD"));
    }

    #[test]
    fn test_write_file_and_head_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.html");
        std::fs::write(&path, "<!DOCTYPE html>").unwrap();

        let mut response = Response::new();
        response.set_file(&path).unwrap();

        let mut out = Vec::new();
        response.write_to(&mut out, false).unwrap();
        let response_str = to_string(&out);
        assert!(response_str.contains("Content-Type: text/html;charset=utf-8\r\n"));
        assert!(response_str.contains("Content-Length: 15\r\n"));
        assert!(response_str.ends_with("<!DOCTYPE html>"));

        let mut out = Vec::new();
        response.write_to(&mut out, true).unwrap();
        let response_str = to_string(&out);
        assert!(response_str.contains("Content-Length: 15\r\n"));
        assert!(!response_str.contains("<!DOCTYPE html>"));
    }

    #[test]
    fn test_missing_file() {
        let mut response = Response::new();
        assert!(response.set_file(Path::new("/definitely/not/here.html")).is_err());
    }
}
