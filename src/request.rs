// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、目标、版本），以逐字节、只前进的状态机实现。
//! 2. 标头（Headers）的解析，标准名称查表识别，其余名称按小写字面值保存。
//! 3. `Content-Length`、`Transfer-Encoding` 与 `Connection` 的语义检查。
//!
//! 请求体不在这里读取，见 [`crate::body`]。

use log::{debug, error};
use std::io::Cursor;

use crate::{
    exception::Exception,
    headers::{is_token_char, HeaderName, Headers, StandardHeader},
    input::SocketInput,
    param::*,
    util::{decode_pairs, percent_decode},
};

/// 请求行的解析状态，只会向后转移。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Method,
    Target,
    Version,
}

/// 标头行的解析状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    Name,
    /// 冒号之后、值之前的空白
    Space,
    Value,
}

/// 表示一个完整的 HTTP 请求头部。
///
/// 该结构体不包含请求体，主要用于路由分发。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法
    method: HttpRequestMethod,
    /// 原始请求目标（包含查询字符串）
    target: String,
    /// 百分号解码后的路径
    path: String,
    /// 原始查询字符串（不含 `?`），按需解码
    query: Option<String>,
    /// HTTP 协议版本
    version: HttpVersion,
    headers: Headers,
    /// 校验过的请求体长度，未声明时为 `None`
    content_length: Option<u64>,
    keep_alive: bool,
}

impl Request {
    /// 从套接字输入中解析下一个请求头部。
    ///
    /// 连接在请求开始前被客户端正常关闭时返回 `Ok(None)`。
    ///
    /// # 参数
    /// * `input` - 连接的输入缓冲。
    /// * `max_body_size` - 允许的最大请求体长度，超过时返回 `BodyTooLarge`。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn parse(
        input: &mut SocketInput,
        max_body_size: u64,
        id: u128,
    ) -> Result<Option<Self>, Exception> {
        input.compact();

        // 1. 请求行，允许前导空行
        let line = loop {
            match input.read_line(Exception::UriTooLong)? {
                None => return Ok(None),
                Some(range) if range.is_empty() => continue,
                Some(range) => break range,
            }
        };
        let (method, target, version) = match parse_request_line(input.line(line)) {
            Ok(parts) => parts,
            Err(e) => {
                error!("[ID{}]HTTP请求行格式不正确：{}", id, e);
                return Err(e);
            }
        };
        let (path, query) = Request::parse_target(&target)?;

        // 2. 标头，直到空行
        let mut headers = Headers::new();
        loop {
            let range = input
                .read_line(Exception::HeadersTooLarge)?
                .ok_or(Exception::UnexpectedEof)?;
            if range.is_empty() {
                break;
            }
            let (name, value) = match parse_header_line(input.line(range)) {
                Ok(header) => header,
                Err(e) => {
                    error!("[ID{}]HTTP标头格式不正确：{}", id, e);
                    return Err(e);
                }
            };
            headers.push(name, value);
        }

        // 3. 语义检查
        if headers.get_standard(StandardHeader::TransferEncoding).is_some() {
            error!("[ID{}]不支持Transfer-Encoding", id);
            return Err(Exception::NotImplemented("transfer-encoding"));
        }
        let content_length = parse_content_length(&headers)?;
        if let Some(length) = content_length {
            if length > max_body_size {
                error!("[ID{}]请求体长度{}超过上限{}", id, length, max_body_size);
                return Err(Exception::BodyTooLarge);
            }
        }
        let keep_alive = compute_keep_alive(version, &headers);

        debug!("[ID{}]{} {} {}", id, method, target, version);
        Ok(Some(Request {
            method,
            target,
            path,
            query,
            version,
            headers,
            content_length,
            keep_alive,
        }))
    }

    /// 从完整的请求字节构建 `Request`，不限制请求体长度。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        // 多留一个字节，保证读到末尾时得到的是 EOF 而不是缓冲区溢出
        let len = buffer.len() + 1;
        let mut input = SocketInput::new(Cursor::new(buffer.to_vec()), len, len);
        Request::parse(&mut input, u64::MAX, id)?.ok_or(Exception::UnexpectedEof)
    }

    /// 拆分请求目标，返回解码后的路径与原始查询字符串。
    ///
    /// 路径中的 `+` 保持原样；空查询字符串（`/a?`）视为没有查询。
    pub fn parse_target(target: &str) -> Result<(String, Option<String>), Exception> {
        if target == "*" {
            return Ok(("*".to_string(), None));
        }
        if !target.starts_with('/') {
            return Err(Exception::InvalidTarget);
        }
        let (raw_path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q).filter(|q| !q.is_empty())),
            None => (target, None),
        };
        let path = percent_decode(raw_path, false)?;
        Ok((path, query.map(|q| q.to_string())))
    }
}

fn parse_request_line(line: &[u8]) -> Result<(HttpRequestMethod, String, HttpVersion), Exception> {
    let mut state = LineState::Method;
    let mut method = None;
    let mut target_start = 0;
    let mut target = None;
    let mut version_start = 0;

    for (i, &b) in line.iter().enumerate() {
        // CRLF 已被剥离，剩下的 CR 都是孤立的
        if b == b'\r' {
            return Err(Exception::InvalidRequestLine);
        }
        match state {
            LineState::Method => {
                if b == b' ' {
                    method = Some(HttpRequestMethod::from_bytes(&line[..i]).ok_or(Exception::InvalidMethod)?);
                    target_start = i + 1;
                    state = LineState::Target;
                } else if !is_token_char(b) {
                    return Err(Exception::InvalidMethod);
                }
            }
            LineState::Target => {
                if b == b' ' {
                    if i == target_start {
                        return Err(Exception::InvalidTarget);
                    }
                    // 此前的每个字节都已确认是可见 ASCII
                    target = Some(String::from_utf8_lossy(&line[target_start..i]).into_owned());
                    version_start = i + 1;
                    state = LineState::Version;
                } else if !(0x21..=0x7e).contains(&b) {
                    return Err(Exception::InvalidTarget);
                }
            }
            LineState::Version => {
                if b == b' ' {
                    return Err(Exception::InvalidProtocol);
                }
            }
        }
    }

    match state {
        LineState::Method => Err(Exception::InvalidMethod),
        LineState::Target => Err(Exception::InvalidTarget),
        LineState::Version => {
            let version = parse_version(&line[version_start..])?;
            let method = method.ok_or(Exception::InvalidMethod)?;
            let target = target.ok_or(Exception::InvalidTarget)?;
            if target == "*" && method != HttpRequestMethod::Options {
                return Err(Exception::InvalidTarget);
            }
            Ok((method, target, version))
        }
    }
}

/// `HTTP/<digit>.<digit>`
fn parse_version(raw: &[u8]) -> Result<HttpVersion, Exception> {
    match raw {
        [b'H', b'T', b'T', b'P', b'/', major, b'.', minor]
            if major.is_ascii_digit() && minor.is_ascii_digit() =>
        {
            HttpVersion::from_digits(major - b'0', minor - b'0')
                .ok_or(Exception::UnsupportedHttpVersion)
        }
        _ => Err(Exception::InvalidProtocol),
    }
}

fn parse_header_line(line: &[u8]) -> Result<(HeaderName, String), Exception> {
    let mut state = HeaderState::Name;
    let mut name_end = 0;
    let mut value_start = line.len();
    let mut value_end = line.len();

    for (i, &b) in line.iter().enumerate() {
        match state {
            HeaderState::Name => {
                if b == b':' {
                    if i == 0 {
                        return Err(Exception::InvalidHeader);
                    }
                    name_end = i;
                    state = HeaderState::Space;
                } else if (b == b' ' || b == b'\t') && i == 0 {
                    return Err(Exception::HeaderFolding);
                } else if !is_token_char(b) {
                    return Err(Exception::InvalidHeader);
                }
            }
            HeaderState::Space => {
                if b == b' ' || b == b'\t' {
                    continue;
                }
                if b < 0x20 || b == 0x7f {
                    return Err(Exception::InvalidHeader);
                }
                value_start = i;
                state = HeaderState::Value;
            }
            HeaderState::Value => {
                if (b < 0x20 && b != b'\t') || b == 0x7f {
                    return Err(Exception::InvalidHeader);
                }
            }
        }
    }

    match state {
        HeaderState::Name => Err(Exception::InvalidHeader),
        HeaderState::Space | HeaderState::Value => {
            while value_end > value_start && matches!(line[value_end - 1], b' ' | b'\t') {
                value_end -= 1;
            }
            let value = std::str::from_utf8(&line[value_start.min(value_end)..value_end])
                .map_err(|_| Exception::RequestIsNotUtf8)?;
            Ok((HeaderName::from_bytes(&line[..name_end]), value.to_string()))
        }
    }
}

/// 所有 `Content-Length` 值（含逗号分隔的列表）必须是同一个非负十进制整数。
fn parse_content_length(headers: &Headers) -> Result<Option<u64>, Exception> {
    let name = HeaderName::Standard(StandardHeader::ContentLength);
    let mut length = None;
    for raw in headers.get_all(&name) {
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Exception::InvalidContentLength);
            }
            let value: u64 = part.parse().map_err(|_| Exception::InvalidContentLength)?;
            match length {
                Some(existing) if existing != value => {
                    return Err(Exception::InvalidContentLength)
                }
                _ => length = Some(value),
            }
        }
    }
    Ok(length)
}

fn compute_keep_alive(version: HttpVersion, headers: &Headers) -> bool {
    let mut keep_alive = version == HttpVersion::V1_1;
    let name = HeaderName::Standard(StandardHeader::Connection);
    for value in headers.get_all(&name) {
        for token in value.split(',').map(str::trim) {
            if token.eq_ignore_ascii_case("close") {
                return false;
            }
            if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
    }
    keep_alive
}

impl Request {
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 原始请求目标
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 解码后的路径，不含查询字符串
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// 查询参数的第一个值。参数按需解码，`+` 视为空格。
    pub fn query_param(&self, name: &str) -> Result<Option<String>, Exception> {
        Ok(self.query_params(name)?.into_iter().next())
    }

    /// 查询参数的全部值，保持出现顺序
    pub fn query_params(&self, name: &str) -> Result<Vec<String>, Exception> {
        match &self.query {
            Some(query) => decode_pairs(query, name),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 验证常规 GET 请求的解析，包括 Path 和 Headers
    #[test]
    fn test_parse_get_request() {
        let request_str = "GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test-Browser\r\nAccept-Encoding: gzip, deflate, br\r\n\r\n";
        let buffer = request_str.as_bytes().to_vec();

        let request = Request::try_from(&buffer, 0).unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.path(), "/");
        assert_eq!(request.header("user-agent"), Some("Test-Browser"));
        assert_eq!(
            request.headers().get_standard(StandardHeader::AcceptEncoding),
            Some("gzip, deflate, br")
        );
        assert!(request.keep_alive());
    }

    /// 验证 HEAD 请求的解析
    #[test]
    fn test_parse_head_request() {
        let request_str =
            "HEAD /index.html HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test-Agent\r\n\r\n";
        let buffer = request_str.as_bytes().to_vec();

        let request = Request::try_from(&buffer, 0).unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Head);
        assert_eq!(request.path(), "/index.html");
    }

    /// 验证 OPTIONS 请求（常用于 CORS 预检）
    #[test]
    fn test_parse_options_request() {
        let request_str = "OPTIONS * HTTP/1.1\r\nHost: localhost:7878\r\n\r\n";
        let buffer = request_str.as_bytes().to_vec();

        let request = Request::try_from(&buffer, 0).unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Options);
        assert_eq!(request.path(), "*");
    }

    #[test]
    fn test_parse_post_request() {
        let request_str =
            "POST /submit HTTP/1.1\r\nHost: localhost:7878\r\nContent-Length: 10\r\n\r\ntest=value";
        let buffer = request_str.as_bytes().to_vec();

        let request = Request::try_from(&buffer, 0).unwrap();

        assert_eq!(request.method(), HttpRequestMethod::Post);
        assert_eq!(request.path(), "/submit");
        assert_eq!(request.content_length(), Some(10));
    }

    /// 方法名大小写敏感，小写的 get 不被接受
    #[test]
    fn test_lowercase_method_is_rejected() {
        let buffer = b"get / HTTP/1.1\r\n\r\n".to_vec();

        match Request::try_from(&buffer, 0) {
            Err(Exception::InvalidMethod) => {}
            other => panic!("Expected InvalidMethod error, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_http_version() {
        let buffer = b"GET / HTTP/2.0\r\nHost: localhost:7878\r\n\r\n".to_vec();

        let result = Request::try_from(&buffer, 0);

        match result.unwrap_err() {
            Exception::UnsupportedHttpVersion => {}
            e => panic!("Expected UnsupportedHttpVersion error, got {:?}", e),
        }
    }

    #[test]
    fn test_malformed_version() {
        for line in ["GET / HTTP/1\r\n\r\n", "GET / HTTQ/1.1\r\n\r\n", "GET / HTTP/1.1 x\r\n\r\n"] {
            match Request::try_from(line.as_bytes(), 0) {
                Err(Exception::InvalidProtocol) => {}
                other => panic!("Expected InvalidProtocol for {:?}, got {:?}", line, other),
            }
        }
    }

    #[test]
    fn test_http_1_0_defaults_to_close() {
        let request = Request::try_from(b"GET / HTTP/1.0\r\n\r\n", 0).unwrap();
        assert_eq!(request.version(), HttpVersion::V1_0);
        assert!(!request.keep_alive());

        let request =
            Request::try_from(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n", 0).unwrap();
        assert!(request.keep_alive());

        let request = Request::try_from(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n", 0).unwrap();
        assert!(!request.keep_alive());
    }

    #[test]
    fn test_invalid_utf8_header_value() {
        let mut buffer = b"GET / HTTP/1.1\r\nX-Name: ".to_vec();
        buffer.extend_from_slice(&[0xFF, 0xFE]);
        buffer.extend_from_slice(b"\r\n\r\n");

        match Request::try_from(&buffer, 0) {
            Err(Exception::RequestIsNotUtf8) => {}
            other => panic!("Expected RequestIsNotUtf8 error, got {:?}", other),
        }
    }

    /// 验证 Header 字段名是否大小写不敏感，值两侧空白被去除
    #[test]
    fn test_case_insensitive_headers() {
        let request_str = "GET / HTTP/1.1\r\nhost: localhost:7878\r\nX-CUSTOM:   padded value \t\r\n\r\n";

        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.header("Host"), Some("localhost:7878"));
        assert_eq!(request.header("x-custom"), Some("padded value"));
    }

    #[test]
    fn test_header_folding_is_rejected() {
        let request_str = "GET / HTTP/1.1\r\nX-A: one\r\n two\r\n\r\n";
        match Request::try_from(request_str.as_bytes(), 0) {
            Err(Exception::HeaderFolding) => {}
            other => panic!("Expected HeaderFolding error, got {:?}", other),
        }
    }

    #[test]
    fn test_header_syntax_errors() {
        for request_str in [
            "GET / HTTP/1.1\r\nNoColon\r\n\r\n",
            "GET / HTTP/1.1\r\n: empty-name\r\n\r\n",
            "GET / HTTP/1.1\r\nBad Name: x\r\n\r\n",
        ] {
            match Request::try_from(request_str.as_bytes(), 0) {
                Err(Exception::InvalidHeader) => {}
                other => panic!("Expected InvalidHeader for {:?}, got {:?}", request_str, other),
            }
        }
    }

    #[test]
    fn test_empty_header_value() {
        let request = Request::try_from(b"GET / HTTP/1.1\r\nX-Empty:\r\n\r\n", 0).unwrap();
        assert_eq!(request.header("x-empty"), Some(""));
    }

    #[test]
    fn test_content_length_validation() {
        for value in ["-1", "abc", "1, 2", ""] {
            let request_str = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", value);
            match Request::try_from(request_str.as_bytes(), 0) {
                Err(Exception::InvalidContentLength) => {}
                other => panic!("Expected InvalidContentLength for {:?}, got {:?}", value, other),
            }
        }

        let request =
            Request::try_from(b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\n", 0)
                .unwrap();
        assert_eq!(request.content_length(), Some(5));
    }

    #[test]
    fn test_body_size_limit() {
        let mut input = SocketInput::new(
            Cursor::new(b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n".to_vec()),
            128,
            128,
        );
        match Request::parse(&mut input, 99, 0) {
            Err(Exception::BodyTooLarge) => {}
            other => panic!("Expected BodyTooLarge error, got {:?}", other),
        }
    }

    /// 请求行只能以 CRLF 或 LF 结束，孤立的 CR 不被接受
    #[test]
    fn test_bare_carriage_return_in_request_line() {
        for request_str in [
            "GET / HTTP/1.1\r\r\nHost: a\r\n\r\n",
            "GET /a\rb HTTP/1.1\r\n\r\n",
            "GET\r/ HTTP/1.1\r\n\r\n",
        ] {
            let e = Request::try_from(request_str.as_bytes(), 0).unwrap_err();
            assert!(matches!(e, Exception::InvalidRequestLine), "{:?}", request_str);
            assert_eq!(e.status(), HttpStatus::BadRequest);
        }
    }

    #[test]
    fn test_transfer_encoding_not_implemented() {
        let request_str = "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        let e = Request::try_from(request_str.as_bytes(), 0).unwrap_err();
        assert_eq!(e.status(), HttpStatus::NotImplemented);
    }

    #[test]
    fn test_uri_too_long_and_headers_too_large() {
        let long_target = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(300));
        let mut input = SocketInput::new(Cursor::new(long_target.into_bytes()), 128, 256);
        match Request::parse(&mut input, u64::MAX, 0) {
            Err(Exception::UriTooLong) => {}
            other => panic!("Expected UriTooLong error, got {:?}", other),
        }

        let big_headers = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "b".repeat(300));
        let mut input = SocketInput::new(Cursor::new(big_headers.into_bytes()), 128, 256);
        match Request::parse(&mut input, u64::MAX, 0) {
            Err(Exception::HeadersTooLarge) => {}
            other => panic!("Expected HeadersTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_before_request() {
        let mut input = SocketInput::new(Cursor::new(Vec::new()), 128, 128);
        assert!(Request::parse(&mut input, u64::MAX, 0).unwrap().is_none());
    }

    #[test]
    fn test_truncated_headers() {
        match Request::try_from(b"GET / HTTP/1.1\r\nHost: a\r\n", 0) {
            Err(Exception::UnexpectedEof) => {}
            other => panic!("Expected UnexpectedEof error, got {:?}", other),
        }
    }

    /// 确保带查询参数的路径能完整提取
    #[test]
    fn test_path_with_query_string() {
        let request_str =
            "GET /search%20page?id=123&name=a+b%21&id=456&flag HTTP/1.1\r\nHost: localhost:7878\r\n\r\n";

        let request = Request::try_from(request_str.as_bytes(), 0).unwrap();

        assert_eq!(request.target(), "/search%20page?id=123&name=a+b%21&id=456&flag");
        assert_eq!(request.path(), "/search page");
        assert_eq!(request.query(), Some("id=123&name=a+b%21&id=456&flag"));
        assert_eq!(request.query_param("id").unwrap(), Some("123".to_string()));
        assert_eq!(request.query_params("id").unwrap(), vec!["123", "456"]);
        assert_eq!(request.query_param("name").unwrap(), Some("a b!".to_string()));
        assert_eq!(request.query_param("flag").unwrap(), Some(String::new()));
        assert_eq!(request.query_param("missing").unwrap(), None);
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            Request::parse_target("/a%2Fb?x=1").unwrap(),
            ("/a/b".to_string(), Some("x=1".to_string()))
        );
        assert_eq!(Request::parse_target("/a?").unwrap(), ("/a".to_string(), None));
        assert!(Request::parse_target("a/b").is_err());
        assert!(Request::parse_target("/bad%zz").is_err());
    }

    #[test]
    fn test_asterisk_only_for_options() {
        match Request::try_from(b"GET * HTTP/1.1\r\n\r\n", 0) {
            Err(Exception::InvalidTarget) => {}
            other => panic!("Expected InvalidTarget error, got {:?}", other),
        }
    }

    #[test]
    fn test_leading_empty_lines_are_skipped() {
        let request = Request::try_from(b"\r\n\r\nGET /x HTTP/1.1\r\n\r\n", 0).unwrap();
        assert_eq!(request.path(), "/x");
    }
}
