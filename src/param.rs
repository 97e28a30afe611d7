// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了交换引擎遵循的 HTTP/1.1 协议相关常量和数据结构，包括：
//! - 固定的状态码分类及其原因短语（Reason Phrase）。
//! - HTTP 方法、版本的强类型枚举。
//! - 启动时一次性构建、之后只读的状态行字节表。

use lazy_static::lazy_static;
use std::fmt;

/// 服务器名称标识，仅用于启动日志
pub const SERVER_NAME: &str = "wayserver";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本，默认不保持连接
    V1_0,
    /// HTTP/1.1 版本
    V1_1,
}

impl HttpVersion {
    /// 由请求行中解析出的主次版本号构造。主版本不为 1 时返回 `None`。
    pub fn from_digits(major: u8, minor: u8) -> Option<Self> {
        match (major, minor) {
            (1, 0) => Some(HttpVersion::V1_0),
            (1, _) => Some(HttpVersion::V1_1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        }
    }
}

/// 标准 HTTP 请求方法
///
/// 枚举的声明顺序即 `Allow` 标头中方法的输出顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpRequestMethod {
    /// 获取资源
    Get,
    /// 获取资源的元数据（不包含响应体）
    Head,
    /// 提交数据或执行操作
    Post,
    /// 替换资源
    Put,
    /// 部分修改资源
    Patch,
    /// 删除资源
    Delete,
    /// 查询服务器支持的选项
    Options,
    /// 回显请求
    Trace,
    /// 建立隧道
    Connect,
}

impl HttpRequestMethod {
    /// 所有方法，按 `Allow` 输出顺序排列
    pub const ALL: [HttpRequestMethod; 9] = [
        HttpRequestMethod::Get,
        HttpRequestMethod::Head,
        HttpRequestMethod::Post,
        HttpRequestMethod::Put,
        HttpRequestMethod::Patch,
        HttpRequestMethod::Delete,
        HttpRequestMethod::Options,
        HttpRequestMethod::Trace,
        HttpRequestMethod::Connect,
    ];

    /// 方法名的标准大写形式
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpRequestMethod::Get => "GET",
            HttpRequestMethod::Head => "HEAD",
            HttpRequestMethod::Post => "POST",
            HttpRequestMethod::Put => "PUT",
            HttpRequestMethod::Patch => "PATCH",
            HttpRequestMethod::Delete => "DELETE",
            HttpRequestMethod::Options => "OPTIONS",
            HttpRequestMethod::Trace => "TRACE",
            HttpRequestMethod::Connect => "CONNECT",
        }
    }

    /// 以首字节选择候选方法，再比较完整的方法名。方法名大小写敏感。
    pub fn from_bytes(token: &[u8]) -> Option<Self> {
        let candidates: &[HttpRequestMethod] = match token.first()? {
            b'C' => &[HttpRequestMethod::Connect],
            b'D' => &[HttpRequestMethod::Delete],
            b'G' => &[HttpRequestMethod::Get],
            b'H' => &[HttpRequestMethod::Head],
            b'O' => &[HttpRequestMethod::Options],
            b'P' => &[
                HttpRequestMethod::Post,
                HttpRequestMethod::Put,
                HttpRequestMethod::Patch,
            ],
            b'T' => &[HttpRequestMethod::Trace],
            _ => return None,
        };
        candidates
            .iter()
            .copied()
            .find(|m| m.as_str().as_bytes() == token)
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 引擎对客户端暴露的固定状态码分类。
///
/// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpStatus {
    Ok,
    Created,
    NoContent,
    MovedPermanently,
    Found,
    SeeOther,
    NotModified,
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    LengthRequired,
    ContentTooLarge,
    UriTooLong,
    UnsupportedMediaType,
    UnprocessableContent,
    RequestHeaderFieldsTooLarge,
    InternalServerError,
    NotImplemented,
    HttpVersionNotSupported,
}

impl HttpStatus {
    /// 全部状态，顺序与 [`HttpStatus::index`] 一致
    pub const ALL: [HttpStatus; 20] = [
        HttpStatus::Ok,
        HttpStatus::Created,
        HttpStatus::NoContent,
        HttpStatus::MovedPermanently,
        HttpStatus::Found,
        HttpStatus::SeeOther,
        HttpStatus::NotModified,
        HttpStatus::BadRequest,
        HttpStatus::Forbidden,
        HttpStatus::NotFound,
        HttpStatus::MethodNotAllowed,
        HttpStatus::LengthRequired,
        HttpStatus::ContentTooLarge,
        HttpStatus::UriTooLong,
        HttpStatus::UnsupportedMediaType,
        HttpStatus::UnprocessableContent,
        HttpStatus::RequestHeaderFieldsTooLarge,
        HttpStatus::InternalServerError,
        HttpStatus::NotImplemented,
        HttpStatus::HttpVersionNotSupported,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn code(&self) -> u16 {
        match self {
            HttpStatus::Ok => 200,
            HttpStatus::Created => 201,
            HttpStatus::NoContent => 204,
            HttpStatus::MovedPermanently => 301,
            HttpStatus::Found => 302,
            HttpStatus::SeeOther => 303,
            HttpStatus::NotModified => 304,
            HttpStatus::BadRequest => 400,
            HttpStatus::Forbidden => 403,
            HttpStatus::NotFound => 404,
            HttpStatus::MethodNotAllowed => 405,
            HttpStatus::LengthRequired => 411,
            HttpStatus::ContentTooLarge => 413,
            HttpStatus::UriTooLong => 414,
            HttpStatus::UnsupportedMediaType => 415,
            HttpStatus::UnprocessableContent => 422,
            HttpStatus::RequestHeaderFieldsTooLarge => 431,
            HttpStatus::InternalServerError => 500,
            HttpStatus::NotImplemented => 501,
            HttpStatus::HttpVersionNotSupported => 505,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            HttpStatus::Ok => "OK",
            HttpStatus::Created => "Created",
            HttpStatus::NoContent => "No Content",
            HttpStatus::MovedPermanently => "Moved Permanently",
            HttpStatus::Found => "Found",
            HttpStatus::SeeOther => "See Other",
            HttpStatus::NotModified => "Not Modified",
            HttpStatus::BadRequest => "Bad Request",
            HttpStatus::Forbidden => "Forbidden",
            HttpStatus::NotFound => "Not Found",
            HttpStatus::MethodNotAllowed => "Method Not Allowed",
            HttpStatus::LengthRequired => "Length Required",
            HttpStatus::ContentTooLarge => "Content Too Large",
            HttpStatus::UriTooLong => "URI Too Long",
            HttpStatus::UnsupportedMediaType => "Unsupported Media Type",
            HttpStatus::UnprocessableContent => "Unprocessable Content",
            HttpStatus::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            HttpStatus::InternalServerError => "Internal Server Error",
            HttpStatus::NotImplemented => "Not Implemented",
            HttpStatus::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// 根据数字状态码查找，分类之外的状态码返回 `None`
    pub fn from_code(code: u16) -> Option<Self> {
        HttpStatus::ALL.iter().copied().find(|s| s.code() == code)
    }

    /// 该状态的响应是否禁止携带响应体（因而也不写 `Content-Length`）
    pub fn forbids_body(&self) -> bool {
        matches!(self, HttpStatus::NoContent | HttpStatus::NotModified)
    }

    /// 预先渲染好的状态行，例如 `HTTP/1.1 302 Found\r\n`
    pub fn status_line(&self) -> &'static [u8] {
        &STATUS_LINES[self.index()]
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason_phrase())
    }
}

lazy_static! {
    /// 状态行字节表。
    ///
    /// 先在可增长的 `Vec` 中逐项构建，再冻结为只读切片发布；启动之后不再有任何写入。
    static ref STATUS_LINES: Box<[Vec<u8>]> = {
        let mut lines = Vec::with_capacity(HttpStatus::ALL.len());
        for status in HttpStatus::ALL.iter() {
            let line = format!(
                "{} {} {}{}",
                HttpVersion::V1_1.as_str(),
                status.code(),
                status.reason_phrase(),
                CRLF
            );
            lines.push(line.into_bytes());
        }
        lines.into_boxed_slice()
    };
}
