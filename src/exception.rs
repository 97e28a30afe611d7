// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了 HTTP 交换引擎在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖了协议解析错误、请求体接收错误、路由编译错误以及会话错误。
//! - **语义映射**：每个变体都通过 [`Exception::status`] 对应一个 HTTP 状态码，
//!   服务端循环据此生成错误响应。
//! - **用户友好**：通过实现 `std::fmt::Display`，确保错误信息可以被安全地记录到日志。

use std::{fmt, io};

use crate::param::HttpStatus;

/// 交换引擎处理请求过程中发生的异常类型。
#[derive(Debug)]
pub enum Exception {
    /// 请求行或标头中出现了非法的 UTF-8 字节序列。
    RequestIsNotUtf8,
    /// 请求方法无法识别。
    InvalidMethod,
    /// 请求目标不以 `/` 开头，或者缺失。
    InvalidTarget,
    /// 协议版本字段格式错误（不是 `HTTP/x.y`）。
    InvalidProtocol,
    /// 请求行中出现了孤立的 CR，没有以 CRLF 结束。
    InvalidRequestLine,
    /// 标头行语法错误（缺少冒号、名称为空、名称包含空白等）。
    InvalidHeader,
    /// 标头折叠（obs-fold），HTTP/1.1 已废弃该语法。
    HeaderFolding,
    /// `Content-Length` 不是合法的十进制整数，或者为负数。
    InvalidContentLength,
    /// 路径或查询字符串中的百分号编码不合法。
    InvalidPercentEncoding,
    /// 读取请求体时连接提前关闭。
    UnexpectedEof,
    /// 请求目标超过了缓冲区上限。对应 `414 URI Too Long`。
    UriTooLong,
    /// 标头总大小超过了缓冲区上限。对应 `431 Request Header Fields Too Large`。
    HeadersTooLarge,
    /// 请求体超过了配置的最大值。对应 `413 Content Too Large`。
    BodyTooLarge,
    /// 请求体的媒体类型不被处理器接受。对应 `415 Unsupported Media Type`。
    UnsupportedMediaType,
    /// 客户端使用了服务器不支持的 HTTP 协议主版本。
    UnsupportedHttpVersion,
    /// 尚未实现的协议特性，例如分块传输编码。
    NotImplemented(&'static str),
    /// 没有任何路由匹配请求路径。
    NotFound,
    /// 路由路径表达式非法，在注册路由时产生。
    InvalidPathExpression(String),
    /// 路由注册错误：条件引用了不存在的变量、方法重复注册、没有处理器等。
    InvalidRoute(String),
    /// 会话已经被作废，任何读写都会失败。
    SessionInvalidated,
    /// 配置文件无法读取或解析。
    Config(String),
    /// 临时文件或套接字的 I/O 错误，不在引擎内部重试。
    Io(io::Error),
}

use Exception::*;

impl Exception {
    /// 将异常映射为返回给客户端的状态码。
    pub fn status(&self) -> HttpStatus {
        match self {
            RequestIsNotUtf8 | InvalidMethod | InvalidTarget | InvalidProtocol
            | InvalidRequestLine | InvalidHeader | HeaderFolding | InvalidContentLength
            | InvalidPercentEncoding | UnexpectedEof => HttpStatus::BadRequest,
            UriTooLong => HttpStatus::UriTooLong,
            HeadersTooLarge => HttpStatus::RequestHeaderFieldsTooLarge,
            BodyTooLarge => HttpStatus::ContentTooLarge,
            UnsupportedMediaType => HttpStatus::UnsupportedMediaType,
            UnsupportedHttpVersion => HttpStatus::HttpVersionNotSupported,
            NotImplemented(_) => HttpStatus::NotImplemented,
            NotFound => HttpStatus::NotFound,
            InvalidPathExpression(_) | InvalidRoute(_) | SessionInvalidated | Config(_) | Io(_) => {
                HttpStatus::InternalServerError
            }
        }
    }

    /// 请求或请求体无法按预期解析。这类错误发生后连接的读取位置不可靠，需要关闭连接。
    pub fn is_parse_error(&self) -> bool {
        matches!(self.status().code(), 400 | 413 | 414 | 415 | 431 | 501 | 505)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            InvalidMethod => write!(f, "Invalid request method"),
            InvalidTarget => write!(f, "Invalid request target"),
            InvalidProtocol => write!(f, "Invalid protocol version"),
            InvalidRequestLine => write!(f, "Invalid request line terminator"),
            InvalidHeader => write!(f, "Invalid header line"),
            HeaderFolding => write!(f, "Obsolete header line folding"),
            InvalidContentLength => write!(f, "Invalid Content-Length value"),
            InvalidPercentEncoding => write!(f, "Invalid percent-encoded sequence"),
            UnexpectedEof => write!(f, "Unexpected end of stream"),
            UriTooLong => write!(f, "Request target too long (414)"),
            HeadersTooLarge => write!(f, "Request header fields too large (431)"),
            BodyTooLarge => write!(f, "Request body too large (413)"),
            UnsupportedMediaType => write!(f, "Unsupported media type (415)"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            NotImplemented(feature) => write!(f, "Not implemented: {}", feature),
            NotFound => write!(f, "No route matched (404)"),
            InvalidPathExpression(msg) => write!(f, "Invalid path expression: {}", msg),
            InvalidRoute(msg) => write!(f, "Invalid route: {}", msg),
            SessionInvalidated => write!(f, "Session has been invalidated"),
            Config(msg) => write!(f, "Configuration error: {}", msg),
            Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors_map_to_bad_request() {
        for e in [InvalidMethod, InvalidHeader, HeaderFolding, UnexpectedEof] {
            assert_eq!(e.status(), HttpStatus::BadRequest);
            assert!(e.is_parse_error());
        }
    }

    #[test]
    fn test_size_limits_map_to_dedicated_codes() {
        assert_eq!(UriTooLong.status().code(), 414);
        assert_eq!(HeadersTooLarge.status().code(), 431);
        assert_eq!(BodyTooLarge.status().code(), 413);
    }

    #[test]
    fn test_chunked_is_not_implemented() {
        let e = NotImplemented("chunked transfer-encoding");
        assert_eq!(e.status().code(), 501);
        assert!(e.to_string().contains("chunked"));
    }

    #[test]
    fn test_unsupported_media_type_closes_connection() {
        assert_eq!(UnsupportedMediaType.status().code(), 415);
        assert!(UnsupportedMediaType.is_parse_error());
        assert!(InvalidRequestLine.is_parse_error());
    }

    #[test]
    fn test_io_error_is_internal() {
        let e: Exception = io::Error::new(io::ErrorKind::Other, "disk full").into();
        assert_eq!(e.status().code(), 500);
        assert!(!e.is_parse_error());
    }
}
