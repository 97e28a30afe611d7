//! # 标头名称与标头表
//!
//! 标准标头名称通过查表识别（快速路径），其余名称以小写字面值保存（慢速路径）。
//! 查找表在首次使用时一次性构建，之后只读。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;

/// 引擎认识的标准标头
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardHeader {
    Accept,
    AcceptEncoding,
    Allow,
    Connection,
    ContentLength,
    ContentType,
    Cookie,
    Date,
    From,
    Host,
    Location,
    SetCookie,
    TransferEncoding,
    UserAgent,
}

impl StandardHeader {
    pub const ALL: [StandardHeader; 14] = [
        StandardHeader::Accept,
        StandardHeader::AcceptEncoding,
        StandardHeader::Allow,
        StandardHeader::Connection,
        StandardHeader::ContentLength,
        StandardHeader::ContentType,
        StandardHeader::Cookie,
        StandardHeader::Date,
        StandardHeader::From,
        StandardHeader::Host,
        StandardHeader::Location,
        StandardHeader::SetCookie,
        StandardHeader::TransferEncoding,
        StandardHeader::UserAgent,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// 写入响应时使用的规范大小写形式
    pub fn capitalized(&self) -> &'static str {
        match self {
            StandardHeader::Accept => "Accept",
            StandardHeader::AcceptEncoding => "Accept-Encoding",
            StandardHeader::Allow => "Allow",
            StandardHeader::Connection => "Connection",
            StandardHeader::ContentLength => "Content-Length",
            StandardHeader::ContentType => "Content-Type",
            StandardHeader::Cookie => "Cookie",
            StandardHeader::Date => "Date",
            StandardHeader::From => "From",
            StandardHeader::Host => "Host",
            StandardHeader::Location => "Location",
            StandardHeader::SetCookie => "Set-Cookie",
            StandardHeader::TransferEncoding => "Transfer-Encoding",
            StandardHeader::UserAgent => "User-Agent",
        }
    }
}

lazy_static! {
    /// 小写名称 -> 标准标头
    static ref STANDARD_NAMES: HashMap<Vec<u8>, StandardHeader> = {
        let mut map = HashMap::with_capacity(StandardHeader::ALL.len());
        for header in StandardHeader::ALL.iter() {
            map.insert(header.capitalized().to_ascii_lowercase().into_bytes(), *header);
        }
        map
    };
}

/// 标头名称：标准名称或自定义名称（已转为小写）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeaderName {
    Standard(StandardHeader),
    Custom(String),
}

impl HeaderName {
    /// 从请求中读取到的原始名称字节构造。调用方需保证字节是合法的 token 字符。
    pub fn from_bytes(raw: &[u8]) -> Self {
        let lower = raw.to_ascii_lowercase();
        match STANDARD_NAMES.get(&lower) {
            Some(header) => HeaderName::Standard(*header),
            None => HeaderName::Custom(String::from_utf8_lossy(&lower).into_owned()),
        }
    }

    pub fn custom(name: &str) -> Self {
        HeaderName::from_bytes(name.as_bytes())
    }

    /// 写入响应时的名称。自定义名称按单词首字母大写输出。
    pub fn capitalized(&self) -> String {
        match self {
            HeaderName::Standard(h) => h.capitalized().to_string(),
            HeaderName::Custom(name) => name
                .split('-')
                .map(|part| {
                    let mut chars = part.chars();
                    match chars.next() {
                        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join("-"),
        }
    }
}

impl From<StandardHeader> for HeaderName {
    fn from(h: StandardHeader) -> Self {
        HeaderName::Standard(h)
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.capitalized())
    }
}

/// 判断字节是否为 RFC 9110 中的 tchar
pub fn is_token_char(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~')
        || b.is_ascii_alphanumeric()
}

/// 按到达顺序保存的请求标头。
///
/// 标准标头额外维护一张按下标索引的首次出现位置表，查找时无需遍历。
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(HeaderName, String)>,
    standard: [Option<usize>; StandardHeader::ALL.len()],
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: HeaderName, value: String) {
        if let HeaderName::Standard(h) = &name {
            let slot = &mut self.standard[h.index()];
            if slot.is_none() {
                *slot = Some(self.entries.len());
            }
        }
        self.entries.push((name, value));
    }

    /// 第一次出现的值
    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        match name {
            HeaderName::Standard(h) => self.get_standard(*h),
            HeaderName::Custom(_) => self
                .entries
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
        }
    }

    pub fn get_standard(&self, header: StandardHeader) -> Option<&str> {
        self.standard[header.index()].map(|i| self.entries[i].1.as_str())
    }

    /// 按名称（大小写不敏感）查找
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(&HeaderName::custom(name))
    }

    /// 同名标头的全部值，保持到达顺序
    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.entries.iter().map(|(n, v)| (n, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.standard = [None; StandardHeader::ALL.len()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_name_lookup_is_case_insensitive() {
        assert_eq!(
            HeaderName::from_bytes(b"content-length"),
            HeaderName::Standard(StandardHeader::ContentLength)
        );
        assert_eq!(
            HeaderName::from_bytes(b"COOKIE"),
            HeaderName::Standard(StandardHeader::Cookie)
        );
    }

    #[test]
    fn test_custom_name_is_lowercased() {
        let name = HeaderName::from_bytes(b"X-Request-Id");
        assert_eq!(name, HeaderName::Custom("x-request-id".to_string()));
        assert_eq!(name.capitalized(), "X-Request-Id");
    }

    #[test]
    fn test_headers_keep_arrival_order() {
        let mut headers = Headers::new();
        headers.push(HeaderName::from_bytes(b"Host"), "a".to_string());
        headers.push(HeaderName::from_bytes(b"X-B"), "b".to_string());
        headers.push(HeaderName::from_bytes(b"x-b"), "c".to_string());

        let names: Vec<String> = headers.iter().map(|(n, _)| n.capitalized()).collect();
        assert_eq!(names, vec!["Host", "X-B", "X-B"]);
        assert_eq!(headers.get_str("X-B"), Some("b"));
        let name = HeaderName::custom("x-b");
        assert_eq!(headers.get_all(&name).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_standard_fast_path_returns_first() {
        let mut headers = Headers::new();
        headers.push(StandardHeader::Cookie.into(), "a=1".to_string());
        headers.push(StandardHeader::Cookie.into(), "b=2".to_string());
        assert_eq!(headers.get_standard(StandardHeader::Cookie), Some("a=1"));
        headers.clear();
        assert!(headers.is_empty());
        assert_eq!(headers.get_standard(StandardHeader::Cookie), None);
    }

    #[test]
    fn test_token_chars() {
        assert!(is_token_char(b'a'));
        assert!(is_token_char(b'-'));
        assert!(!is_token_char(b' '));
        assert!(!is_token_char(b':'));
    }
}
