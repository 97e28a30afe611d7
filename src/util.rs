use crate::exception::Exception;

/// 缓冲区大小下限
pub const MIN_BUFFER_SIZE: usize = 128;

/// 缓冲区大小硬上限
pub const HARD_MAX_BUFFER_SIZE: usize = 1 << 20;

/// 将缓冲区大小向上取整为 2 的幂，并限制在 `[MIN_BUFFER_SIZE, HARD_MAX_BUFFER_SIZE]` 之间
pub fn power_of_two(size: usize) -> usize {
    size.clamp(MIN_BUFFER_SIZE, HARD_MAX_BUFFER_SIZE)
        .next_power_of_two()
        .min(HARD_MAX_BUFFER_SIZE)
}

/// 解码百分号编码。
///
/// `plus_as_space` 为真时 `+` 被解码为空格，仅用于查询字符串；路径中的 `+` 保持原样。
pub fn percent_decode(raw: &str, plus_as_space: bool) -> Result<String, Exception> {
    if !raw.bytes().any(|b| b == b'%' || (plus_as_space && b == b'+')) {
        return Ok(raw.to_string());
    }

    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    return Err(Exception::InvalidPercentEncoding);
                }
                let hi = hex_value(bytes[i + 1]).ok_or(Exception::InvalidPercentEncoding)?;
                let lo = hex_value(bytes[i + 2]).ok_or(Exception::InvalidPercentEncoding)?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| Exception::InvalidPercentEncoding)
}

/// 按 `name=value&...` 格式取出某个名称的全部值，名称与值都按查询字符串规则解码。
///
/// 查询字符串与 `application/x-www-form-urlencoded` 请求体共用这一格式。
pub fn decode_pairs(raw: &str, name: &str) -> Result<Vec<String>, Exception> {
    let mut values = Vec::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (raw_name, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        if percent_decode(raw_name, true)? == name {
            values.push(percent_decode(raw_value, true)?);
        }
    }
    Ok(values)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// 小写十六进制编码
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 0x0f) as usize] as char);
    }
    s
}

pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}
