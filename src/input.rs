//! 阻塞套接字输入缓冲。
//!
//! 请求头必须完整地放进一个缓冲区：缓冲区从 `buffer_size_initial` 开始按两倍增长，
//! 直到 `buffer_size_max`，仍然找不到行尾时由调用方决定报告 414 还是 431。
//! 请求体读取时先消费缓冲区中剩余的字节，再直接从底层读取。

use std::io::{self, Read};
use std::ops::Range;

use crate::exception::Exception;

pub struct SocketInput {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
    /// 下一个未消费字节
    pos: usize,
    /// 已填充字节的末尾
    end: usize,
    max: usize,
}

impl SocketInput {
    pub fn new(reader: impl Read + Send + 'static, initial: usize, max: usize) -> Self {
        let max = max.max(1);
        Self {
            reader: Box::new(reader),
            buffer: vec![0; initial.clamp(1, max)],
            pos: 0,
            end: 0,
            max,
        }
    }

    /// 在解析新请求前调用，把尚未消费的字节移动到缓冲区头部。
    pub fn compact(&mut self) {
        if self.pos > 0 {
            self.buffer.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.pos = 0;
        }
    }

    /// 缓冲区中尚未消费的字节数
    pub fn buffered(&self) -> usize {
        self.end - self.pos
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn grow(&mut self) -> bool {
        if self.buffer.len() >= self.max {
            return false;
        }
        let new_len = (self.buffer.len() * 2).min(self.max);
        self.buffer.resize(new_len, 0);
        true
    }

    /// 读取一行，返回不含行尾（`\r\n` 或单独的 `\n`）的字节范围。
    ///
    /// 连接在行首处关闭时返回 `Ok(None)`；在行中途关闭时返回 `UnexpectedEof`。
    /// 缓冲区增长到上限仍未找到行尾时返回 `overflow`。
    pub fn read_line(&mut self, overflow: Exception) -> Result<Option<Range<usize>>, Exception> {
        let mut scanned = self.pos;
        loop {
            if let Some(offset) = self.buffer[scanned..self.end].iter().position(|b| *b == b'\n') {
                let newline = scanned + offset;
                let mut line_end = newline;
                if line_end > self.pos && self.buffer[line_end - 1] == b'\r' {
                    line_end -= 1;
                }
                let range = self.pos..line_end;
                self.pos = newline + 1;
                return Ok(Some(range));
            }
            scanned = self.end;

            if self.end == self.buffer.len() && !self.grow() {
                return Err(overflow);
            }
            let n = self.reader.read(&mut self.buffer[self.end..])?;
            if n == 0 {
                return if self.pos == self.end {
                    Ok(None)
                } else {
                    Err(Exception::UnexpectedEof)
                };
            }
            self.end += n;
        }
    }

    pub fn line(&self, range: Range<usize>) -> &[u8] {
        &self.buffer[range]
    }

    /// 丢弃接下来的 `n` 个字节，返回实际丢弃的数量
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        io::copy(&mut self.by_ref().take(n), &mut io::sink())
    }
}

impl Read for SocketInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.end {
            let n = (self.end - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        self.reader.read(buf)
    }
}
