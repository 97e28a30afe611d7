//! # 请求体接收
//!
//! 根据 `Content-Length` 选择存储方式：
//! - 长度为 0 或未声明：`Empty`
//! - 小于内存阈值：一次性读入内存，`InBuffer`
//! - 大于等于阈值：流式写入临时文件，`File`
//!
//! 临时文件只在 [`Body::close`] 时删除一次；错误路径上由 `TempPath` 的析构兜底。

use bytes::Bytes;
use log::{debug, error, warn};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tempfile::{Builder, TempPath};

use crate::{config::Config, exception::Exception, input::SocketInput, util::format_file_size};

const TEMP_PREFIX: &str = "wayserver-request-body-";
const TEMP_SUFFIX: &str = ".tmp";

/// 请求体的存储方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTag {
    Empty,
    InBuffer,
    File,
}

/// 落盘的请求体。持有临时文件路径，删除后路径被清空。
#[derive(Debug)]
pub struct SpooledFile {
    path: Option<TempPath>,
    len: u64,
}

impl SpooledFile {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 删除临时文件。重复调用不会再次删除。
    pub fn delete(&mut self) -> io::Result<()> {
        match self.path.take() {
            Some(path) => {
                debug!("删除请求体临时文件：{}", path.display());
                path.close()
            }
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub enum Body {
    Empty,
    InBuffer(Bytes),
    File(SpooledFile),
}

impl Body {
    /// 从输入中读取 `length` 字节的请求体。
    ///
    /// 连接提前关闭时返回 `UnexpectedEof`，已经创建的临时文件随之删除。
    pub fn ingest(
        input: &mut SocketInput,
        length: Option<u64>,
        config: &Config,
        id: u128,
    ) -> Result<Body, Exception> {
        let length = match length {
            None | Some(0) => return Ok(Body::Empty),
            Some(length) => length,
        };
        if length > config.max_request_body_size() {
            return Err(Exception::BodyTooLarge);
        }

        let threshold = config.in_memory_threshold();
        if length < threshold {
            let mut buffer = vec![0; length as usize];
            input.read_exact(&mut buffer).map_err(|e| eof_or_io(e, id))?;
            debug!("[ID{}]请求体{}字节读入内存", id, length);
            return Ok(Body::InBuffer(Bytes::from(buffer)));
        }

        let mut builder = Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(TEMP_SUFFIX);
        let mut file = match config.body_directory() {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        debug!(
            "[ID{}]请求体{}达到阈值{}，写入临时文件{}",
            id,
            format_file_size(length),
            format_file_size(threshold),
            file.path().display()
        );

        let copied = io::copy(&mut input.by_ref().take(length), file.as_file_mut())?;
        if copied < length {
            error!("[ID{}]请求体不完整：期望{}字节，实际{}字节", id, length, copied);
            // file 在此处被丢弃，临时文件随之删除
            return Err(Exception::UnexpectedEof);
        }

        Ok(Body::File(SpooledFile {
            path: Some(file.into_temp_path()),
            len: length,
        }))
    }

    pub fn tag(&self) -> BodyTag {
        match self {
            Body::Empty => BodyTag::Empty,
            Body::InBuffer(_) => BodyTag::InBuffer,
            Body::File(_) => BodyTag::File,
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::InBuffer(bytes) => bytes.len() as u64,
            Body::File(file) => file.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 落盘请求体的临时文件路径
    pub fn path(&self) -> Option<&Path> {
        match self {
            Body::File(file) => file.path(),
            _ => None,
        }
    }

    /// 以字节形式取出全部内容。落盘的请求体会被整个读回内存。
    pub fn bytes(&self) -> Result<Bytes, Exception> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::InBuffer(bytes) => Ok(bytes.clone()),
            Body::File(_) => {
                let mut buffer = Vec::with_capacity(self.len() as usize);
                self.reader()?.read_to_end(&mut buffer)?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    pub fn text(&self) -> Result<String, Exception> {
        String::from_utf8(self.bytes()?.to_vec()).map_err(|_| Exception::RequestIsNotUtf8)
    }

    pub fn reader(&self) -> Result<Box<dyn Read + '_>, Exception> {
        match self {
            Body::Empty => Ok(Box::new(io::empty())),
            Body::InBuffer(bytes) => Ok(Box::new(&bytes[..])),
            Body::File(file) => match file.path() {
                Some(path) => Ok(Box::new(File::open(path)?)),
                None => Err(Exception::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "request body file already deleted",
                ))),
            },
        }
    }

    /// 释放请求体占用的资源。落盘的请求体在这里删除临时文件，之后状态变为 `Empty`。
    pub fn close(&mut self) -> Result<(), Exception> {
        let result = match self {
            Body::File(file) => file.delete().map_err(Exception::from),
            _ => Ok(()),
        };
        *self = Body::Empty;
        result
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        if let Body::File(file) = self {
            if let Err(e) = file.delete() {
                warn!("无法删除请求体临时文件：{}", e);
            }
        }
    }
}

fn eof_or_io(e: io::Error, id: u128) -> Exception {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        error!("[ID{}]读取请求体时连接提前关闭", id);
        Exception::UnexpectedEof
    } else {
        Exception::Io(e)
    }
}
