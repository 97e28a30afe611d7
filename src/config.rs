use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::exception::Exception;
use crate::util::power_of_two;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    port: u16,
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_buffer_size_initial")]
    buffer_size_initial: usize,
    #[serde(default = "default_buffer_size_max")]
    buffer_size_max: usize,
    #[serde(default = "default_max_request_body_size")]
    max_request_body_size: u64,
    #[serde(default)]
    body_directory: Option<PathBuf>,
    #[serde(default)]
    session: SessionConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_enabled")]
    enabled: bool,
    #[serde(default = "default_cookie_name")]
    cookie_name: String,
    #[serde(default)]
    cookie_path: Option<String>,
    #[serde(default)]
    cookie_max_age: Option<u64>,
    #[serde(default = "default_empty_max_age")]
    empty_max_age: u64,
    #[serde(default = "default_cleanup_interval")]
    cleanup_interval: u64,
}

fn default_buffer_size_initial() -> usize {
    1024
}

fn default_buffer_size_max() -> usize {
    16384 // 16KB，同时是请求体驻留内存的阈值
}

fn default_max_request_body_size() -> u64 {
    10485760 // 10MB
}

fn default_session_enabled() -> bool {
    true
}

fn default_cookie_name() -> String {
    "WAYSESSION".to_string()
}

fn default_empty_max_age() -> u64 {
    300 // 5分钟
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: default_session_enabled(),
            cookie_name: default_cookie_name(),
            cookie_path: None,
            cookie_max_age: None,
            empty_max_age: default_empty_max_age(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: 7878,
            local: true,
            worker_threads: num_cpus::get(),
            buffer_size_initial: default_buffer_size_initial(),
            buffer_size_max: default_buffer_size_max(),
            max_request_body_size: default_max_request_body_size(),
            body_directory: None,
            session: SessionConfig::default(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename)
            .map_err(|e| Exception::Config(format!("no such file {}: {}", filename, e)))?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)?;

        let raw_config = match Self::from_toml_str(&str_val) {
            Ok(c) => c,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        Ok(raw_config)
    }

    /// 解析 TOML 文本并做规范化：线程数为 0 时自动探测，缓冲区大小取整为 2 的幂。
    pub fn from_toml_str(s: &str) -> Result<Self, Exception> {
        let mut raw_config: Config =
            toml::from_str(s).map_err(|e| Exception::Config(e.to_string()))?;
        raw_config.normalize();
        Ok(raw_config)
    }

    fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        self.buffer_size_initial = power_of_two(self.buffer_size_initial);
        self.buffer_size_max = power_of_two(self.buffer_size_max);
        if self.buffer_size_initial > self.buffer_size_max {
            warn!(
                "buffer_size_initial({})大于buffer_size_max({})，将使用后者",
                self.buffer_size_initial, self.buffer_size_max
            );
            self.buffer_size_initial = self.buffer_size_max;
        }
        if self.session.empty_max_age == 0 {
            warn!("session.empty_max_age被设置为0，该值将被改为默认值。");
            self.session.empty_max_age = default_empty_max_age();
        }
        if self.session.cookie_max_age == Some(0) {
            warn!("session.cookie_max_age不能为0，将忽略该设置。");
            self.session.cookie_max_age = None;
        }
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn buffer_size_initial(&self) -> usize {
        self.buffer_size_initial
    }

    pub fn buffer_size_max(&self) -> usize {
        self.buffer_size_max
    }

    /// 请求体长度小于该值时保存在内存中，否则写入临时文件
    pub fn in_memory_threshold(&self) -> u64 {
        self.buffer_size_max as u64
    }

    pub fn max_request_body_size(&self) -> u64 {
        self.max_request_body_size
    }

    pub fn body_directory(&self) -> Option<&Path> {
        self.body_directory.as_deref()
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn with_buffer_sizes(mut self, initial: usize, max: usize) -> Self {
        self.buffer_size_initial = initial;
        self.buffer_size_max = max;
        self.normalize();
        self
    }

    pub fn with_max_request_body_size(mut self, size: u64) -> Self {
        self.max_request_body_size = size;
        self
    }

    pub fn with_body_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.body_directory = Some(dir.into());
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

impl SessionConfig {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn cookie_path(&self) -> Option<&str> {
        self.cookie_path.as_deref()
    }

    pub fn cookie_max_age(&self) -> Option<u64> {
        self.cookie_max_age
    }

    pub fn empty_max_age(&self) -> u64 {
        self.empty_max_age
    }

    pub fn cleanup_interval(&self) -> u64 {
        self.cleanup_interval
    }

    pub fn with_cookie_name(mut self, name: &str) -> Self {
        self.cookie_name = name.to_string();
        self
    }

    pub fn with_cookie_path(mut self, path: &str) -> Self {
        self.cookie_path = Some(path.to_string());
        self
    }

    pub fn with_cookie_max_age(mut self, seconds: u64) -> Self {
        self.cookie_max_age = Some(seconds).filter(|s| *s > 0);
        self
    }

    pub fn with_empty_max_age(mut self, seconds: u64) -> Self {
        if seconds > 0 {
            self.empty_max_age = seconds;
        }
        self
    }
}
