//! `Cookie` 请求标头解析。
//!
//! 按字符推进的状态机：`Start` 跳过前导空白，`Name` 累积到 `=`，`Value` 累积到 `;` 或结尾。
//! 没有 `=` 或名称为空的片段进入 `Malformed`，整段被丢弃，在下一个 `;` 处重新同步。
//! 同名 cookie 以最后一次出现为准。

use lazy_static::lazy_static;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Name,
    Value,
    Malformed,
}

/// 不可变的 cookie 名值表
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Cookies {
    values: HashMap<String, String>,
}

lazy_static! {
    static ref EMPTY: Arc<Cookies> = Arc::new(Cookies::default());
}

impl Cookies {
    /// 共享的空表
    pub fn empty() -> Arc<Cookies> {
        Arc::clone(&EMPTY)
    }

    /// 解析 `Cookie` 标头的值。标头缺失或没有任何合法的名值对时返回共享的空表。
    pub fn parse(header: Option<&str>) -> Arc<Cookies> {
        let header = match header {
            Some(h) if !h.trim().is_empty() => h,
            _ => return Cookies::empty(),
        };

        let mut values = HashMap::new();
        let mut state = State::Start;
        let mut name_start = 0;
        let mut name_end = 0;
        let mut value_start = 0;

        for (i, c) in header.char_indices() {
            match state {
                State::Start => {
                    if c == ' ' || c == '\t' || c == ';' {
                        continue;
                    }
                    if c == '=' {
                        state = State::Malformed;
                        continue;
                    }
                    name_start = i;
                    state = State::Name;
                }
                State::Name => {
                    if c == '=' {
                        name_end = i;
                        value_start = i + 1;
                        state = State::Value;
                    } else if c == ';' {
                        debug!("丢弃没有值的cookie：{}", &header[name_start..i]);
                        state = State::Start;
                    }
                }
                State::Value => {
                    if c == ';' {
                        insert(&mut values, &header[name_start..name_end], &header[value_start..i]);
                        state = State::Start;
                    }
                }
                State::Malformed => {
                    if c == ';' {
                        debug!("丢弃名称为空的cookie");
                        state = State::Start;
                    }
                }
            }
        }

        match state {
            State::Value => insert(&mut values, &header[name_start..name_end], &header[value_start..]),
            State::Name => debug!("丢弃没有值的cookie：{}", &header[name_start..]),
            State::Malformed => debug!("丢弃名称为空的cookie"),
            State::Start => {}
        }

        if values.is_empty() {
            return Cookies::empty();
        }
        Arc::new(Cookies { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn insert(values: &mut HashMap<String, String>, name: &str, value: &str) {
    let name = name.trim_end();
    if name.is_empty() {
        debug!("丢弃名称为空的cookie");
        return;
    }
    let value = value.trim();
    // 允许双引号包裹的值
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    values.insert(name.to_string(), value.to_string());
}
