//! # 会话
//!
//! `SessionStore` 是以令牌为键的并发注册表，底层为 `DashMap`，插入、查找、删除无需外部加锁。
//! 每个 `Session` 自带一把互斥锁，只串行化对该会话的读写与作废，不同令牌的会话互不阻塞。
//! 会话只会被 [`SessionStore::clean_up`] 清除：已作废的，或为空且闲置超过 `empty_max_age` 的。

use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, info, warn};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    clock::Clock, config::SessionConfig, cookie::Cookies, exception::Exception,
    util::hex_encode,
};

/// 会话令牌：32 个随机字节的小写十六进制编码
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub const BYTES: usize = 32;

    pub fn generate(random: &mut dyn RngCore) -> Self {
        let mut bytes = [0u8; Token::BYTES];
        random.fill_bytes(&mut bytes);
        Token(hex_encode(&bytes))
    }

    /// 校验客户端送来的令牌格式，不合法时返回 `None`
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == Token::BYTES * 2
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Some(Token(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct SessionState {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    valid: bool,
    last_access: DateTime<Utc>,
}

pub struct Session {
    id: Token,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: Token, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState {
                values: HashMap::new(),
                valid: true,
                last_access: now,
            }),
        }
    }

    pub fn id(&self) -> &Token {
        &self.id
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// 取得锁并确认会话仍然有效
    fn valid_state(&self) -> Result<MutexGuard<'_, SessionState>, Exception> {
        let state = self.state();
        if state.valid {
            Ok(state)
        } else {
            Err(Exception::SessionInvalidated)
        }
    }

    /// 读取一个值的副本。名称不存在或类型不符时返回 `None`。
    pub fn get<T: Any + Clone>(&self, name: &str) -> Result<Option<T>, Exception> {
        let state = self.valid_state()?;
        Ok(state
            .values
            .get(name)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned())
    }

    pub fn put<T: Any + Send + Sync>(&self, name: &str, value: T) -> Result<(), Exception> {
        let mut state = self.valid_state()?;
        state.values.insert(name.to_string(), Box::new(value));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<bool, Exception> {
        let mut state = self.valid_state()?;
        Ok(state.values.remove(name).is_some())
    }

    /// 在持有会话锁的情况下读改写一个值。值不存在或类型不符时以 `T::default()` 开始。
    pub fn update<T, R, F>(&self, name: &str, f: F) -> Result<R, Exception>
    where
        T: Any + Send + Sync + Default,
        F: FnOnce(&mut T) -> R,
    {
        let mut state = self.valid_state()?;
        let needs_default = !matches!(state.values.get(name), Some(v) if v.is::<T>());
        if needs_default {
            state.values.insert(name.to_string(), Box::new(T::default()));
        }
        match state
            .values
            .get_mut(name)
            .and_then(|v| v.downcast_mut::<T>())
        {
            Some(value) => Ok(f(value)),
            None => Err(Exception::SessionInvalidated),
        }
    }

    /// 作废会话：清空全部值，之后的任何读写都会失败。重复调用无副作用。
    pub fn invalidate(&self) {
        let mut state = self.state();
        if state.valid {
            debug!("会话{}已作废", self.id);
        }
        state.values.clear();
        state.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.state().valid
    }

    pub fn is_empty(&self) -> bool {
        self.state().values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state().values.len()
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.state().last_access
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.state().last_access = now;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("values", &state.values.len())
            .field("valid", &state.valid)
            .field("last_access", &state.last_access)
            .finish()
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    random: Mutex<Box<dyn RngCore + Send>>,
}

impl SessionStore {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_random(config, clock, Box::new(StdRng::from_entropy()))
    }

    /// 使用指定的随机源，测试中用于构造可重复的令牌序列
    pub fn with_random(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        random: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            clock,
            random: Mutex::new(random),
        }
    }

    fn next_token(&self) -> Token {
        let mut random = self.random.lock().unwrap_or_else(|p| p.into_inner());
        Token::generate(random.as_mut())
    }

    /// 创建并登记一个新会话。令牌冲突时换一个新令牌重试。
    pub fn create_next(&self) -> Arc<Session> {
        loop {
            let token = self.next_token();
            match self.sessions.entry(token.as_str().to_string()) {
                Entry::Occupied(_) => {
                    warn!("会话令牌冲突，重新生成");
                    continue;
                }
                Entry::Vacant(entry) => {
                    let session = Arc::new(Session::new(token, self.clock.now()));
                    entry.insert(Arc::clone(&session));
                    debug!("创建会话{}", session.id());
                    return session;
                }
            }
        }
    }

    /// 查找仍然有效的会话，并更新其访问时间
    pub fn get(&self, token: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(token).map(|s| Arc::clone(s.value()))?;
        if !session.is_valid() {
            return None;
        }
        session.touch(self.clock.now());
        Some(session)
    }

    /// 根据会话 cookie 查找会话
    pub fn get_by_cookies(&self, cookies: &Cookies) -> Option<Arc<Session>> {
        let raw = cookies.get(self.config.cookie_name())?;
        let token = Token::parse(raw)?;
        self.get(token.as_str())
    }

    /// 登记外部创建的会话，返回被替换的旧会话
    pub fn store(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions
            .insert(session.id().as_str().to_string(), session)
    }

    /// 生成 `Set-Cookie` 标头的值：`name=token[; Max-Age=n][; Path=p]`
    pub fn set_cookie(&self, token: &Token) -> String {
        let mut cookie = format!("{}={}", self.config.cookie_name(), token);
        if let Some(max_age) = self.config.cookie_max_age() {
            cookie.push_str(&format!("; Max-Age={}", max_age));
        }
        if let Some(path) = self.config.cookie_path() {
            cookie.push_str(&format!("; Path={}", path));
        }
        cookie
    }

    /// 清除已作废的会话，以及为空且闲置超过 `empty_max_age` 的会话。返回清除的数量。
    pub fn clean_up(&self) -> usize {
        let now = self.clock.now();
        let max_age = Duration::seconds(self.config.empty_max_age() as i64);
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            let state = session.state();
            if !state.valid {
                return false;
            }
            !(state.values.is_empty() && now - state.last_access > max_age)
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!("会话清理：移除{}个，剩余{}个", removed, self.sessions.len());
        }
        removed
    }

    pub fn cookie_name(&self) -> &str {
        self.config.cookie_name()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
