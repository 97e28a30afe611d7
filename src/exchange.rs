//! # 交换
//!
//! 一次请求/响应周期的可变状态，由处理该连接的线程独占。
//! Cookie、请求体与会话都在第一次访问时才解析或读取。
//! 响应写出之后交换被标记为已处理，路由分发随即停止。
//! [`Exchange::close`] 释放请求体资源，无论处理是否成功都由服务端循环调用。

use log::{debug, error, warn};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use crate::{
    body::Body,
    cookie::Cookies,
    exception::Exception,
    headers::{Headers, StandardHeader},
    input::SocketInput,
    param::{HttpRequestMethod, HttpStatus, HttpVersion},
    request::Request,
    response::Response,
    routing::{PathCursor, PathMatcher},
    server::ServerContext,
    session::Session,
    util::decode_pairs,
};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// 请求处理器。路由、过滤器以及预先构建的响应都实现该 trait。
pub trait Handler: Send + Sync {
    fn handle(&self, http: &mut Exchange<'_>) -> Result<(), Exception>;
}

impl<F> Handler for F
where
    F: Fn(&mut Exchange<'_>) -> Result<(), Exception> + Send + Sync,
{
    fn handle(&self, http: &mut Exchange<'_>) -> Result<(), Exception> {
        self(http)
    }
}

/// 帮助闭包推断出处理器的签名
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&mut Exchange<'_>) -> Result<(), Exception> + Send + Sync,
{
    f
}

pub struct Exchange<'a> {
    id: u128,
    input: &'a mut SocketInput,
    output: &'a mut dyn Write,
    context: &'a ServerContext,
    request: Request,
    cursor: PathCursor,
    cookies: Option<Arc<Cookies>>,
    /// `None` 表示请求体尚未读取
    body: Option<Body>,
    session: Option<Arc<Session>>,
    session_new: bool,
    keep_alive: bool,
    processed: bool,
    status: Option<HttpStatus>,
}

impl<'a> Exchange<'a> {
    pub fn new(
        id: u128,
        input: &'a mut SocketInput,
        output: &'a mut dyn Write,
        context: &'a ServerContext,
        request: Request,
    ) -> Self {
        let keep_alive = request.keep_alive();
        Self {
            id,
            input,
            output,
            context,
            request,
            cursor: PathCursor::new(),
            cookies: None,
            body: None,
            session: None,
            session_new: false,
            keep_alive,
            processed: false,
            status: None,
        }
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.request.method()
    }

    /// 解码后的路径
    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn version(&self) -> HttpVersion {
        self.request.version()
    }

    pub fn query(&self) -> Option<&str> {
        self.request.query()
    }

    pub fn query_param(&self, name: &str) -> Result<Option<String>, Exception> {
        self.request.query_param(name)
    }

    pub fn query_params(&self, name: &str) -> Result<Vec<String>, Exception> {
        self.request.query_params(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn headers(&self) -> &Headers {
        self.request.headers()
    }

    pub fn cookies(&mut self) -> Arc<Cookies> {
        if let Some(cookies) = &self.cookies {
            return Arc::clone(cookies);
        }
        let cookies = Cookies::parse(self.request.headers().get_standard(StandardHeader::Cookie));
        self.cookies = Some(Arc::clone(&cookies));
        cookies
    }

    /// 以交换内复用的游标测试路径
    pub fn matches(&mut self, matcher: &PathMatcher) -> bool {
        matcher.matches(self.request.path(), &mut self.cursor)
    }

    /// 最近一次成功匹配绑定的路径变量
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.cursor.variable(name)
    }

    /// 请求体，第一次访问时从连接中读取
    pub fn body(&mut self) -> Result<&Body, Exception> {
        if self.body.is_none() {
            let body = Body::ingest(
                self.input,
                self.request.content_length(),
                self.context.config(),
                self.id,
            );
            match body {
                Ok(body) => self.body = Some(body),
                Err(e) => {
                    // 连接上的读取位置已不可靠
                    self.keep_alive = false;
                    return Err(e);
                }
            }
        }
        match &self.body {
            Some(body) => Ok(body),
            None => Err(Exception::UnexpectedEof),
        }
    }

    /// 表单参数的第一个值，见 [`Exchange::form_params`]
    pub fn form_param(&mut self, name: &str) -> Result<Option<String>, Exception> {
        Ok(self.form_params(name)?.into_iter().next())
    }

    /// 以 `application/x-www-form-urlencoded` 格式读取请求体，返回某个表单参数的全部值。
    ///
    /// 其他媒体类型返回 `UnsupportedMediaType`，服务端据此回复 415 并关闭连接。
    pub fn form_params(&mut self, name: &str) -> Result<Vec<String>, Exception> {
        let content_type = self.request.headers().get_standard(StandardHeader::ContentType);
        let media_type = content_type
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .unwrap_or("");
        if !media_type.eq_ignore_ascii_case(FORM_URLENCODED) {
            warn!("[ID{}]不支持的表单媒体类型：{:?}", self.id, content_type);
            return Err(Exception::UnsupportedMediaType);
        }
        let text = self.body()?.text()?;
        decode_pairs(&text, name)
    }

    /// 请求携带的有效会话；不存在时不会创建
    pub fn existing_session(&mut self) -> Option<Arc<Session>> {
        if let Some(session) = &self.session {
            if session.is_valid() {
                return Some(Arc::clone(session));
            }
        }
        let context = self.context;
        let store = context.sessions()?;
        let cookies = self.cookies();
        let session = store.get_by_cookies(&cookies)?;
        self.session = Some(Arc::clone(&session));
        Some(session)
    }

    /// 请求携带的有效会话；不存在时创建一个新会话，并在响应中写出 `Set-Cookie`
    pub fn session(&mut self) -> Result<Arc<Session>, Exception> {
        if let Some(session) = self.existing_session() {
            return Ok(session);
        }
        let context = self.context;
        let store = context
            .sessions()
            .ok_or_else(|| Exception::Config("session store is disabled".to_string()))?;
        let session = store.create_next();
        debug!("[ID{}]创建新会话", self.id);
        self.session = Some(Arc::clone(&session));
        self.session_new = true;
        Ok(session)
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// 要求在响应之后关闭连接
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = self.keep_alive && keep_alive;
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    /// 已写出的响应状态
    pub fn status(&self) -> Option<HttpStatus> {
        self.status
    }

    /// 写出响应并把交换标记为已处理。
    ///
    /// 自动补充 `Date`、新会话的 `Set-Cookie`，以及不保持连接时的 `Connection: close`。
    /// HEAD 请求只写出状态行与标头。
    pub fn respond(&mut self, mut response: Response) -> Result<(), Exception> {
        if self.processed {
            error!("[ID{}]重复写出响应：{}", self.id, response.status());
            return Err(Exception::Io(io::Error::new(
                io::ErrorKind::Other,
                "response already written",
            )));
        }
        self.processed = true;
        self.status = Some(response.status());

        response.set_date(self.context.clock().now());
        if self.session_new {
            if let (Some(session), Some(store)) = (&self.session, self.context.sessions()) {
                if session.is_valid() {
                    response.add_header(StandardHeader::SetCookie, &store.set_cookie(session.id()));
                }
            }
        }
        if !self.keep_alive {
            response.set_header(StandardHeader::Connection, "close");
        }

        let head_only = self.request.method() == HttpRequestMethod::Head;
        debug!(
            "[ID{}]{} {} -> {}",
            self.id,
            self.request.method(),
            self.request.target(),
            response.status()
        );
        if let Err(e) = response.write_to(self.output, head_only) {
            self.keep_alive = false;
            return Err(e);
        }
        Ok(())
    }

    pub fn ok(&mut self, content_type: &str, content: impl Into<bytes::Bytes>) -> Result<(), Exception> {
        let mut response = Response::new();
        response.set_content(content_type, content);
        self.respond(response)
    }

    pub fn not_found(&mut self) -> Result<(), Exception> {
        self.respond(Response::with_status(HttpStatus::NotFound))
    }

    pub fn internal_server_error(&mut self) -> Result<(), Exception> {
        self.respond(Response::with_status(HttpStatus::InternalServerError))
    }

    /// 回复 415，并在之后关闭连接
    pub fn unsupported_media_type(&mut self) -> Result<(), Exception> {
        self.keep_alive = false;
        self.respond(Response::with_status(HttpStatus::UnsupportedMediaType))
    }

    pub fn redirect(&mut self, location: &str) -> Result<(), Exception> {
        self.respond(Response::found(location))
    }

    /// 以文件作为响应体，文件不存在时回复 404
    pub fn send_file(&mut self, path: &Path) -> Result<(), Exception> {
        let mut response = Response::new();
        match response.set_file(path) {
            Ok(_) => self.respond(response),
            Err(e) => {
                warn!("[ID{}]无法发送文件{}：{}", self.id, path.display(), e);
                self.not_found()
            }
        }
    }

    /// 结束交换：删除落盘的请求体；请求体未被读取时丢弃其剩余字节，使连接保持分帧。
    pub fn close(&mut self) -> Result<(), Exception> {
        match self.body.as_mut() {
            Some(body) => body.close()?,
            None => {
                let length = self.request.content_length().unwrap_or(0);
                if length > 0 && self.keep_alive {
                    let skipped = self.input.skip(length)?;
                    if skipped < length {
                        debug!("[ID{}]丢弃请求体时连接提前关闭", self.id);
                        self.keep_alive = false;
                    }
                }
            }
        }
        self.body = Some(Body::Empty);
        Ok(())
    }
}
