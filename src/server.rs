//! # 连接处理
//!
//! 每个连接由一个阻塞线程独占：tokio 负责监听与接受连接，随后把套接字交给
//! `spawn_blocking` 线程，在其中循环解析请求、分发给处理器、写出响应。
//! 一条连接上的请求严格串行，下一个请求在上一个响应写完之后才开始解析。

use log::{debug, error, info, warn};
use std::io::{BufWriter, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{net::TcpListener, task::JoinHandle};

use crate::{
    clock::{Clock, SystemClock},
    config::Config,
    exception::Exception,
    exchange::{Exchange, Handler},
    headers::StandardHeader,
    input::SocketInput,
    request::Request,
    response::Response,
    session::SessionStore,
};

/// 所有连接共享的只读上下文
pub struct ServerContext {
    config: Arc<Config>,
    handler: Arc<dyn Handler>,
    sessions: Option<Arc<SessionStore>>,
    clock: Arc<dyn Clock>,
}

impl ServerContext {
    /// 会话启用时同时创建会话存储
    pub fn new(config: Config, handler: impl Handler + 'static) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sessions = new_store(&config, &clock);
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            sessions,
            clock,
        }
    }

    /// 替换时钟，会话存储随之重建
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.sessions = new_store(&self.config, &clock);
        self.clock = clock;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    pub fn sessions(&self) -> Option<&Arc<SessionStore>> {
        self.sessions.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

fn new_store(config: &Config, clock: &Arc<dyn Clock>) -> Option<Arc<SessionStore>> {
    if !config.session().enabled() {
        return None;
    }
    Some(Arc::new(SessionStore::new(
        config.session().clone(),
        Arc::clone(clock),
    )))
}

/// 在一条连接上循环处理请求，直到对端关闭、请求要求关闭连接或发生无法恢复的错误。
///
/// 解析失败时写出对应的错误状态并关闭连接；处理器返回错误且尚未写出响应时，
/// 以错误对应的状态码回复。
pub fn serve(
    reader: impl Read + Send + 'static,
    writer: &mut dyn Write,
    id: u128,
    context: &ServerContext,
) -> Result<(), Exception> {
    let config = context.config();
    let mut input = SocketInput::new(
        reader,
        config.buffer_size_initial(),
        config.buffer_size_max(),
    );

    loop {
        let request = match Request::parse(&mut input, config.max_request_body_size(), id) {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("[ID{}]对端关闭连接", id);
                return Ok(());
            }
            Err(Exception::Io(e)) => {
                warn!("[ID{}]读取请求失败：{}", id, e);
                return Err(Exception::Io(e));
            }
            Err(e) => {
                warn!("[ID{}]请求无法解析，返回{}：{}", id, e.status(), e);
                write_error(writer, &e, context)?;
                return Ok(());
            }
        };

        let start_time = Instant::now();
        let mut http = Exchange::new(id, &mut input, &mut *writer, context, request);
        let result = context.handler().handle(&mut http);
        let result = match result {
            Ok(()) if !http.processed() => {
                warn!("[ID{}]处理器没有写出响应：{}", id, http.path());
                http.not_found()
            }
            other => other,
        };

        if let Err(e) = result {
            if http.processed() {
                error!("[ID{}]写出响应后处理器出错：{}", id, e);
                http.set_keep_alive(false);
            } else {
                if e.is_parse_error() {
                    http.set_keep_alive(false);
                }
                if e.status().code() >= 500 {
                    error!("[ID{}]处理请求时出错：{}", id, e);
                } else {
                    warn!("[ID{}]处理请求时出错：{}", id, e);
                }
                if let Err(e) = http.respond(Response::with_status(e.status())) {
                    error!("[ID{}]无法写出错误响应：{}", id, e);
                    let _ = http.close();
                    return Err(e);
                }
            }
        }

        let closed = http.close();
        let keep_alive = http.keep_alive();
        info!(
            "[ID{}] {}, {}, {}, {}, {}ms",
            id,
            http.version(),
            http.method(),
            http.path(),
            http.status().map(|s| s.code()).unwrap_or(0),
            start_time.elapsed().as_millis(),
        );
        drop(http);

        closed?;
        if !keep_alive {
            debug!("[ID{}]关闭连接", id);
            return Ok(());
        }
    }
}

/// 解析阶段的错误响应：没有响应体，总是关闭连接
fn write_error(writer: &mut dyn Write, e: &Exception, context: &ServerContext) -> Result<(), Exception> {
    let mut response = Response::with_status(e.status());
    response
        .set_header(StandardHeader::Connection, "close")
        .set_date(context.clock().now());
    response.write_to(writer, false)
}

/// 处理一个已接受的 TCP 连接，在阻塞线程中运行
pub fn handle_connection(stream: TcpStream, id: u128, context: Arc<ServerContext>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!("[ID{}]TCP连接已建立：{}", id, peer);

    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(e) => {
            error!("[ID{}]无法复制TCPStream：{}", id, e);
            return;
        }
    };
    let mut writer = BufWriter::new(stream);
    if let Err(e) = serve(reader, &mut writer, id, &context) {
        warn!("[ID{}]连接异常结束：{}", id, e);
    }
    if let Err(e) = writer.flush() {
        debug!("[ID{}]刷新输出失败：{}", id, e);
    }
    debug!("[ID{}]TCP连接已关闭：{}", id, peer);
}

/// 接受连接的主循环，每个连接交给一个阻塞线程处理
pub async fn run(listener: TcpListener, context: Arc<ServerContext>) {
    let mut id: u128 = 0;
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("接受连接失败：{}", e);
                continue;
            }
        };
        debug!("新的连接：{}", addr);

        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                error!("[ID{}]无法转换为阻塞套接字：{}", id, e);
                continue;
            }
        };
        if let Err(e) = stream.set_nonblocking(false) {
            error!("[ID{}]无法设置阻塞模式：{}", id, e);
            continue;
        }

        let context = Arc::clone(&context);
        tokio::task::spawn_blocking(move || handle_connection(stream, id, context));
        id += 1;
    }
}

/// 启动周期性的会话清理任务。会话未启用时不启动。
pub fn spawn_session_cleanup(context: &ServerContext) -> Option<JoinHandle<()>> {
    let sessions = Arc::clone(context.sessions()?);
    let period = Duration::from_secs(sessions.config().cleanup_interval().max(1));
    info!("会话清理任务启动，间隔{}秒", period.as_secs());
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // 第一次 tick 立即完成
        interval.tick().await;
        loop {
            interval.tick().await;
            sessions.clean_up();
        }
    }))
}
