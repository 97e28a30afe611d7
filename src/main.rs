// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Web 服务器
//!
//! 载入日志与配置，构建 tokio 运行时并监听端口。
//! 每个连接交给一个阻塞线程处理；会话启用时另有一个周期性清理任务。
//! 这里注册的路由是一组演示处理器：
//! - `/`：欢迎页
//! - `/users/:id`：只接受数字 ID
//! - `/search?q=`：查询参数解码
//! - `/counter`：基于会话的计数器
//! - `/upload`：读取请求体，超过阈值的请求体写入临时文件
//! - `/static/*`：发送静态文件
//! - `/old`：永久重定向到 `/`

use log::{error, info, warn};
use tokio::{net::TcpListener, runtime::Builder};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use wayserver::{
    server::{self, ServerContext},
    BodyTag, Config, Exception, Exchange, HttpRequestMethod, HttpStatus, Response, Router,
};

const STATIC_ROOT: &str = "static";

fn main() {
    // 日志配置放在 YAML 文件中，便于调整级别与输出目的地
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
    }

    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => {
            info!("配置文件已载入");
            config
        }
        Err(e) => {
            warn!("无法载入配置文件，使用默认配置：{}", e);
            Config::new()
        }
    };

    let router = match routes() {
        Ok(router) => router,
        Err(e) => {
            error!("路由注册失败：{}", e);
            return;
        }
    };
    info!("共注册{}条路由", router.len());

    let worker_threads = config.worker_threads();
    let runtime = match Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建运行时：{}", e);
            return;
        }
    };

    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let socket = SocketAddrV4::new(address, port);
    let context = Arc::new(ServerContext::new(config, router));

    runtime.block_on(async move {
        let listener = match TcpListener::bind(socket).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("无法绑定端口：{}，错误：{}", port, e);
                return;
            }
        };
        info!("服务端将在{}上监听Socket连接", socket);

        let _cleanup = server::spawn_session_cleanup(&context);
        server::run(listener, context).await;
    });
}

fn routes() -> Result<Router, Exception> {
    let router = Router::builder()
        .filter(reject_traversal)
        .route("/", |r| {
            r.allow(HttpRequestMethod::Get, index)?;
            Ok(())
        })?
        .route("/users/:id", |r| {
            r.digits("id")?.allow(HttpRequestMethod::Get, user)?;
            Ok(())
        })?
        .route("/search", |r| {
            r.allow(HttpRequestMethod::Get, search)?;
            Ok(())
        })?
        .route("/counter", |r| {
            r.allow(HttpRequestMethod::Get, counter)?
                .allow(HttpRequestMethod::Delete, logout)?;
            Ok(())
        })?
        .route("/upload", |r| {
            r.allow(HttpRequestMethod::Post, upload)?;
            Ok(())
        })?
        .route("/static/*", |r| {
            r.allow(HttpRequestMethod::Get, static_file)?;
            Ok(())
        })?
        .route("/old", |r| {
            r.moved_permanently("/")?;
            Ok(())
        })?
        .build();
    Ok(router)
}

/// 拒绝包含 `..` 段的路径
fn reject_traversal(http: &mut Exchange<'_>) -> Result<(), Exception> {
    if http.path().split('/').any(|segment| segment == "..") {
        warn!("[ID{}]请求的路径：{} 包含非法片段，返回400", http.id(), http.path());
        return http.respond(Response::with_status(HttpStatus::BadRequest));
    }
    Ok(())
}

fn index(http: &mut Exchange<'_>) -> Result<(), Exception> {
    http.ok(
        "text/html;charset=utf-8",
        "<html><body><h1>wayserver</h1></body></html>",
    )
}

fn user(http: &mut Exchange<'_>) -> Result<(), Exception> {
    let id = http.path_param("id").unwrap_or_default().to_string();
    http.ok("text/plain;charset=utf-8", format!("user {}", id))
}

fn search(http: &mut Exchange<'_>) -> Result<(), Exception> {
    let terms = http.query_params("q")?;
    if terms.is_empty() {
        return http.respond(Response::with_status(HttpStatus::BadRequest));
    }
    http.ok("text/plain;charset=utf-8", terms.join("\n"))
}

fn counter(http: &mut Exchange<'_>) -> Result<(), Exception> {
    let session = http.session()?;
    let count = session.update("count", |count: &mut u64| {
        *count += 1;
        *count
    })?;
    http.ok("text/plain;charset=utf-8", count.to_string())
}

fn logout(http: &mut Exchange<'_>) -> Result<(), Exception> {
    if let Some(session) = http.existing_session() {
        session.invalidate();
    }
    http.respond(Response::with_status(HttpStatus::NoContent))
}

fn upload(http: &mut Exchange<'_>) -> Result<(), Exception> {
    let body = http.body()?;
    let summary = match body.tag() {
        BodyTag::Empty => "empty".to_string(),
        BodyTag::InBuffer => format!("{} bytes in memory", body.len()),
        BodyTag::File => format!("{} bytes spooled to disk", body.len()),
    };
    http.ok("text/plain;charset=utf-8", summary)
}

fn static_file(http: &mut Exchange<'_>) -> Result<(), Exception> {
    let path = match resolve_static(Path::new(STATIC_ROOT), http.path()) {
        Some(path) if path.is_file() => path,
        _ => {
            warn!("[ID{}]静态文件路径无效：{}", http.id(), http.path());
            return http.not_found();
        }
    };
    http.send_file(&path)
}

/// 把 `/static/` 之后的部分逐段拼接到根目录下。
///
/// 空段、`.`、`..` 以及任何不是普通文件名的组成部分都会使解析失败，
/// 因此 `/static//etc/passwd` 这样的绝对路径无法逃出根目录。
fn resolve_static(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.strip_prefix("/static/")?;
    let mut path = root.to_path_buf();
    for segment in relative.split('/') {
        if segment.is_empty() || segment.contains('\\') {
            return None;
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => path.push(name),
            _ => return None,
        }
    }
    Some(path)
}
