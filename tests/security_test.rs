// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

#[cfg(test)]
mod security_tests {
    //! # 畸形报文回归测试
    //!
    //! 模拟常见的攻击向量与协议违规，验证服务器在解析阶段给出正确的状态码并关闭连接：
    //! 路径遍历、超长请求行与标头、超大请求体、标头注入以及不支持的协议特性。

    use std::io::Cursor;

    use wayserver::{
        server::{self, ServerContext},
        Config, Exception, Exchange, HttpRequestMethod, HttpStatus, Response, Router,
    };

    fn ok(http: &mut Exchange<'_>) -> Result<(), Exception> {
        http.ok("text/plain", "ok")
    }

    fn reject_traversal(http: &mut Exchange<'_>) -> Result<(), Exception> {
        if http.path().split('/').any(|segment| segment == "..") {
            return http.respond(Response::with_status(HttpStatus::BadRequest));
        }
        Ok(())
    }

    fn context(config: Config) -> ServerContext {
        let router = Router::builder()
            .filter(reject_traversal)
            .route("/*", |r| {
                r.allow(HttpRequestMethod::Get, ok)?
                    .allow(HttpRequestMethod::Post, ok)?;
                Ok(())
            })
            .unwrap()
            .build();
        ServerContext::new(config, router)
    }

    fn send(config: Config, raw: &[u8]) -> String {
        let mut output = Vec::new();
        server::serve(Cursor::new(raw.to_vec()), &mut output, 0, &context(config)).unwrap();
        String::from_utf8_lossy(&output).to_string()
    }

    /// 从原始响应字符串中提取 HTTP 状态码
    fn extract_status_code(response: &str) -> u16 {
        response
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    fn assert_rejected(raw: &[u8], expected: u16) {
        assert_rejected_with(Config::new(), raw, expected);
    }

    fn assert_rejected_with(config: Config, raw: &[u8], expected: u16) {
        let response = send(config, raw);
        assert_eq!(
            extract_status_code(&response),
            expected,
            "请求 {:?} 的响应为 {:?}",
            String::from_utf8_lossy(raw),
            response
        );
        assert!(response.contains("Connection: close\r\n"));
        assert_eq!(response.matches("HTTP/1.1 ").count(), 1, "错误之后不应继续处理");
    }

    /// ## 攻击向量：路径遍历
    #[test]
    fn test_path_traversal() {
        let attacks: [&[u8]; 3] = [
            b"GET /../etc/passwd HTTP/1.1\r\n\r\n",
            b"GET /static/../../etc/passwd HTTP/1.1\r\n\r\n",
            b"GET /%2e%2e/%2e%2e/etc/passwd HTTP/1.1\r\n\r\n",
        ];
        for attack in attacks {
            let response = send(Config::new(), attack);
            assert_eq!(extract_status_code(&response), 400);
        }
    }

    /// ## 攻击向量：超长请求行
    #[test]
    fn test_oversized_request_line() {
        let raw = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(1000));
        assert_rejected_with(Config::new().with_buffer_sizes(128, 256), raw.as_bytes(), 414);
    }

    /// ## 攻击向量：标头洪泛
    #[test]
    fn test_oversized_headers() {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        raw.push_str(&format!("X-Padding: {}\r\n", "b".repeat(1000)));
        raw.push_str("\r\n");
        assert_rejected_with(Config::new().with_buffer_sizes(128, 256), raw.as_bytes(), 431);
    }

    /// ## 攻击向量：超大请求体
    #[test]
    fn test_oversized_body() {
        assert_rejected_with(
            Config::new().with_max_request_body_size(10),
            b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n",
            413,
        );
    }

    #[test]
    fn test_content_length_smuggling() {
        assert_rejected(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n", 400);
        assert_rejected(b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n", 400);
        assert_rejected(
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\nhello!",
            400,
        );
        assert_rejected(
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n",
            501,
        );
    }

    #[test]
    fn test_duplicate_equal_content_length_is_accepted() {
        let response = send(
            Config::new(),
            b"POST / HTTP/1.1\r\nContent-Length: 2\r\nContent-Length: 2\r\n\r\nhi",
        );
        assert_eq!(extract_status_code(&response), 200);
    }

    /// ## 攻击向量：标头注入
    #[test]
    fn test_header_injection() {
        assert_rejected(b"GET / HTTP/1.1\r\nX-A: 1\r\n  folded\r\n\r\n", 400);
        assert_rejected(b"GET / HTTP/1.1\r\nX-A: a\x00b\r\n\r\n", 400);
        assert_rejected(b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n", 400);
        assert_rejected(b"GET / HTTP/1.1\r\nX-A: \xff\xfe\r\n\r\n", 400);
        assert_rejected(b"GET /a\rb HTTP/1.1\r\n\r\n", 400);
    }

    /// ## 协议健壮性
    #[test]
    fn test_protocol_robustness() {
        assert_rejected(b"get / HTTP/1.1\r\n\r\n", 400);
        assert_rejected(b"BREW / HTTP/1.1\r\n\r\n", 400);
        assert_rejected(b"GET / HTTP/2.0\r\n\r\n", 505);
        assert_rejected(b"GET / HTTP/1.1 extra\r\n\r\n", 400);
        assert_rejected(b"GET relative HTTP/1.1\r\n\r\n", 400);
        assert_rejected(b"GET /%zz HTTP/1.1\r\n\r\n", 400);
        assert_rejected(b"GET / HTTP/1.1\r\nHost: x\r\n", 400);
    }

    #[test]
    fn test_blank_lines_before_request_are_ignored() {
        let response = send(Config::new(), b"\r\n\r\nGET / HTTP/1.1\r\n\r\n");
        assert_eq!(extract_status_code(&response), 200);
    }
}
