use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::io::Cursor;
use wayserver::{input::SocketInput, request::Request};

/// 以默认缓冲区大小解析一个完整的请求头部
fn parse_one(raw: &[u8]) -> Request {
    let mut input = SocketInput::new(Cursor::new(raw.to_vec()), 1024, 16384);
    Request::parse(&mut input, u64::MAX, 0).unwrap().unwrap()
}

fn bench_cases(c: &mut Criterion, group_name: &str, cases: &[(&str, Vec<u8>)]) {
    let mut group = c.benchmark_group(group_name);
    for (name, raw) in cases {
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), raw, |b, raw| {
            b.iter(|| black_box(parse_one(black_box(raw))));
        });
    }
    group.finish();
}

fn request_line_benchmark(c: &mut Criterion) {
    let cases: Vec<(&str, Vec<u8>)> = ["GET", "HEAD", "POST", "PATCH", "OPTIONS"]
        .iter()
        .map(|method| {
            let target = if *method == "OPTIONS" { "*" } else { "/" };
            (*method, format!("{} {} HTTP/1.1\r\nHost: localhost\r\n\r\n", method, target).into_bytes())
        })
        .collect();
    bench_cases(c, "request_line_methods", &cases);
}

fn request_target_benchmark(c: &mut Criterion) {
    let targets = [
        ("root", "/"),
        ("nested", "/path/to/resource"),
        ("percent_encoded", "/path/with%20spaces/and%2Fslashes/%E4%BD%A0%E5%A5%BD"),
        ("with_query", "/search?q=rust+web&page=2&sort=desc&lang=zh-CN"),
    ];
    let cases: Vec<(&str, Vec<u8>)> = targets
        .iter()
        .map(|(name, target)| (*name, format!("GET {} HTTP/1.1\r\n\r\n", target).into_bytes()))
        .collect();
    bench_cases(c, "request_target", &cases);
}

fn header_names_benchmark(c: &mut Criterion) {
    let cases = vec![
        (
            "standard",
            b"GET / HTTP/1.1\r\nHost: localhost\r\nUser-Agent: bench\r\nAccept: */*\r\nAccept-Encoding: gzip\r\nConnection: keep-alive\r\n\r\n".to_vec(),
        ),
        (
            "standard_lowercase",
            b"GET / HTTP/1.1\r\nhost: localhost\r\nuser-agent: bench\r\naccept: */*\r\naccept-encoding: gzip\r\nconnection: keep-alive\r\n\r\n".to_vec(),
        ),
        (
            "custom",
            b"GET / HTTP/1.1\r\nX-Request-Id: 42\r\nX-Forwarded-For: 10.0.0.1\r\nX-Trace: abc\r\nX-Tenant: demo\r\nX-Feature: on\r\n\r\n".to_vec(),
        ),
        (
            "browser",
            b"GET /index.html HTTP/1.1\r\n\
              Host: localhost:7878\r\n\
              User-Agent: Mozilla/5.0 (Windows NT 10.0; Win64; x64)\r\n\
              Accept: text/html,application/xhtml+xml\r\n\
              Accept-Language: en-US,en;q=0.9\r\n\
              Cookie: WAYSESSION=0123456789abcdef; theme=dark\r\n\
              Upgrade-Insecure-Requests: 1\r\n\
              \r\n"
                .to_vec(),
        ),
    ];
    bench_cases(c, "request_headers", &cases);
}

/// 同一个输入缓冲上连续解析流水线中的请求
fn pipelined_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_pipelined");

    for count in [10, 100, 1000].iter() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nUser-Agent: bench\r\n\r\n".repeat(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &raw, |b, raw| {
            b.iter(|| {
                let mut input = SocketInput::new(Cursor::new(raw.clone()), 1024, 16384);
                while let Some(request) = Request::parse(&mut input, u64::MAX, 0).unwrap() {
                    black_box(request);
                }
            });
        });
    }

    group.finish();
}

fn query_param_benchmark(c: &mut Criterion) {
    let request = parse_one(b"GET /search?a=1&b=2&q=caf%C3%A9+au+lait&z=9 HTTP/1.1\r\n\r\n");

    c.bench_function("query_param_decode", |b| {
        b.iter(|| black_box(request.query_param(black_box("q")).unwrap()));
    });
}

criterion_group!(
    benches,
    request_line_benchmark,
    request_target_benchmark,
    header_names_benchmark,
    pipelined_benchmark,
    query_param_benchmark
);
criterion_main!(benches);
