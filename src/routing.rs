//! # 路由表
//!
//! 路径表达式在注册路由时编译一次，之后在所有请求之间只读共享。
//!
//! 表达式语法：`/literal/:variable/literal*`
//! - `:name` 声明一个具名变量，取值到下一个 `/` 为止，默认由 `NotEmpty` 条件约束；
//! - `*` 只能出现一次且必须是最后一个字符。紧跟在变量后面时，该变量吞掉剩余的全部路径。
//!
//! 匹配针对百分号解码后的路径进行，`%2F` 解码出的 `/` 同样是段分隔符。
//!
//! 编译结果按形态分为四种：
//! - `Exact`：没有变量和通配符，整条路径相等；
//! - `StartsWith`：没有变量，以 `*` 结尾，前缀相等；
//! - `Segments`：1 到 3 段、每个变量独占一段的表达式，逐段比较；
//! - `Chain`：其余情况，按字面区域与变量节点顺序推进。

use log::{debug, info};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::{
    exception::Exception,
    exchange::{Exchange, Handler},
    param::HttpRequestMethod,
    response::{MethodNotAllowed, Redirect},
};

/// 具名变量的取值约束
#[derive(Debug, Clone)]
pub enum Condition {
    /// 非空且全部由 ASCII 数字组成
    Digits(String),
    NotEmpty(String),
    /// 整个取值必须匹配正则表达式
    Regex(String, Regex),
}

impl Condition {
    pub fn regex(name: &str, pattern: &str) -> Result<Self, Exception> {
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored)
            .map_err(|e| Exception::InvalidRoute(format!("invalid regex for :{}: {}", name, e)))?;
        Ok(Condition::Regex(name.to_string(), regex))
    }

    pub fn name(&self) -> &str {
        match self {
            Condition::Digits(name) | Condition::NotEmpty(name) | Condition::Regex(name, _) => name,
        }
    }

    pub fn test(&self, value: &str) -> bool {
        match self {
            Condition::Digits(_) => !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
            Condition::NotEmpty(_) => !value.is_empty(),
            Condition::Regex(_, regex) => regex.is_match(value),
        }
    }
}

/// 单次匹配的游标：当前位置与已绑定的变量。每次匹配前重置，在同一个交换内复用。
#[derive(Debug, Default)]
pub struct PathCursor {
    index: usize,
    variables: HashMap<String, String>,
}

impl PathCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.variables.clear();
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(|v| v.as_str())
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    fn bind(&mut self, name: &str, value: &str) {
        self.variables.insert(name.to_string(), value.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// 条件下标
    Variable(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    /// 字面区域；链的第一个节点即路径前缀
    Region(String),
    /// 具名变量，条件下标
    NamedVariable(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Exact(String),
    StartsWith(String),
    Segments {
        segments: Vec<Segment>,
        relaxed_tail: bool,
    },
    Chain {
        nodes: Vec<Node>,
        wildcard: bool,
    },
}

/// 编译好的路径表达式及其变量条件
#[derive(Debug, Clone)]
pub struct PathMatcher {
    expression: String,
    matcher: Matcher,
    /// 每个变量一个条件，顺序与声明顺序一致
    conditions: Vec<Condition>,
}

enum Part {
    Literal(String),
    Param(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Parser {
    Start,
    Literal,
    ParamStart,
    ParamPart,
    Wildcard,
}

fn illegal(message: &str, expression: &str) -> Exception {
    Exception::InvalidPathExpression(format!("{}: {}", message, expression))
}

impl PathMatcher {
    pub fn parse(expression: &str) -> Result<Self, Exception> {
        let mut parser = Parser::Start;
        let mut parts = Vec::new();
        let mut current = String::new();

        for c in expression.chars() {
            match parser {
                Parser::Start => {
                    if c != '/' {
                        return Err(illegal("path does not start with a '/' character", expression));
                    }
                    current.push(c);
                    parser = Parser::Literal;
                }
                Parser::Literal => match c {
                    ':' => {
                        if !current.is_empty() {
                            parts.push(Part::Literal(std::mem::take(&mut current)));
                        }
                        parser = Parser::ParamStart;
                    }
                    '*' => parser = Parser::Wildcard,
                    _ => current.push(c),
                },
                Parser::ParamStart => {
                    if !(c.is_alphabetic() || c == '_') {
                        return Err(illegal("path variable name must not be empty", expression));
                    }
                    current.push(c);
                    parser = Parser::ParamPart;
                }
                Parser::ParamPart => {
                    if c.is_alphanumeric() || c == '_' {
                        current.push(c);
                        continue;
                    }
                    if c == ':' {
                        return Err(illegal(
                            "cannot begin a path variable immediately after another variable",
                            expression,
                        ));
                    }
                    parts.push(Part::Param(std::mem::take(&mut current)));
                    if c == '*' {
                        parser = Parser::Wildcard;
                    } else {
                        current.push(c);
                        parser = Parser::Literal;
                    }
                }
                Parser::Wildcard => {
                    return Err(illegal(
                        "the '*' wildcard can only be used once at the end of the path expression",
                        expression,
                    ));
                }
            }
        }

        let wildcard = parser == Parser::Wildcard;
        match parser {
            Parser::Start => {
                return Err(illegal("path does not start with a '/' character", expression))
            }
            Parser::ParamStart => {
                return Err(illegal("path variable name must not be empty", expression))
            }
            Parser::ParamPart => parts.push(Part::Param(current)),
            Parser::Literal | Parser::Wildcard => {
                if !current.is_empty() {
                    parts.push(Part::Literal(current));
                }
            }
        }

        let mut conditions = Vec::new();
        let mut seen = HashSet::new();
        for part in parts.iter() {
            if let Part::Param(name) = part {
                if !seen.insert(name.as_str()) {
                    return Err(Exception::InvalidPathExpression(format!(
                        "the ':{}' path variable was declared more than once: {}",
                        name, expression
                    )));
                }
                conditions.push(Condition::NotEmpty(name.clone()));
            }
        }

        let matcher = if conditions.is_empty() {
            let literal: String = parts
                .iter()
                .map(|p| match p {
                    Part::Literal(s) => s.as_str(),
                    Part::Param(_) => "",
                })
                .collect();
            if wildcard {
                Matcher::StartsWith(literal)
            } else {
                Matcher::Exact(literal)
            }
        } else {
            match segments_of(&parts, wildcard) {
                Some(segments) => Matcher::Segments {
                    segments,
                    relaxed_tail: wildcard,
                },
                None => Matcher::Chain {
                    nodes: nodes_of(&parts),
                    wildcard,
                },
            }
        };

        Ok(PathMatcher {
            expression: expression.to_string(),
            matcher,
            conditions,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.conditions.iter().any(|c| c.name() == name)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// 以新条件替换同名变量的条件
    pub fn set_condition(&mut self, condition: Condition) -> Result<(), Exception> {
        match self.conditions.iter_mut().find(|c| c.name() == condition.name()) {
            Some(slot) => {
                *slot = condition;
                Ok(())
            }
            None => Err(Exception::InvalidRoute(format!(
                "current route does not define a path variable named {}: {}",
                condition.name(),
                self.expression
            ))),
        }
    }

    /// 测试路径。游标先被重置，匹配成功时其中保存绑定的变量。
    pub fn matches(&self, path: &str, cursor: &mut PathCursor) -> bool {
        cursor.reset();
        match &self.matcher {
            Matcher::Exact(value) => {
                cursor.index = path.len();
                path == value.as_str()
            }
            Matcher::StartsWith(prefix) => {
                if !path.starts_with(prefix.as_str()) {
                    return false;
                }
                cursor.index = prefix.len();
                true
            }
            Matcher::Segments {
                segments,
                relaxed_tail,
            } => self.match_segments(path, cursor, segments, *relaxed_tail),
            Matcher::Chain { nodes, wildcard } => self.match_chain(path, cursor, nodes, *wildcard),
        }
    }

    fn match_segments(
        &self,
        path: &str,
        cursor: &mut PathCursor,
        segments: &[Segment],
        relaxed_tail: bool,
    ) -> bool {
        if !path.starts_with('/') {
            return false;
        }
        cursor.index = 1;
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let rest = &path[cursor.index..];
            let end = if last && relaxed_tail {
                rest.len()
            } else {
                rest.find('/').unwrap_or(rest.len())
            };
            let value = &rest[..end];
            match segment {
                Segment::Literal(literal) => {
                    if value != literal.as_str() {
                        return false;
                    }
                }
                Segment::Variable(index) => {
                    let condition = &self.conditions[*index];
                    if !condition.test(value) {
                        return false;
                    }
                    cursor.bind(condition.name(), value);
                }
            }
            cursor.index += end;
            if !last {
                if !path[cursor.index..].starts_with('/') {
                    return false;
                }
                cursor.index += 1;
            }
        }
        cursor.index == path.len()
    }

    fn match_chain(
        &self,
        path: &str,
        cursor: &mut PathCursor,
        nodes: &[Node],
        wildcard: bool,
    ) -> bool {
        for (i, node) in nodes.iter().enumerate() {
            let rest = &path[cursor.index..];
            match node {
                Node::Region(region) => {
                    if !rest.starts_with(region.as_str()) {
                        return false;
                    }
                    cursor.index += region.len();
                }
                Node::NamedVariable(index) => {
                    let end = if wildcard && i + 1 == nodes.len() {
                        rest.len()
                    } else {
                        rest.find('/').unwrap_or(rest.len())
                    };
                    let value = &rest[..end];
                    let condition = &self.conditions[*index];
                    if !condition.test(value) {
                        return false;
                    }
                    cursor.bind(condition.name(), value);
                    cursor.index += end;
                }
            }
        }
        wildcard || cursor.index == path.len()
    }
}

/// 每个变量都独占一段且段数为 1 到 3 时，返回逐段形式
fn segments_of(parts: &[Part], wildcard: bool) -> Option<Vec<Segment>> {
    // 通配符只允许放宽最后一个变量
    if wildcard && !matches!(parts.last(), Some(Part::Param(_))) {
        return None;
    }

    let mut segments = Vec::new();
    let mut variable = 0;
    let mut pending: Option<Part> = None;
    for part in parts {
        match part {
            Part::Literal(literal) => {
                let mut pieces = literal.split('/');
                let head = pieces.next().unwrap_or("");
                match pending.take() {
                    // 变量之后的字面值必须从新的一段开始
                    Some(Part::Param(_)) if !head.is_empty() => return None,
                    Some(Part::Param(_)) => {}
                    _ if !head.is_empty() => return None,
                    _ => {}
                }
                let pieces: Vec<&str> = pieces.collect();
                for (j, piece) in pieces.iter().enumerate() {
                    if j + 1 == pieces.len() {
                        // 最后一段若为空，后面要么是变量要么是路径结尾
                        if piece.is_empty() {
                            pending = Some(Part::Literal(String::new()));
                            continue;
                        }
                    }
                    segments.push(Segment::Literal(piece.to_string()));
                }
            }
            Part::Param(_) => {
                match pending.take() {
                    Some(Part::Literal(_)) => {}
                    _ => return None,
                }
                segments.push(Segment::Variable(variable));
                variable += 1;
                pending = Some(Part::Param(String::new()));
            }
        }
    }
    if let Some(Part::Literal(_)) = pending {
        // 以 `/` 结尾的表达式，最后一段为空
        segments.push(Segment::Literal(String::new()));
    }

    if (1..=3).contains(&segments.len()) {
        Some(segments)
    } else {
        None
    }
}

fn nodes_of(parts: &[Part]) -> Vec<Node> {
    let mut variable = 0;
    parts
        .iter()
        .map(|part| match part {
            Part::Literal(literal) => Node::Region(literal.clone()),
            Part::Param(_) => {
                let node = Node::NamedVariable(variable);
                variable += 1;
                node
            }
        })
        .collect()
}

/// 一条路由：路径、按方法注册的处理器、不限方法的处理器。
pub struct Route {
    path: PathMatcher,
    methods: BTreeMap<HttpRequestMethod, Arc<dyn Handler>>,
    any: Option<Arc<dyn Handler>>,
    not_allowed: Option<MethodNotAllowed>,
}

impl Route {
    pub fn path(&self) -> &PathMatcher {
        &self.path
    }

    /// 路径不匹配时什么也不做；匹配时选择处理器，方法不被允许时回复 405。
    pub fn handle(&self, http: &mut Exchange<'_>) -> Result<(), Exception> {
        if !http.matches(&self.path) {
            return Ok(());
        }
        let method = http.method();
        let handler = self.methods.get(&method).or_else(|| {
            if method == HttpRequestMethod::Head {
                self.methods.get(&HttpRequestMethod::Get)
            } else {
                None
            }
        });
        match (handler, &self.any, &self.not_allowed) {
            (Some(h), _, _) => h.handle(http),
            (None, Some(h), _) => h.handle(http),
            (None, None, Some(not_allowed)) => {
                debug!(
                    "[ID{}]{} {} 方法不被允许",
                    http.id(),
                    method,
                    self.path.expression()
                );
                not_allowed.handle(http)
            }
            (None, None, None) => Ok(()),
        }
    }
}

/// 构建单条路由，在 [`RouterBuilder::route`] 的闭包中使用
pub struct RouteBuilder {
    path: PathMatcher,
    methods: BTreeMap<HttpRequestMethod, Arc<dyn Handler>>,
    any: Option<Arc<dyn Handler>>,
}

impl RouteBuilder {
    fn new(expression: &str) -> Result<Self, Exception> {
        Ok(Self {
            path: PathMatcher::parse(expression)?,
            methods: BTreeMap::new(),
            any: None,
        })
    }

    pub fn digits(&mut self, name: &str) -> Result<&mut Self, Exception> {
        self.path.set_condition(Condition::Digits(name.to_string()))?;
        Ok(self)
    }

    pub fn not_empty(&mut self, name: &str) -> Result<&mut Self, Exception> {
        self.path.set_condition(Condition::NotEmpty(name.to_string()))?;
        Ok(self)
    }

    pub fn regex(&mut self, name: &str, pattern: &str) -> Result<&mut Self, Exception> {
        if !self.path.has_variable(name) {
            return Err(Exception::InvalidRoute(format!(
                "current route does not define a path variable named {}: {}",
                name,
                self.path.expression()
            )));
        }
        self.path.set_condition(Condition::regex(name, pattern)?)?;
        Ok(self)
    }

    /// 为方法注册处理器，同一方法只能注册一次
    pub fn allow(
        &mut self,
        method: HttpRequestMethod,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, Exception> {
        if self.methods.contains_key(&method) {
            return Err(Exception::InvalidRoute(format!(
                "a handler has already been defined for method {}: {}",
                method,
                self.path.expression()
            )));
        }
        self.methods.insert(method, Arc::new(handler));
        Ok(self)
    }

    /// 不限方法的处理器，仅在没有按方法注册的处理器命中时使用
    pub fn handler(&mut self, handler: impl Handler + 'static) -> Result<&mut Self, Exception> {
        if self.any.is_some() {
            return Err(Exception::InvalidRoute(format!(
                "a handler has already been defined: {}",
                self.path.expression()
            )));
        }
        self.any = Some(Arc::new(handler));
        Ok(self)
    }

    /// `302 Found` 重定向到 `location`
    pub fn redirect(&mut self, location: &str) -> Result<&mut Self, Exception> {
        self.handler(Redirect::found(location))
    }

    /// `301 Moved Permanently` 重定向到 `location`
    pub fn moved_permanently(&mut self, location: &str) -> Result<&mut Self, Exception> {
        self.handler(Redirect::moved_permanently(location))
    }

    fn build(self) -> Result<Route, Exception> {
        if self.methods.is_empty() && self.any.is_none() {
            return Err(Exception::InvalidRoute(format!(
                "no handler defined: {}",
                self.path.expression()
            )));
        }
        let not_allowed = if self.methods.is_empty() || self.any.is_some() {
            None
        } else {
            let mut allowed: Vec<HttpRequestMethod> = self.methods.keys().copied().collect();
            if allowed.contains(&HttpRequestMethod::Get) && !allowed.contains(&HttpRequestMethod::Head) {
                allowed.push(HttpRequestMethod::Head);
            }
            allowed.sort();
            Some(MethodNotAllowed::new(&allowed))
        };
        Ok(Route {
            path: self.path,
            methods: self.methods,
            any: self.any,
            not_allowed,
        })
    }
}

enum Action {
    Filter(Box<dyn Handler>),
    Route(Route),
}

/// 路由表。按注册顺序依次执行过滤器与路由，第一个处理了交换的条目结束分发。
pub struct Router {
    actions: Vec<Action>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder {
            actions: Vec::new(),
        }
    }

    pub fn dispatch(&self, http: &mut Exchange<'_>) -> Result<(), Exception> {
        for action in self.actions.iter() {
            match action {
                Action::Filter(filter) => filter.handle(http)?,
                Action::Route(route) => route.handle(http)?,
            }
            if http.processed() {
                return Ok(());
            }
        }
        debug!("[ID{}]没有匹配的路由：{}", http.id(), http.path());
        http.not_found()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Handler for Router {
    fn handle(&self, http: &mut Exchange<'_>) -> Result<(), Exception> {
        self.dispatch(http)
    }
}

pub struct RouterBuilder {
    actions: Vec<Action>,
}

impl RouterBuilder {
    pub fn filter(mut self, filter: impl Handler + 'static) -> Self {
        self.actions.push(Action::Filter(Box::new(filter)));
        self
    }

    pub fn route<F>(mut self, expression: &str, configure: F) -> Result<Self, Exception>
    where
        F: FnOnce(&mut RouteBuilder) -> Result<(), Exception>,
    {
        let mut builder = RouteBuilder::new(expression)?;
        configure(&mut builder)?;
        let route = builder.build()?;
        info!("注册路由：{}", expression);
        self.actions.push(Action::Route(route));
        Ok(self)
    }

    pub fn build(self) -> Router {
        Router {
            actions: self.actions,
        }
    }
}
