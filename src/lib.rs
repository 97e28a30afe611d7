pub mod body;
pub mod clock;
pub mod config;
pub mod cookie;
pub mod exception;
pub mod exchange;
pub mod headers;
pub mod input;
pub mod param;
pub mod request;
pub mod response;
pub mod routing;
pub mod server;
pub mod session;
pub mod util;

pub use body::{Body, BodyTag};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, SessionConfig};
pub use cookie::Cookies;
pub use exception::Exception;
pub use exchange::{from_fn, Exchange, Handler};
pub use param::{HttpRequestMethod, HttpStatus, HttpVersion};
pub use request::Request;
pub use response::{MethodNotAllowed, Redirect, Response};
pub use routing::{Condition, PathCursor, PathMatcher, Router};
pub use server::ServerContext;
pub use session::{Session, SessionStore, Token};
