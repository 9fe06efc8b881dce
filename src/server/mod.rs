pub mod request;
pub mod response;
pub mod service;
pub mod shutdown;

pub use request::{parse_request, HeaderVec, Protocol, Request, MAX_INLINE_HEADERS};
pub use response::{write_response, Response};
pub use service::{EngineService, HttpServer, ServerHandle};
pub use shutdown::spawn_shutdown_monitor;
