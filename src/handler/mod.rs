mod core;
mod echo;
mod static_files;

pub use core::{HandlerConfig, HttpHandler, UnavailableError};
pub use echo::EchoHandler;
pub use static_files::StaticHandler;
