use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use may::coroutine::JoinHandle;
use may_minihttp::{HttpServerWithHeaders, HttpService};
use tracing::error;

use super::request::parse_request;
use super::response::{write_response, Response};
use crate::container::Container;

/// Transport adapter: hands each parsed request to the Router-level
/// checkpoint entry point and writes the completed response back.
///
/// The service holds the Router container only; everything below it is
/// resolved per request through the mapper chain, so hot-deployment changes
/// are picked up without touching the transport.
#[derive(Clone)]
pub struct EngineService {
    router: Arc<Container>,
}

impl EngineService {
    pub fn new(router: Arc<Container>) -> Self {
        Self { router }
    }
}

impl HttpService for EngineService {
    fn call(&mut self, req: may_minihttp::Request, res: &mut may_minihttp::Response) -> io::Result<()> {
        let mut request = parse_request(req);
        let mut response = Response::new();
        if let Err(e) = self
            .router
            .pipeline()
            .invoke(&self.router, &mut request, &mut response)
        {
            error!(
                request_id = %request.id,
                error = %e,
                "Request processing failed"
            );
            response.send_error(500, "internal error");
        }
        write_response(res, &response);
        Ok(())
    }
}

/// Wrapper around may_minihttp's HTTP server.
///
/// Uses 32 max headers to handle modern API gateway/proxy traffic.
pub struct HttpServer<T>(pub T);

/// Handle to a running HTTP server.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Poll the bound address until the server accepts connections.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Block until the server coroutine finishes.
    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

impl<T: HttpService + Clone + Send + Sync + 'static> HttpServer<T> {
    /// Start the HTTP server on the given address.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let handle = HttpServerWithHeaders::<_, 32>(self.0).start(addr)?;
        Ok(ServerHandle { addr, handle })
    }
}
