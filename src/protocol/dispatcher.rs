use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::auth::SessionState;
use crate::core::frame::Frame;
use crate::core::wire::{WireReader, WireWriter};
use crate::error::{constants, Result, ServerError};
use crate::protocol::context::RequestContext;
use crate::protocol::handler::{FnHandler, Handler};
use crate::protocol::opcode;
use crate::protocol::response::Response;

/// Opcode routing table.
///
/// Handlers are registered at startup by whoever assembles the server; the
/// built-in set comes from [`crate::protocol::handlers::register_defaults`].
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<u16, Arc<dyn Handler>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register (or replace) the handler for `opcode`.
    pub fn register<H: Handler>(&self, opcode: u16, handler: H) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ServerError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        if let Some(previous) = handlers.insert(opcode, Arc::new(handler)) {
            debug!(opcode, replaced = previous.name(), "Handler replaced");
        }
        Ok(())
    }

    /// Register a closure as a handler.
    pub fn register_fn<F>(
        &self,
        opcode: u16,
        name: &'static str,
        requires_auth: bool,
        f: F,
    ) -> Result<()>
    where
        F: Fn(&RequestContext<'_>, &mut WireReader, &mut WireWriter) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.register(opcode, FnHandler::new(name, requires_auth, f))
    }

    pub fn handler(&self, opcode: u16) -> Result<Option<Arc<dyn Handler>>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ServerError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;
        Ok(handlers.get(&opcode).cloned())
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route one request frame and build the response frame.
    ///
    /// `Err` means the connection must be closed; rejections come back as an
    /// `Ok` frame carrying a rejected status.
    pub fn dispatch(&self, ctx: &RequestContext<'_>, frame: Frame) -> Result<Frame> {
        let Frame { opcode, body } = frame;

        if ctx.session.state == SessionState::Connecting && opcode != opcode::HELLO {
            warn!(session_id = ctx.session.id, opcode, "Request before handshake");
            return Err(ServerError::InvalidFrame(constants::ERR_HANDSHAKE_REQUIRED));
        }

        let metrics = &ctx.server.metrics;
        metrics.request();

        let Some(handler) = self.handler(opcode)? else {
            debug!(session_id = ctx.session.id, opcode, "Unknown opcode");
            metrics.rejection();
            return Ok(Frame::new(
                opcode,
                Response::rejected(constants::REJECT_UNKNOWN_OPCODE).encode(),
            ));
        };

        if handler.requires_auth() && !ctx.session.is_active() {
            metrics.rejection();
            return Ok(Frame::new(
                opcode,
                Response::rejected(constants::REJECT_NOT_AUTHENTICATED).encode(),
            ));
        }

        let mut reader = WireReader::new(body);
        let mut writer = WireWriter::new();
        let outcome = handler
            .handle(ctx, &mut reader, &mut writer)
            .and_then(|()| reader.finish());

        let response = match outcome {
            Ok(()) => Response::Ok(writer.into_bytes()),
            Err(ServerError::AuthRejected(reason)) => {
                debug!(
                    session_id = ctx.session.id,
                    handler = handler.name(),
                    reason = %reason,
                    "Request rejected"
                );
                metrics.rejection();
                Response::Rejected(reason)
            }
            Err(e) => return Err(e),
        };
        Ok(Frame::new(opcode, response.encode()))
    }
}
