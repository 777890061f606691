use crate::core::wire::{WireReader, WireWriter};
use crate::error::Result;
use crate::protocol::context::RequestContext;

/// One request type.
///
/// `handle` reads its arguments from `body` and writes the OK payload to
/// `out`. Returning [`crate::error::ServerError::AuthRejected`] answers the
/// client with the reason and keeps the connection; any other error closes
/// it.
pub trait Handler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Whether the session must be `Active` before this handler runs.
    fn requires_auth(&self) -> bool {
        true
    }

    fn handle(
        &self,
        ctx: &RequestContext<'_>,
        body: &mut WireReader,
        out: &mut WireWriter,
    ) -> Result<()>;
}

type HandlerFn =
    dyn Fn(&RequestContext<'_>, &mut WireReader, &mut WireWriter) -> Result<()> + Send + Sync;

/// Adapts a closure into a [`Handler`].
pub struct FnHandler {
    name: &'static str,
    requires_auth: bool,
    f: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F>(name: &'static str, requires_auth: bool, f: F) -> Self
    where
        F: Fn(&RequestContext<'_>, &mut WireReader, &mut WireWriter) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            requires_auth,
            f: Box::new(f),
        }
    }
}

impl Handler for FnHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    fn handle(
        &self,
        ctx: &RequestContext<'_>,
        body: &mut WireReader,
        out: &mut WireWriter,
    ) -> Result<()> {
        (self.f)(ctx, body, out)
    }
}
