//! Request Service
//!
//! Authorizes commands and executes them against a backend. Transport
//! agnostic: the connection handler owns framing and streaming.

use std::net::IpAddr;
use std::sync::Arc;

use crate::auth::Authorizer;
use crate::backend::Backend;
use crate::engine::{content_filter, BoxWalk, CancelToken, WalkOptions};
use crate::error::{Result, VaultError};
use crate::protocol::{
    encode_put_reply, encode_remove_reply, encode_stat_reply, Command, Response, PONG,
};

/// A backend behind an authorizer
pub struct Service {
    backend: Arc<dyn Backend>,
    authorizer: Arc<dyn Authorizer>,
}

impl Service {
    pub fn new(backend: Arc<dyn Backend>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            backend,
            authorizer,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Check `command` for `peer`; ping is always allowed
    pub fn authorize(&self, peer: Option<IpAddr>, command: &Command) -> Result<()> {
        let Some(op) = command.operation() else {
            return Ok(());
        };
        if self.authorizer.authorize(peer, op) {
            return Ok(());
        }
        let who = peer.map_or_else(|| "unknown peer".to_string(), |ip| ip.to_string());
        tracing::info!("denied {} from {}", op, who);
        Err(VaultError::PermissionDenied(format!("{} not permitted for {}", op, who)))
    }

    /// Execute a single-reply command
    ///
    /// Failures are mapped to their wire status; walks go through
    /// [`Service::walk`] instead.
    pub fn execute(&self, peer: Option<IpAddr>, command: Command) -> Response {
        match self.try_execute(peer, command) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("request failed: {}", e);
                Response::from_error(&e)
            }
        }
    }

    fn try_execute(&self, peer: Option<IpAddr>, command: Command) -> Result<Response> {
        self.authorize(peer, &command)?;

        match command {
            Command::Get {
                address,
                skip_payload,
            } => match self.backend.get(&address)? {
                Some(_) if skip_payload => Ok(Response::ok(None)),
                Some(block) => Ok(Response::ok(Some(block.as_bytes().to_vec()))),
                None => Ok(Response::not_found()),
            },
            Command::Put { data, expected } => {
                let (address, inserted) = self.backend.put(&data, expected.as_ref())?;
                Ok(Response::ok(Some(encode_put_reply(&address, inserted))))
            }
            Command::Remove { address, secure } => {
                let deleted = self.backend.remove(&address, secure)?;
                Ok(Response::ok(Some(encode_remove_reply(deleted))))
            }
            Command::Stat => {
                let stat = self.backend.stat()?;
                Ok(Response::ok(Some(encode_stat_reply(&stat))))
            }
            Command::Ping => Ok(Response::ok(Some(PONG.to_vec()))),
            Command::Walk { .. } => Err(VaultError::Protocol(
                "walk replies are streamed".to_string(),
            )),
        }
    }

    /// Start an authorized walk
    pub fn walk(
        &self,
        peer: Option<IpAddr>,
        want_blocks: bool,
        pattern: Vec<u8>,
        cancel: CancelToken,
    ) -> Result<BoxWalk<'_>> {
        self.authorize(
            peer,
            &Command::Walk {
                want_blocks,
                pattern: Vec::new(),
            },
        )?;

        let filter = if pattern.is_empty() {
            None
        } else {
            Some(content_filter(pattern))
        };
        self.backend.walk(WalkOptions {
            want_blocks,
            filter,
            cancel: Some(cancel),
        })
    }
}
