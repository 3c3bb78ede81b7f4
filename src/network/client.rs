//! Blocking Client
//!
//! One TCP connection, one request at a time.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;

use crate::address::{Address, Block};
use crate::engine::{Stat, WalkItem};
use crate::error::{Result, VaultError};
use crate::protocol::{
    decode_put_reply, decode_remove_reply, decode_stat_reply, decode_walk_item, read_response,
    write_command, Command, Response, Status, PONG,
};

/// Client for a BlockVault server
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
        })
    }

    /// Apply the same timeout to reads and writes
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let stream = self.writer.get_ref();
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Send a command and read its single reply
    pub fn call(&mut self, command: &Command) -> Result<Response> {
        write_command(&mut self.writer, command)?;
        read_response(&mut self.reader)
    }

    /// Call and turn any non-OK status into an error
    fn call_ok(&mut self, command: &Command) -> Result<Vec<u8>> {
        let response = self.call(command)?;
        match response.status {
            Status::Ok => Ok(response.payload.unwrap_or_default()),
            _ => Err(response.into_error()),
        }
    }

    pub fn get(&mut self, address: &Address) -> Result<Option<Block>> {
        let response = self.call(&Command::Get {
            address: *address,
            skip_payload: false,
        })?;
        match response.status {
            Status::Ok => Ok(Some(Block::from_bytes(Bytes::from(
                response.payload.unwrap_or_default(),
            )))),
            Status::NotFound => Ok(None),
            _ => Err(response.into_error()),
        }
    }

    /// Check for a block without transferring it
    pub fn contains(&mut self, address: &Address) -> Result<bool> {
        let response = self.call(&Command::Get {
            address: *address,
            skip_payload: true,
        })?;
        match response.status {
            Status::Ok => Ok(true),
            Status::NotFound => Ok(false),
            _ => Err(response.into_error()),
        }
    }

    pub fn put(&mut self, data: &[u8], expected: Option<&Address>) -> Result<(Address, bool)> {
        let body = self.call_ok(&Command::Put {
            data: data.to_vec(),
            expected: expected.copied(),
        })?;
        decode_put_reply(&body)
    }

    pub fn remove(&mut self, address: &Address, secure: bool) -> Result<bool> {
        let body = self.call_ok(&Command::Remove {
            address: *address,
            secure,
        })?;
        decode_remove_reply(&body)
    }

    pub fn stat(&mut self) -> Result<Stat> {
        let body = self.call_ok(&Command::Stat)?;
        decode_stat_reply(&body)
    }

    pub fn ping(&mut self) -> Result<()> {
        let body = self.call_ok(&Command::Ping)?;
        if body != PONG {
            return Err(VaultError::Protocol("unexpected ping reply".to_string()));
        }
        Ok(())
    }

    /// Stream a walk, handing each item to `f`
    ///
    /// The whole stream is always drained so the connection stays usable,
    /// even when `f` fails; the first error from `f` is returned.
    pub fn walk_each<F>(&mut self, want_blocks: bool, pattern: &[u8], mut f: F) -> Result<u64>
    where
        F: FnMut(WalkItem) -> Result<()>,
    {
        write_command(
            &mut self.writer,
            &Command::Walk {
                want_blocks,
                pattern: pattern.to_vec(),
            },
        )?;

        let mut count = 0u64;
        let mut first_err = None;
        loop {
            let response = read_response(&mut self.reader)?;
            match response.status {
                Status::Ok => {
                    let item = decode_walk_item(response.payload.as_deref().unwrap_or(&[]))?;
                    count += 1;
                    if first_err.is_none() {
                        if let Err(e) = f(item) {
                            first_err = Some(e);
                        }
                    }
                }
                Status::End => break,
                _ => return Err(response.into_error()),
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Collect a whole walk
    pub fn walk(&mut self, want_blocks: bool, pattern: &[u8]) -> Result<Vec<WalkItem>> {
        let mut items = Vec::new();
        self.walk_each(want_blocks, pattern, |item| {
            items.push(item);
            Ok(())
        })?;
        Ok(items)
    }
}
