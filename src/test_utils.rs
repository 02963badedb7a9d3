// Copyright (C) 2020  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Scriptable transport double for tests.
//!
//! `FakeTransport` replays a queue of canned replies and records every
//! request together with its arrival time, so tests can assert request
//! serialization, cooldowns and retry cadence against a paused clock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::frames::{PrivateRequest, PrivateResponse};
use crate::transport::{Reply, Transport, WriteEcho};

/// One canned reply
#[derive(Debug, Clone)]
pub enum FakeReply {
    /// Answer a read with these words
    Words(Vec<u16>),
    /// Answer a write by echoing address and count
    Echo,
    /// Answer with a Modbus exception code
    Exception(u8),
    /// Answer a private-function request
    Private(PrivateResponse),
    /// Never answer; the caller's deadline fires
    Silence,
}

/// A request as seen by the fake device
#[derive(Debug, Clone, PartialEq)]
pub enum FakeRequest {
    ReadHolding {
        address: u16,
        count: u16,
        slave: u8,
    },
    WriteMultiple {
        address: u16,
        words: Vec<u16>,
        slave: u8,
    },
    WriteSingle {
        address: u16,
        word: u16,
        slave: u8,
    },
    Private {
        sub_command: u8,
        content: Vec<u8>,
        slave: u8,
    },
}

#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub request: FakeRequest,
    pub at: Instant,
}

struct Inner {
    replies: VecDeque<FakeReply>,
    log: Vec<LoggedRequest>,
    connected: bool,
}

/// Cloneable handle to a scripted transport; clones share the script and
/// the request log
#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                replies: VecDeque::new(),
                log: Vec::new(),
                connected: true,
            })),
        }
    }

    pub fn push_reply(&self, reply: FakeReply) {
        self.inner.lock().unwrap().replies.push_back(reply);
    }

    pub fn push_replies(&self, replies: impl IntoIterator<Item = FakeReply>) {
        let mut inner = self.inner.lock().unwrap();
        inner.replies.extend(replies);
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connected = connected;
    }

    /// All requests recorded so far
    pub fn requests(&self) -> Vec<FakeRequest> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .map(|entry| entry.request.clone())
            .collect()
    }

    /// Arrival instants of all recorded requests
    pub fn request_times(&self) -> Vec<Instant> {
        self.inner.lock().unwrap().log.iter().map(|entry| entry.at).collect()
    }

    pub fn pending_replies(&self) -> usize {
        self.inner.lock().unwrap().replies.len()
    }

    fn record_and_pop(&self, request: FakeRequest) -> Result<FakeReply> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(LoggedRequest {
            request,
            at: Instant::now(),
        });
        inner
            .replies
            .pop_front()
            .ok_or_else(|| Error::General("fake transport script exhausted".into()))
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        slave: u8,
    ) -> Result<Reply<Vec<u16>>> {
        let reply = self.record_and_pop(FakeRequest::ReadHolding {
            address,
            count,
            slave,
        })?;
        match reply {
            FakeReply::Words(words) => Ok(Reply::Data(words)),
            FakeReply::Exception(code) => Ok(Reply::Exception(code)),
            FakeReply::Silence => futures::future::pending().await,
            other => Err(Error::General(format!(
                "scripted reply {:?} doesn't answer a read",
                other
            ))),
        }
    }

    async fn write_registers(
        &mut self,
        address: u16,
        words: &[u16],
        slave: u8,
    ) -> Result<Reply<WriteEcho>> {
        let count = words.len() as u16;
        let reply = self.record_and_pop(FakeRequest::WriteMultiple {
            address,
            words: words.to_vec(),
            slave,
        })?;
        match reply {
            FakeReply::Echo => Ok(Reply::Data(WriteEcho { address, count })),
            FakeReply::Exception(code) => Ok(Reply::Exception(code)),
            FakeReply::Silence => futures::future::pending().await,
            other => Err(Error::General(format!(
                "scripted reply {:?} doesn't answer a write",
                other
            ))),
        }
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        word: u16,
        slave: u8,
    ) -> Result<Reply<WriteEcho>> {
        let reply = self.record_and_pop(FakeRequest::WriteSingle {
            address,
            word,
            slave,
        })?;
        match reply {
            FakeReply::Echo => Ok(Reply::Data(WriteEcho { address, count: 1 })),
            FakeReply::Exception(code) => Ok(Reply::Exception(code)),
            FakeReply::Silence => futures::future::pending().await,
            other => Err(Error::General(format!(
                "scripted reply {:?} doesn't answer a write",
                other
            ))),
        }
    }

    async fn execute(
        &mut self,
        request: &PrivateRequest,
        slave: u8,
    ) -> Result<Reply<PrivateResponse>> {
        let reply = self.record_and_pop(FakeRequest::Private {
            sub_command: request.sub_command,
            content: request.content.clone(),
            slave,
        })?;
        match reply {
            FakeReply::Private(response) => Ok(Reply::Data(response)),
            FakeReply::Exception(code) => Ok(Reply::Exception(code)),
            FakeReply::Silence => futures::future::pending().await,
            other => Err(Error::General(format!(
                "scripted reply {:?} doesn't answer a private request",
                other
            ))),
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.lock().unwrap().connected = false;
        Ok(())
    }
}
