/*
    DNS - asynchronous name lookup contract

    The router never resolves names itself. A DnsDispatcher hands each query
    to a Resolver on its own task and reports back through exactly one of
    two callbacks:

      lookup(source, query)
        ├─ resolved in time  ──► on_reply(source, answer bytes)
        └─ error or timeout  ──► on_fail(source, query)

    Wire forms (LinkBuffer, big endian):
      query  = id u16 | name bytes | 0
      answer = id u16 | count u8 | count x (family u8 (4|6) | octets)
*/

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::util::LinkBuffer;

const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("no such host: {0}")]
    NotFound(String),

    #[error("lookup timed out")]
    Timeout,

    #[error("malformed dns message: {0}")]
    Malformed(&'static str),

    #[error("resolver failed: {0}")]
    Resolver(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub id: u16,
    pub name: String,
}

impl DnsQuery {
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, DnsError> {
        let name = self.name.as_bytes();
        if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains(&0) {
            return Err(DnsError::Malformed("query name"));
        }
        let mut buf = LinkBuffer::with_capacity(2 + name.len() + 1);
        let ok = buf.put_u16(self.id) && buf.write(name) && buf.put_u8(0);
        debug_assert!(ok);
        Ok(buf.into_used())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DnsError> {
        let mut buf = LinkBuffer::new(bytes);
        let id = buf.read_u16().ok_or(DnsError::Malformed("query header"))?;
        let mut name = [0u8; MAX_NAME_LEN];
        let len = buf.read_until(0, &mut name);
        // the terminator must be the final byte and the name must fit
        if !buf.is_exhausted() || bytes.last() != Some(&0) || len + 3 != bytes.len() || len == 0 {
            return Err(DnsError::Malformed("query name"));
        }
        let name = std::str::from_utf8(&name[..len])
            .map_err(|_| DnsError::Malformed("query name encoding"))?;
        Ok(Self::new(id, name))
    }
}

/// Encode the addresses answering query `id`.
pub fn encode_answer(id: u16, addrs: &[IpAddr]) -> Vec<u8> {
    let addrs = &addrs[..addrs.len().min(u8::MAX as usize)];
    let mut buf = LinkBuffer::with_capacity(3 + addrs.len() * 17);
    let mut ok = buf.put_u16(id) && buf.put_u8(addrs.len() as u8);
    for addr in addrs {
        ok = ok
            && match addr {
                IpAddr::V4(v4) => buf.put_u8(4) && buf.write(&v4.octets()),
                IpAddr::V6(v6) => buf.put_u8(6) && buf.write(&v6.octets()),
            };
    }
    debug_assert!(ok);
    buf.into_used()
}

pub fn decode_answer(bytes: &[u8]) -> Result<(u16, Vec<IpAddr>), DnsError> {
    let mut buf = LinkBuffer::new(bytes);
    let id = buf.read_u16().ok_or(DnsError::Malformed("answer header"))?;
    let count = buf.read_u8().ok_or(DnsError::Malformed("answer header"))?;
    let mut addrs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let addr = match buf.read_u8() {
            Some(4) => buf
                .read_array::<4>()
                .map(|o| IpAddr::V4(Ipv4Addr::from(o))),
            Some(6) => buf
                .read_array::<16>()
                .map(|o| IpAddr::V6(Ipv6Addr::from(o))),
            _ => None,
        };
        addrs.push(addr.ok_or(DnsError::Malformed("answer record"))?);
    }
    if !buf.is_exhausted() {
        return Err(DnsError::Malformed("trailing bytes in answer"));
    }
    Ok((id, addrs))
}

/// Something that can turn a query into answer bytes.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &DnsQuery) -> Result<Vec<u8>, DnsError>;
}

/// Answers from a fixed host table. Names are matched case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, name: &str, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(name.to_ascii_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, query: &DnsQuery) -> Result<Vec<u8>, DnsError> {
        let name = query.name.trim_end_matches('.').to_ascii_lowercase();
        match self.hosts.get(&name) {
            Some(addrs) => Ok(encode_answer(query.id, addrs)),
            None => Err(DnsError::NotFound(query.name.clone())),
        }
    }
}

pub type ReplyFn = Arc<dyn Fn(SocketAddr, Vec<u8>) + Send + Sync>;
pub type FailFn = Arc<dyn Fn(SocketAddr, DnsQuery) + Send + Sync>;

/// Runs lookups against a resolver and reports each through one callback.
#[derive(Clone)]
pub struct DnsDispatcher {
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
    on_reply: ReplyFn,
    on_fail: FailFn,
}

impl DnsDispatcher {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        timeout: Duration,
        on_reply: ReplyFn,
        on_fail: FailFn,
    ) -> Self {
        Self {
            resolver,
            timeout,
            on_reply,
            on_fail,
        }
    }

    /// Resolve `query` for `source` in the background.
    pub fn lookup(&self, source: SocketAddr, query: DnsQuery) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.resolve_and_report(source, query).await })
    }

    async fn resolve_and_report(&self, source: SocketAddr, query: DnsQuery) {
        let outcome = tokio::time::timeout(self.timeout, self.resolver.resolve(&query))
            .await
            .unwrap_or(Err(DnsError::Timeout));
        match outcome {
            Ok(answer) => {
                trace!(%source, id = query.id, "dns lookup answered");
                (self.on_reply)(source, answer);
            }
            Err(e) => {
                debug!(%source, name = %query.name, error = %e, "dns lookup failed");
                (self.on_fail)(source, query);
            }
        }
    }
}
