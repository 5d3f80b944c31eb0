//! Bidirectional byte pipe for tunnels.
//!
//! # Responsibilities
//! - Copy client → origin and origin → client concurrently
//! - Stop both directions as soon as either one finishes
//! - Reuse copy buffers across tunnels
//!
//! # Design Decisions
//! - Both directions are polled by one `select!`; the losing copy is dropped, which
//!   cancels any read or write it was blocked on
//! - Clean EOF on either side is success; the first I/O error is returned
//! - Buffers come from a pool with a single size class and are never read before written

use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Size of every pooled copy buffer.
pub const BUFFER_SIZE: usize = 4096;

/// Idle buffers kept for reuse.
const MAX_IDLE_BUFFERS: usize = 1024;

/// Pool of fixed-size byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    size: usize,
    max_idle: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    pub fn new(size: usize, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            max_idle,
            free: Mutex::new(Vec::new()),
        })
    }

    /// Take a buffer, allocating when none is idle.
    pub fn checkout(self: &Arc<Self>) -> PooledBuffer {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        PooledBuffer {
            buf: Some(reused.unwrap_or_else(|| vec![0u8; self.size].into_boxed_slice())),
            pool: Arc::clone(self),
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn give_back(&self, buf: Box<[u8]>) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_idle {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            size: BUFFER_SIZE,
            max_idle: MAX_IDLE_BUFFERS,
            free: Mutex::new(Vec::new()),
        }
    }
}

/// A buffer on loan from a [`BufferPool`]; returned on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

/// Runs tunnels between a client and an origin.
#[derive(Debug, Clone)]
pub struct Pipe {
    pool: Arc<BufferPool>,
    idle_timeout: Option<Duration>,
}

impl Pipe {
    pub fn new(pool: Arc<BufferPool>, idle_timeout: Option<Duration>) -> Self {
        Self { pool, idle_timeout }
    }

    /// Copy in both directions until either side finishes, then shut down both writers.
    pub async fn run<CR, CW, OR, OW>(
        &self,
        client_reader: &mut CR,
        client_writer: &mut CW,
        origin_reader: &mut OR,
        origin_writer: &mut OW,
    ) -> io::Result<()>
    where
        CR: AsyncRead + Unpin + ?Sized,
        CW: AsyncWrite + Unpin + ?Sized,
        OR: AsyncRead + Unpin + ?Sized,
        OW: AsyncWrite + Unpin + ?Sized,
    {
        let mut up_buf = self.pool.checkout();
        let mut down_buf = self.pool.checkout();

        let result = {
            let upstream = copy_buffered(client_reader, origin_writer, &mut up_buf, self.idle_timeout);
            let downstream =
                copy_buffered(origin_reader, client_writer, &mut down_buf, self.idle_timeout);
            tokio::select! {
                r = upstream => {
                    trace!(direction = "client->origin", result = ?r, "Pipe direction finished");
                    r
                }
                r = downstream => {
                    trace!(direction = "origin->client", result = ?r, "Pipe direction finished");
                    r
                }
            }
        };

        let _ = origin_writer.shutdown().await;
        let _ = client_writer.shutdown().await;
        result.map(|_| ())
    }
}

async fn copy_buffered<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut copied = 0u64;
    loop {
        let n = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, reader.read(buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tunnel idle timeout"))??,
            None => reader.read(buf).await?,
        };
        if n == 0 {
            return Ok(copied);
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn buffers_are_reused() {
        let pool = BufferPool::new(16, 2);
        let first = pool.checkout();
        assert_eq!(first.len(), 16);
        assert_eq!(pool.idle(), 0);
        drop(first);
        assert_eq!(pool.idle(), 1);

        let a = pool.checkout();
        let b = pool.checkout();
        let c = pool.checkout();
        assert_eq!(pool.idle(), 0);
        drop((a, b, c));
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn copies_both_ways_until_close() {
        let pipe = Pipe::new(BufferPool::new(8, 4), None);
        let (client, mut client_peer) = duplex(64);
        let (origin, mut origin_peer) = duplex(64);

        let task = tokio::spawn(async move {
            let (mut cr, mut cw) = tokio::io::split(client);
            let (mut or, mut ow) = tokio::io::split(origin);
            pipe.run(&mut cr, &mut cw, &mut or, &mut ow).await
        });

        client_peer.write_all(b"hello origin, this is long").await.unwrap();
        let mut got = vec![0u8; 26];
        origin_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"hello origin, this is long");

        origin_peer.write_all(b"\x00\x01binary").await.unwrap();
        let mut got = vec![0u8; 8];
        client_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"\x00\x01binary");

        // Origin closes; the pipe ends and the client sees EOF.
        drop(origin_peer);
        task.await.unwrap().unwrap();
        let mut rest = Vec::new();
        client_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn idle_timeout_ends_tunnel() {
        let pipe = Pipe::new(BufferPool::new(8, 4), Some(Duration::from_millis(50)));
        let (client, _client_peer) = duplex(64);
        let (origin, _origin_peer) = duplex(64);
        let (mut cr, mut cw) = tokio::io::split(client);
        let (mut or, mut ow) = tokio::io::split(origin);

        let err = pipe.run(&mut cr, &mut cw, &mut or, &mut ow).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
