//! In-memory device backend
//!
//! Stands in for a serial port in tests and demos. Inbound bytes and errors
//! are queued from the test, outbound bytes are captured, and every read
//! call and open handle is counted.

use crate::transport::{LinkBackend, LinkReader, LinkWriter, PortHandles};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use ttt_link_core::{Endpoint, IoError, OpenError};

#[derive(Default)]
struct MemoryState {
    ports: Vec<String>,
    open_failures: VecDeque<OpenError>,
    opened: Vec<Endpoint>,
    inbound: VecDeque<Result<Vec<u8>, IoError>>,
    written: Vec<u8>,
    write_failures: VecDeque<IoError>,
    write_limit: Option<usize>,
    read_calls: u64,
    /// Reader and writer halves not yet dropped
    live_handles: usize,
}

/// Scripted device shared between the test and the link under test
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    data_ready: Arc<Notify>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        backend.lock().ports = ports.into_iter().map(Into::into).collect();
        backend
    }

    /// Make the next `open` fail with `err`
    pub fn fail_next_open(&self, err: OpenError) {
        self.lock().open_failures.push_back(err);
    }

    /// Queue raw inbound bytes as one read
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.lock().inbound.push_back(Ok(bytes.to_vec()));
        self.data_ready.notify_one();
    }

    /// Queue one frame, adding the delimiter
    pub fn push_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.push_bytes(&bytes);
    }

    /// Queue a read failure
    pub fn push_error(&self, err: IoError) {
        self.lock().inbound.push_back(Err(err));
        self.data_ready.notify_one();
    }

    /// Make the next write call fail with `err`
    pub fn fail_next_write(&self, err: IoError) {
        self.lock().write_failures.push_back(err);
    }

    /// Accept at most `limit` bytes per write call
    pub fn set_write_limit(&self, limit: usize) {
        self.lock().write_limit = Some(limit);
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Written bytes split into frames
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.lock().written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Endpoints passed to successful opens, oldest first
    pub fn opened(&self) -> Vec<Endpoint> {
        self.lock().opened.clone()
    }

    /// Number of read calls made against any handle from this backend
    pub fn read_calls(&self) -> u64 {
        self.lock().read_calls
    }

    /// Reader and writer halves still held by the link
    pub fn live_handles(&self) -> usize {
        self.lock().live_handles
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LinkBackend for MemoryBackend {
    fn enumerate(&self) -> Vec<String> {
        self.lock().ports.clone()
    }

    async fn open(&self, endpoint: &Endpoint, _timeout: Duration) -> Result<PortHandles, OpenError> {
        {
            let mut state = self.lock();
            if let Some(err) = state.open_failures.pop_front() {
                return Err(err);
            }
            state.opened.push(endpoint.clone());
            state.live_handles += 2;
        }
        Ok(PortHandles::new(
            MemoryReader {
                backend: self.clone(),
            },
            MemoryWriter {
                backend: self.clone(),
            },
        ))
    }
}

struct MemoryReader {
    backend: MemoryBackend,
}

#[async_trait]
impl LinkReader for MemoryReader {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        self.backend.lock().read_calls += 1;
        loop {
            {
                let mut state = self.backend.lock();
                match state.inbound.pop_front() {
                    Some(Ok(mut bytes)) => {
                        let n = bytes.len().min(buf.len());
                        buf[..n].copy_from_slice(&bytes[..n]);
                        if n < bytes.len() {
                            state.inbound.push_front(Ok(bytes.split_off(n)));
                        }
                        return Ok(n);
                    }
                    Some(Err(e)) => return Err(e),
                    None => {}
                }
            }
            self.backend.data_ready.notified().await;
        }
    }
}

impl Drop for MemoryReader {
    fn drop(&mut self) {
        self.backend.lock().live_handles -= 1;
    }
}

struct MemoryWriter {
    backend: MemoryBackend,
}

#[async_trait]
impl LinkWriter for MemoryWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<usize, IoError> {
        let mut state = self.backend.lock();
        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        let n = state.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.written.extend_from_slice(&data[..n]);
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), IoError> {
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.backend.lock().live_handles -= 1;
    }
}
