use log::{debug, trace};
use serde::Serialize;

use crate::coalesce::ports::{FillTag, MemPort, MemRequest, MemResponse};
use crate::coalesce::types::{Addr, AddrMap, VertexRecord};
use crate::timeq::{Cycle, ServerConfig, ServiceRequest, TimedServer};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemStats {
    pub fill_reads: u64,
    pub retry_reads: u64,
    pub write_backs: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub full_rejects: u64,
    pub retry_signals: u64,
}

/// One engine's memory channel: the vertex records of the atoms it owns, behind a timed FIFO.
/// Writes land and reads sample the image when their service completes, in acceptance order.
pub struct BackingMemory {
    map: AddrMap,
    data: Vec<u8>,
    server: TimedServer<MemRequest>,
    now: Cycle,
    retry_slots: Option<usize>,
    retry_ready: bool,
    stats: MemStats,
}

impl BackingMemory {
    pub fn new(config: ServerConfig, map: AddrMap, num_vertices: usize) -> Self {
        Self {
            map,
            data: vec![0; map.bits_for_vertices(num_vertices) * VertexRecord::BYTES],
            server: TimedServer::new(config),
            now: 0,
            retry_slots: None,
            retry_ready: false,
            stats: MemStats::default(),
        }
    }

    pub fn stats(&self) -> MemStats {
        self.stats
    }

    pub fn is_idle(&self) -> bool {
        self.server.is_idle() && !self.retry_ready
    }

    /// Byte offset of a record or line within this channel's slice of the vertex space.
    fn local_offset(map: &AddrMap, addr: Addr) -> usize {
        (map.bit_index_base(map.align(addr)) + map.offset(addr)) * VertexRecord::BYTES
    }

    /// Complete every request due by `now` and arm the capacity retry if it can be honored.
    pub fn tick(&mut self, now: Cycle) -> Vec<MemResponse> {
        self.now = now;
        let map = self.map;
        let data = &mut self.data;
        let mut responses = Vec::new();
        self.server.service_ready(now, |result| {
            let response = match result.payload {
                MemRequest::FillRead { line_addr, size, tag } => {
                    let start = Self::local_offset(&map, line_addr);
                    MemResponse::Fill {
                        line_addr,
                        tag,
                        data: data[start..start + size].to_vec(),
                    }
                }
                MemRequest::WriteBack { line_addr, data: line } => {
                    let start = Self::local_offset(&map, line_addr);
                    data[start..start + line.len()].copy_from_slice(&line);
                    MemResponse::WriteAck { line_addr }
                }
            };
            trace!("mem @ {now}: {:#x} done", result.ticket.issued_at());
            responses.push(response);
        });

        if let Some(slots) = self.retry_slots {
            if self.server.free_slots() >= slots {
                self.retry_slots = None;
                self.retry_ready = true;
                self.stats.retry_signals = self.stats.retry_signals.saturating_add(1);
            }
        }
        responses
    }

    /// Whether a requested capacity retry is due; consumes the signal.
    pub fn take_retry_signal(&mut self) -> bool {
        std::mem::take(&mut self.retry_ready)
    }

    fn enqueue(&mut self, request: MemRequest) -> bool {
        let size = request.size() as u32;
        match self.server.try_enqueue(self.now, ServiceRequest::new(request, size)) {
            Ok(ticket) => {
                trace!("mem: accepted, ready at {}", ticket.ready_at());
                true
            }
            Err(backpressure) => {
                let request = backpressure.into_request().payload;
                debug!("mem: queue full, refused {:#x}", request.line_addr());
                self.stats.full_rejects = self.stats.full_rejects.saturating_add(1);
                false
            }
        }
    }
}

impl MemPort for BackingMemory {
    fn can_accept(&self, slots: usize) -> bool {
        self.server.free_slots() >= slots
    }

    fn enqueue_fill_read(&mut self, line_addr: Addr, size: usize, tag: FillTag) -> bool {
        let accepted = self.enqueue(MemRequest::FillRead { line_addr, size, tag });
        if accepted {
            match tag {
                FillTag::Miss => self.stats.fill_reads = self.stats.fill_reads.saturating_add(1),
                FillTag::Retry => self.stats.retry_reads = self.stats.retry_reads.saturating_add(1),
            }
            self.stats.bytes_read = self.stats.bytes_read.saturating_add(size as u64);
        }
        accepted
    }

    fn enqueue_write_back(&mut self, line_addr: Addr, data: Vec<u8>) -> bool {
        let size = data.len() as u64;
        let accepted = self.enqueue(MemRequest::WriteBack { line_addr, data });
        if accepted {
            self.stats.write_backs = self.stats.write_backs.saturating_add(1);
            self.stats.bytes_written = self.stats.bytes_written.saturating_add(size);
        }
        accepted
    }

    fn request_capacity_retry(&mut self, slots: usize) {
        assert!(
            slots <= self.server.config().queue_capacity,
            "retry for {slots} slots can never be honored"
        );
        self.retry_slots = Some(self.retry_slots.map_or(slots, |held| held.max(slots)));
    }

    fn read_functional(&self, addr: Addr) -> VertexRecord {
        let start = Self::local_offset(&self.map, addr);
        VertexRecord::from_bytes(&self.data[start..start + VertexRecord::BYTES])
    }

    fn write_functional(&mut self, addr: Addr, record: VertexRecord) {
        let start = Self::local_offset(&self.map, addr);
        self.data[start..start + VertexRecord::BYTES].copy_from_slice(&record.to_bytes());
    }
}
