//! Narrow contracts between the coalescing engine and its collaborators.
//!
//! The engine owns its backing-memory transport and its downstream propagation port; the
//! upstream reduction stage is handed in per tick so it can receive responses.

use crate::coalesce::types::{Addr, VertexRecord};

/// Why a fill read was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillTag {
    /// Ordinary miss or conflict refill; completes through the MSHR table.
    Miss,
    /// Issued by the retry responder only to re-offer flagged records.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemRequest {
    FillRead { line_addr: Addr, size: usize, tag: FillTag },
    WriteBack { line_addr: Addr, data: Vec<u8> },
}

impl MemRequest {
    pub fn line_addr(&self) -> Addr {
        match self {
            MemRequest::FillRead { line_addr, .. } => *line_addr,
            MemRequest::WriteBack { line_addr, .. } => *line_addr,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            MemRequest::FillRead { size, .. } => *size,
            MemRequest::WriteBack { data, .. } => data.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemResponse {
    Fill { line_addr: Addr, tag: FillTag, data: Vec<u8> },
    WriteAck { line_addr: Addr },
}

/// Backing-memory transport.
pub trait MemPort {
    /// Whether `slots` more outstanding requests would currently be accepted.
    fn can_accept(&self, slots: usize) -> bool;

    fn enqueue_fill_read(&mut self, line_addr: Addr, size: usize, tag: FillTag) -> bool;

    fn enqueue_write_back(&mut self, line_addr: Addr, data: Vec<u8>) -> bool;

    /// Ask to be resumed through `CoalesceEngine::on_mem_retry` once `slots` requests fit.
    fn request_capacity_retry(&mut self, slots: usize);

    /// Untimed access for image load and final dump.
    fn read_functional(&self, addr: Addr) -> VertexRecord;

    fn write_functional(&mut self, addr: Addr, record: VertexRecord);
}

/// Downstream propagation stage.
pub trait PushPort {
    /// Offer a changed record; `false` is back-pressure and the caller must remember the record.
    fn forward(&mut self, record: VertexRecord) -> bool;

    /// Deliver a record into a slot reserved ahead of a capacity-freed notification.
    fn forward_retry(&mut self, record: VertexRecord);

    /// Hand back reserved slots that turned out not to be needed.
    fn release_forward_slots(&mut self, count: usize);

    /// Ask for another capacity-freed notification once a line's worth of slots is free.
    fn request_capacity_notification(&mut self);
}

/// Upstream reduction stage; receives one response per accepted read, in order.
pub trait ReducePort {
    fn deliver_record(&mut self, addr: Addr, record: VertexRecord);
}
