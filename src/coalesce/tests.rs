use std::collections::{HashMap, HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::timeq::Cycle;

const ATOM: usize = 64;
const RECORDS_PER_LINE: usize = ATOM / VertexRecord::BYTES;

fn vaddr(vertex: usize) -> Addr {
    (vertex * VertexRecord::BYTES) as Addr
}

#[derive(Default)]
struct MockMem {
    capacity: usize,
    queue: VecDeque<MemRequest>,
    image: HashMap<Addr, VertexRecord>,
    retry_slots: Option<usize>,
}

impl MockMem {
    fn record(&self, addr: Addr) -> VertexRecord {
        self.image
            .get(&addr)
            .copied()
            .unwrap_or_else(|| VertexRecord::unreached(1, (addr / 16) as u32))
    }

    fn line_data(&self, line_addr: Addr) -> Vec<u8> {
        let records: Vec<_> = (0..RECORDS_PER_LINE)
            .map(|i| self.record(line_addr + vaddr(i)))
            .collect();
        encode_records(&records)
    }
}

impl MemPort for MockMem {
    fn can_accept(&self, slots: usize) -> bool {
        self.queue.len() + slots <= self.capacity
    }

    fn enqueue_fill_read(&mut self, line_addr: Addr, size: usize, tag: FillTag) -> bool {
        if !self.can_accept(1) {
            return false;
        }
        self.queue.push_back(MemRequest::FillRead { line_addr, size, tag });
        true
    }

    fn enqueue_write_back(&mut self, line_addr: Addr, data: Vec<u8>) -> bool {
        if !self.can_accept(1) {
            return false;
        }
        self.queue.push_back(MemRequest::WriteBack { line_addr, data });
        true
    }

    fn request_capacity_retry(&mut self, slots: usize) {
        self.retry_slots = Some(self.retry_slots.map_or(slots, |held| held.max(slots)));
    }

    fn read_functional(&self, addr: Addr) -> VertexRecord {
        self.record(addr)
    }

    fn write_functional(&mut self, addr: Addr, record: VertexRecord) {
        self.image.insert(addr, record);
    }
}

struct MockPush {
    accept: bool,
    forwarded: Vec<VertexRecord>,
    retried: Vec<VertexRecord>,
    released: usize,
    notify_requests: usize,
}

impl Default for MockPush {
    fn default() -> Self {
        Self {
            accept: true,
            forwarded: Vec::new(),
            retried: Vec::new(),
            released: 0,
            notify_requests: 0,
        }
    }
}

impl PushPort for MockPush {
    fn forward(&mut self, record: VertexRecord) -> bool {
        if self.accept {
            self.forwarded.push(record);
        }
        self.accept
    }

    fn forward_retry(&mut self, record: VertexRecord) {
        self.retried.push(record);
    }

    fn release_forward_slots(&mut self, count: usize) {
        self.released += count;
    }

    fn request_capacity_notification(&mut self) {
        self.notify_requests += 1;
    }
}

#[derive(Default)]
struct Upstream {
    delivered: VecDeque<(Addr, VertexRecord)>,
}

impl ReducePort for Upstream {
    fn deliver_record(&mut self, addr: Addr, record: VertexRecord) {
        self.delivered.push_back((addr, record));
    }
}

struct Bench {
    engine: CoalesceEngine<MockMem, MockPush>,
    up: Upstream,
    now: Cycle,
}

impl Bench {
    fn new(num_lines: usize, mshr_entries: usize, targets: usize, mem_capacity: usize) -> Self {
        let config = CoalesceConfig {
            cache_size: num_lines * ATOM,
            atom_size: ATOM,
            num_mshr_entries: mshr_entries,
            num_targets_per_mshr: targets,
            response_queue_size: 0,
        };
        Self::with_config(config, mem_capacity)
    }

    fn with_config(config: CoalesceConfig, mem_capacity: usize) -> Self {
        let mem = MockMem {
            capacity: mem_capacity,
            ..MockMem::default()
        };
        let map = AddrMap::new(0, ATOM as u64, 1);
        Self {
            engine: CoalesceEngine::new(config, map, 64, mem, MockPush::default(), Min),
            up: Upstream::default(),
            now: 0,
        }
    }

    fn tick(&mut self) {
        self.engine.tick(self.now, &mut self.up);
        self.now += 1;
    }

    fn run(&mut self, cycles: usize) {
        for _ in 0..cycles {
            self.tick();
        }
    }

    /// Complete the oldest memory request, if any.
    fn serve_one(&mut self) -> bool {
        let Some(request) = self.engine.mem_mut().queue.pop_front() else {
            return false;
        };
        match request {
            MemRequest::FillRead { line_addr, tag, .. } => {
                let data = self.engine.mem().line_data(line_addr);
                self.engine.on_mem_response(MemResponse::Fill { line_addr, tag, data });
            }
            MemRequest::WriteBack { line_addr, data } => {
                for (i, record) in decode_records(&data).into_iter().enumerate() {
                    self.engine.mem_mut().image.insert(line_addr + vaddr(i), record);
                }
                self.engine.on_mem_response(MemResponse::WriteAck { line_addr });
            }
        }
        self.signal_mem_retry();
        true
    }

    fn serve_mem(&mut self) {
        while self.serve_one() {}
    }

    fn signal_mem_retry(&mut self) {
        let mem = self.engine.mem();
        if let Some(slots) = mem.retry_slots {
            if mem.can_accept(slots) {
                self.engine.mem_mut().retry_slots = None;
                self.engine.on_mem_retry();
            }
        }
    }

    fn seed(&mut self, vertex: usize, record: VertexRecord) {
        self.engine.mem_mut().image.insert(vaddr(vertex), record);
    }

    /// Read `vertex` through a cold miss and return the delivered record.
    fn check_out(&mut self, vertex: usize) -> VertexRecord {
        self.engine.request_read(vaddr(vertex)).expect("read accepted");
        for _ in 0..16 {
            self.serve_mem();
            self.tick();
            if let Some((addr, record)) = self.up.delivered.pop_front() {
                assert_eq!(vaddr(vertex), addr);
                return record;
            }
        }
        panic!("vertex {vertex} was not delivered");
    }

    fn with_candidate(&mut self, vertex: usize, candidate: u32) {
        let mut record = self.check_out(vertex);
        record.temp_prop = record.temp_prop.min(candidate);
        self.engine.write_back(vaddr(vertex), record);
        self.run(4);
    }
}

#[test]
fn merged_miss_serves_both_reads() {
    let mut bench = Bench::new(4, 4, 4, 8);
    let a = vaddr(1);
    assert_eq!(Ok(ReadIssue::Miss), bench.engine.request_read(a));
    assert_eq!(Ok(ReadIssue::HitUnderMiss), bench.engine.request_read(a));
    assert_eq!(1, bench.engine.mem().queue.len(), "second read must not issue a fill");
    let index = bench.engine.line_index(a);
    assert_eq!(2, bench.engine.mshr_targets(index));

    bench.serve_mem();
    bench.run(3);
    assert_eq!(2, bench.up.delivered.len());
    assert_eq!(bench.up.delivered[0], bench.up.delivered[1]);
    assert_eq!(0, bench.engine.mshr_len());
    assert!(bench.engine.line(index).is_record_busy(1));
    assert_eq!(1, bench.engine.stats().read_hit_under_misses);
}

#[test]
fn hit_returns_last_written_record() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.with_candidate(2, 5);
    assert_eq!(1, bench.engine.push().forwarded.len());
    assert_eq!(5, bench.engine.push().forwarded[0].prop);

    assert_eq!(Ok(ReadIssue::Hit), bench.engine.request_read(vaddr(2)));
    bench.run(2);
    let (_, record) = bench.up.delivered.pop_front().expect("hit delivered");
    assert_eq!(5, record.prop);
    assert_eq!(5, record.temp_prop);
    assert_eq!(1, bench.engine.stats().read_hits);
}

#[test]
fn responses_delivered_in_acceptance_order() {
    let mut bench = Bench::new(4, 4, 8, 8);
    let order = [3, 0, 2, 1];
    for vertex in order {
        bench.engine.request_read(vaddr(vertex)).expect("read accepted");
    }
    bench.serve_mem();
    bench.run(6);
    let delivered: Vec<_> = bench.up.delivered.iter().map(|(addr, _)| *addr).collect();
    let expected: Vec<_> = order.iter().map(|&v| vaddr(v)).collect();
    assert_eq!(expected, delivered);
}

#[test]
fn conflict_evicts_dirty_line_and_refills() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.with_candidate(0, 3);
    let index = bench.engine.line_index(vaddr(0));
    assert!(bench.engine.line(index).dirty);

    // 4 lines of 4 records: vertex 16 maps onto the same line index as vertex 0
    let b = vaddr(16);
    assert_eq!(index, bench.engine.line_index(b));
    assert_eq!(Ok(ReadIssue::Conflict), bench.engine.request_read(b));
    assert!(bench.engine.line(index).has_conflict);

    bench.run(4);
    let queued: Vec<_> = bench.engine.mem().queue.iter().cloned().collect();
    assert!(matches!(queued[0], MemRequest::WriteBack { line_addr: 0, .. }));
    assert!(matches!(
        queued[1],
        MemRequest::FillRead { line_addr: 0x100, tag: FillTag::Miss, .. }
    ));

    bench.serve_mem();
    bench.run(2);
    assert_eq!(Some((b, VertexRecord::unreached(1, 16))), bench.up.delivered.pop_front());
    assert_eq!(3, bench.engine.mem().record(vaddr(0)).prop);
    let line = bench.engine.line(index);
    assert_eq!(0x100, line.addr);
    assert!(line.valid && !line.has_conflict && !line.dirty);
    assert_eq!(0, bench.engine.mshr_len());
    let stats = bench.engine.stats();
    assert_eq!(1, stats.write_backs);
    assert_eq!(1, stats.refills);
}

#[test]
fn every_conflicting_address_eventually_served() {
    let mut bench = Bench::new(4, 4, 8, 8);
    let contenders = [0, 16, 32, 48, 17];
    for vertex in contenders {
        bench.engine.request_read(vaddr(vertex)).expect("read accepted");
    }
    let mut served = HashSet::new();
    for _ in 0..200 {
        bench.serve_mem();
        bench.tick();
        while let Some((addr, record)) = bench.up.delivered.pop_front() {
            served.insert(addr);
            bench.engine.write_back(addr, record);
        }
    }
    let expected: HashSet<_> = contenders.iter().map(|&v| vaddr(v)).collect();
    assert_eq!(expected, served);
    assert!(bench.engine.is_idle());
}

#[test]
fn mshr_full_rejects_new_line_only() {
    let mut bench = Bench::new(4, 1, 4, 8);
    assert_eq!(Ok(ReadIssue::Miss), bench.engine.request_read(vaddr(0)));
    assert_eq!(
        Err(ReadReject {
            addr: vaddr(4),
            reason: RejectReason::MshrFull
        }),
        bench.engine.request_read(vaddr(4))
    );
    assert_eq!(Ok(ReadIssue::HitUnderMiss), bench.engine.request_read(vaddr(1)));
    assert_eq!(1, bench.engine.stats().mshr_full_rejects);
    assert!(bench.engine.mshr_len() <= 1);
}

#[test]
fn target_list_bound_rejects() {
    let mut bench = Bench::new(4, 4, 2, 8);
    bench.engine.request_read(vaddr(0)).expect("miss");
    bench.engine.request_read(vaddr(1)).expect("merged");
    let reject = bench.engine.request_read(vaddr(2)).unwrap_err();
    assert_eq!(RejectReason::TargetsFull, reject.reason);
    assert_eq!(2, bench.engine.mshr_targets(bench.engine.line_index(vaddr(0))));
}

#[test]
fn full_transport_rejects_miss() {
    let mut bench = Bench::new(4, 4, 4, 1);
    bench.engine.request_read(vaddr(0)).expect("miss");
    let reject = bench.engine.request_read(vaddr(4)).unwrap_err();
    assert_eq!(RejectReason::MemQueueFull, reject.reason);
    assert_eq!(1, bench.engine.stats().read_rejections());
    // nothing was allocated for the rejected read
    assert!(!bench.engine.line(1).allocated);
}

#[test]
fn response_queue_soft_limit() {
    let config = CoalesceConfig {
        cache_size: 4 * ATOM,
        response_queue_size: 1,
        ..CoalesceConfig::default()
    };
    let mut bench = Bench::with_config(config, 8);
    bench.engine.request_read(vaddr(0)).expect("miss");
    bench.engine.request_read(vaddr(1)).expect("merged");
    bench.serve_mem();
    assert_eq!(2, bench.engine.pending_responses());
    let reject = bench.engine.request_read(vaddr(2)).unwrap_err();
    assert_eq!(RejectReason::ResponseQueueFull, reject.reason);
}

#[test]
#[should_panic(expected = "without a checked-out record")]
fn write_back_requires_checkout() {
    let mut bench = Bench::new(4, 4, 4, 8);
    let record = bench.check_out(0);
    bench.engine.write_back(vaddr(0), record);
    bench.engine.write_back(vaddr(0), record);
}

#[test]
fn unchanged_line_stays_clean_and_quiet() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.seed(5, VertexRecord::new(2, 2, 3, 0));
    let record = bench.check_out(5);
    bench.engine.write_back(vaddr(5), record);
    bench.run(4);
    let line = bench.engine.line(bench.engine.line_index(vaddr(5)));
    assert!(!line.dirty);
    assert!(bench.engine.push().forwarded.is_empty());
    assert_eq!(0, bench.engine.stats().vertex_writes);
}

#[test]
fn busy_line_is_not_applied() {
    let mut bench = Bench::new(4, 4, 4, 8);
    let mut first = bench.check_out(0);
    first.temp_prop = 7;
    bench.engine.write_back(vaddr(0), first);
    // a new checkout races ahead of the scheduled apply
    assert_eq!(Ok(ReadIssue::Hit), bench.engine.request_read(vaddr(1)));
    bench.run(4);
    assert_eq!(1, bench.engine.stats().false_apply_schedules);
    assert_eq!(u32::MAX, bench.engine.resident_record(vaddr(0)).unwrap().prop);

    let (_, second) = bench.up.delivered.pop_front().expect("hit delivered");
    bench.engine.write_back(vaddr(1), second);
    bench.run(4);
    assert_eq!(7, bench.engine.resident_record(vaddr(0)).unwrap().prop);
}

#[test]
fn zero_degree_change_is_not_forwarded() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.seed(3, VertexRecord::unreached(0, 0));
    bench.with_candidate(3, 1);
    assert_eq!(1, bench.engine.resident_record(vaddr(3)).unwrap().prop);
    assert!(bench.engine.push().forwarded.is_empty());
    assert!(!bench.engine.retry_bits().any());
}

#[test]
fn refused_forward_redelivered_once() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.engine.push_mut().accept = false;
    bench.with_candidate(0, 4);
    assert!(bench.engine.retry_bits().get(0));
    assert!(bench.engine.push().forwarded.is_empty());

    bench.engine.on_capacity_freed();
    bench.run(2);
    let push = bench.engine.push();
    assert_eq!(1, push.retried.len());
    assert_eq!(4, push.retried[0].prop);
    assert_eq!(RECORDS_PER_LINE - 1, push.released);
    assert!(!bench.engine.retry_bits().any());

    bench.engine.on_capacity_freed();
    bench.run(2);
    assert_eq!(1, bench.engine.push().retried.len());
    assert_eq!(2 * RECORDS_PER_LINE - 1, bench.engine.push().released);
    assert_eq!(1, bench.engine.stats().empty_retry_sweeps);
}

#[test]
fn flagged_record_not_reforwarded_by_apply() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.engine.push_mut().accept = false;
    bench.with_candidate(0, 9);
    bench.engine.push_mut().accept = true;
    bench.with_candidate(0, 6);
    // still flagged: only the retry responder may offer it again
    assert!(bench.engine.push().forwarded.is_empty());
    assert!(bench.engine.retry_bits().get(0));

    bench.engine.on_capacity_freed();
    bench.run(2);
    assert_eq!(6, bench.engine.push().retried[0].prop);
}

#[test]
fn busy_line_defers_retry_delivery() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.engine.push_mut().accept = false;
    bench.with_candidate(0, 4);
    bench.engine.request_read(vaddr(1)).expect("hit");
    bench.run(2);

    bench.engine.on_capacity_freed();
    bench.run(2);
    assert!(bench.engine.push().retried.is_empty());
    assert!(bench.engine.retry_bits().get(0));
    assert_eq!(RECORDS_PER_LINE, bench.engine.push().released);
    assert!(bench.engine.push().notify_requests > 0);

    let (_, record) = bench.up.delivered.pop_front().expect("hit delivered");
    bench.engine.write_back(vaddr(1), record);
    bench.engine.on_capacity_freed();
    bench.run(4);
    assert_eq!(1, bench.engine.push().retried.len());
    assert!(!bench.engine.retry_bits().any());
}

#[test]
fn retry_fill_serves_flag_of_evicted_line() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.engine.push_mut().accept = false;
    bench.with_candidate(0, 4);
    assert!(bench.engine.retry_bits().get(0));

    // push vertex 0's line out through a conflict
    bench.engine.request_read(vaddr(16)).expect("conflict");
    bench.run(4);
    bench.serve_mem();
    bench.run(2);
    assert!(bench.engine.resident_record(vaddr(0)).is_none());

    bench.engine.on_capacity_freed();
    bench.run(2);
    assert!(matches!(
        bench.engine.mem().queue.front(),
        Some(MemRequest::FillRead { line_addr: 0, tag: FillTag::Retry, .. })
    ));
    bench.serve_mem();
    let push = bench.engine.push();
    assert_eq!(1, push.retried.len());
    assert_eq!(4, push.retried[0].prop);
    assert!(!bench.engine.retry_bits().any());
    assert_eq!(1, bench.engine.stats().retry_fills);
}

#[test]
fn write_back_during_retry_fill_marks_it_stale() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.engine.push_mut().accept = false;
    bench.with_candidate(0, 4);
    bench.engine.request_read(vaddr(16)).expect("conflict");
    bench.run(4);
    bench.serve_mem();
    bench.run(2);
    let (_, b) = bench.up.delivered.pop_front().expect("conflict served");

    // vertex 0 is out; a retry fill for it goes in flight
    bench.engine.on_capacity_freed();
    bench.run(2);
    assert_eq!(1, bench.engine.mem().queue.len());

    // vertex 0 comes back, changes, and is written back before the retry fill lands
    bench.engine.write_back(vaddr(16), b);
    bench.engine.request_read(vaddr(0)).expect("conflict");
    bench.run(4);
    let retry_fill = bench.engine.mem_mut().queue.pop_front().expect("retry fill");
    bench.serve_mem();
    bench.run(2);
    let (_, mut a) = bench.up.delivered.pop_front().expect("vertex 0 refilled");
    a.temp_prop = 2;
    bench.engine.write_back(vaddr(0), a);
    bench.run(2);
    bench.engine.request_read(vaddr(32)).expect("conflict");
    bench.run(4);
    bench.serve_mem();

    let MemRequest::FillRead { line_addr, tag, .. } = retry_fill else {
        panic!("expected a fill");
    };
    let data = bench.engine.mem().line_data(line_addr);
    bench.engine.on_mem_response(MemResponse::Fill { line_addr, tag, data });
    assert_eq!(1, bench.engine.stats().stale_retry_fills);
    assert!(bench.engine.retry_bits().get(0));
    assert!(bench.engine.push().retried.is_empty());
}

/// Flag vertex 0, evict its line, put a retry fill for it in flight, then bring the line back
/// through an ordinary miss ahead of that fill. Returns the held retry fill and vertex 0's
/// checked-out record.
fn retry_fill_behind_refill(bench: &mut Bench) -> (MemRequest, VertexRecord) {
    bench.engine.push_mut().accept = false;
    bench.with_candidate(0, 4);
    bench.engine.request_read(vaddr(16)).expect("conflict");
    bench.run(4);
    bench.serve_mem();
    bench.run(2);
    let (_, b) = bench.up.delivered.pop_front().expect("conflict served");

    bench.engine.on_capacity_freed();
    bench.run(2);
    bench.engine.write_back(vaddr(16), b);
    bench.engine.request_read(vaddr(0)).expect("conflict");
    bench.run(4);
    let retry_fill = bench.engine.mem_mut().queue.pop_front().expect("retry fill");
    assert!(matches!(retry_fill, MemRequest::FillRead { tag: FillTag::Retry, .. }));
    bench.serve_mem();
    bench.run(2);
    let (addr, a) = bench.up.delivered.pop_front().expect("vertex 0 refilled");
    assert_eq!(vaddr(0), addr);
    assert_eq!(4, a.prop);
    (retry_fill, a)
}

fn land(bench: &mut Bench, fill: MemRequest) {
    let MemRequest::FillRead { line_addr, tag, .. } = fill else {
        panic!("expected a fill");
    };
    let data = bench.engine.mem().line_data(line_addr);
    bench.engine.on_mem_response(MemResponse::Fill { line_addr, tag, data });
}

#[test]
fn retry_fill_for_idle_resident_line_serves_cache_value() {
    let mut bench = Bench::new(4, 4, 4, 8);
    let (retry_fill, mut a) = retry_fill_behind_refill(&mut bench);
    a.temp_prop = 2;
    bench.engine.write_back(vaddr(0), a);
    bench.run(2);
    // reconciled in the cache; still flagged, so not forwarded
    assert_eq!(2, bench.engine.resident_record(vaddr(0)).unwrap().prop);
    assert!(bench.engine.retry_bits().get(0));

    // the packet still carries the older value from memory
    assert_eq!(4, bench.engine.mem().record(vaddr(0)).prop);
    let released = bench.engine.push().released;
    land(&mut bench, retry_fill);

    let retried: Vec<_> = bench.engine.push().retried.iter().map(|r| r.prop).collect();
    assert_eq!(vec![2], retried);
    assert_eq!(RECORDS_PER_LINE - 1, bench.engine.push().released - released);
    assert!(!bench.engine.retry_bits().get(0));
    assert_eq!(0, bench.engine.stats().stale_retry_fills);
}

#[test]
fn retry_fill_for_busy_resident_line_keeps_flags() {
    let mut bench = Bench::new(4, 4, 4, 8);
    let (retry_fill, mut a) = retry_fill_behind_refill(&mut bench);
    let released = bench.engine.push().released;
    land(&mut bench, retry_fill);

    assert!(bench.engine.push().retried.is_empty());
    assert_eq!(RECORDS_PER_LINE, bench.engine.push().released - released);
    assert!(bench.engine.retry_bits().get(0));
    assert_eq!(1, bench.engine.stats().stale_retry_fills);

    // once the record is returned, the next sweep offers it exactly once
    a.temp_prop = 2;
    bench.engine.write_back(vaddr(0), a);
    bench.run(2);
    bench.engine.on_capacity_freed();
    bench.run(2);
    let retried: Vec<_> = bench.engine.push().retried.iter().map(|r| r.prop).collect();
    assert_eq!(vec![2], retried);
    assert!(!bench.engine.retry_bits().any());

    bench.engine.on_capacity_freed();
    bench.run(2);
    assert_eq!(1, bench.engine.push().retried.len());
}

#[test]
fn evict_backs_off_until_transport_retry() {
    let mut bench = Bench::new(4, 4, 4, 2);
    bench.with_candidate(0, 3);
    bench.engine.request_read(vaddr(4)).expect("miss");
    bench.engine.request_read(vaddr(8)).expect("miss");
    bench.engine.request_read(vaddr(16)).expect("conflict");
    bench.run(4);
    assert_eq!(1, bench.engine.stats().mem_retry_backoffs);
    assert_eq!(Some(2), bench.engine.mem().retry_slots);
    assert_eq!(2, bench.engine.mem().queue.len());

    // draining the two fills frees room and fires the capacity retry
    assert!(bench.serve_one());
    assert!(bench.serve_one());
    bench.run(2);
    let queued: Vec<_> = bench.engine.mem().queue.iter().cloned().collect();
    assert_eq!(2, queued.len());
    assert!(matches!(queued[0], MemRequest::WriteBack { line_addr: 0, .. }));
    assert!(matches!(queued[1], MemRequest::FillRead { line_addr: 0x100, .. }));
}

#[test]
fn functional_access_prefers_resident_line() {
    let mut bench = Bench::new(4, 4, 4, 8);
    bench.with_candidate(0, 3);
    assert_eq!(3, bench.engine.read_functional(vaddr(0)).prop);
    assert_eq!(u32::MAX, bench.engine.mem().record(vaddr(0)).prop);

    bench.engine.write_functional(vaddr(40), VertexRecord::new(1, 1, 0, 0));
    assert_eq!(1, bench.engine.mem().record(vaddr(40)).prop);
    assert_eq!(1, bench.engine.read_functional(vaddr(40)).prop);
}

/// Random reads, write-backs, memory latency and push back-pressure. A checked-out record is
/// never touched by the engine, and every vertex settles at the minimum candidate written.
#[test]
fn random_interleavings_keep_checkouts_untouched() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut bench = Bench::new(4, 3, 3, 4);
        let mut held: HashMap<Addr, VertexRecord> = HashMap::new();
        let mut outstanding: HashSet<Addr> = HashSet::new();
        let mut expected: HashMap<Addr, u32> = HashMap::new();

        for cycle in 0..3000 {
            let issuing = cycle < 2000;
            bench.engine.push_mut().accept = rng.gen_bool(0.6);
            if issuing && rng.gen_bool(0.5) {
                let addr = vaddr(rng.gen_range(0..32));
                if !outstanding.contains(&addr) && bench.engine.request_read(addr).is_ok() {
                    outstanding.insert(addr);
                }
            }
            if rng.gen_bool(0.4) {
                bench.serve_one();
            }
            if bench.engine.retry_bits().any() && rng.gen_bool(0.3) {
                bench.engine.on_capacity_freed();
            }
            bench.tick();

            while let Some((addr, record)) = bench.up.delivered.pop_front() {
                held.insert(addr, record);
            }
            let ready: Vec<Addr> = held
                .keys()
                .copied()
                .filter(|_| !issuing || rng.gen_bool(0.3))
                .collect();
            for addr in ready {
                let mut record = held.remove(&addr).unwrap();
                assert_eq!(
                    Some(record),
                    bench.engine.resident_record(addr),
                    "seed {seed}: checked-out record at {addr:#x} changed"
                );
                record.temp_prop = record.temp_prop.min(rng.gen_range(1..1000));
                let best = expected.entry(addr).or_insert(u32::MAX);
                *best = (*best).min(record.temp_prop);
                bench.engine.write_back(addr, record);
                outstanding.remove(&addr);
            }
        }

        bench.engine.push_mut().accept = true;
        for _ in 0..2000 {
            if bench.engine.is_idle() {
                break;
            }
            bench.serve_mem();
            if bench.engine.retry_bits().any() {
                bench.engine.on_capacity_freed();
            }
            bench.tick();
        }
        assert!(bench.engine.is_idle(), "seed {seed}: engine did not drain");
        assert!(held.is_empty());
        for (addr, best) in expected {
            assert_eq!(
                best,
                bench.engine.read_functional(addr).prop,
                "seed {seed}: vertex at {addr:#x}"
            );
        }
    }
}
