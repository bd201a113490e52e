use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

use crate::coalesce::types::{Addr, AddrMap, VertexRecord};
use crate::coalesce::{CoalesceConfig, CoalesceEngine, Min};
use crate::sim::config::{GraphConfig, MemConfig, PushConfig, ReduceConfig, SimConfig};
use crate::sim::graph::{Edge, GraphImage};
use crate::sim::memory::BackingMemory;
use crate::sim::perf_log::{AggregateSummary, ChannelSummary, RunSummary};
use crate::sim::push::{PushEngine, Update};
use crate::sim::reduce::ReduceEngine;
use crate::timeq::Cycle;

/// One coalescing engine with its memory channel, push model and reduction model.
pub struct Channel {
    pub engine: CoalesceEngine<BackingMemory, PushEngine>,
    pub reduce: ReduceEngine,
}

impl Channel {
    fn is_idle(&self) -> bool {
        self.engine.is_idle()
            && self.reduce.is_idle()
            && self.engine.push().is_idle()
            && self.engine.mem().is_idle()
    }

    fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            coalesce: self.engine.stats(),
            mem: self.engine.mem().stats(),
            push: self.engine.push().stats(),
            reduce: self.reduce.stats(),
        }
    }
}

/// All the simulation settings, one per config section.
#[derive(Debug, Clone, Default)]
pub struct SimSetup {
    pub sim: SimConfig,
    pub coalesce: CoalesceConfig,
    pub mem: MemConfig,
    pub push: PushConfig,
    pub reduce: ReduceConfig,
    pub graph: GraphConfig,
}

pub struct Sim {
    setup: SimSetup,
    graph: GraphImage,
    channels: Vec<Channel>,
    now: Cycle,
}

impl Sim {
    pub fn new(setup: SimSetup) -> Result<Sim> {
        let graph = GraphImage::from_config(&setup.graph)?;
        Ok(Self::with_graph(setup, graph))
    }

    /// Stripe the vertex records over `mem.interleave` channels, load the graph image and
    /// seed the root.
    pub fn with_graph(setup: SimSetup, graph: GraphImage) -> Sim {
        setup.coalesce.ensure_valid();
        setup.mem.ensure_valid();
        assert!(setup.graph.root < graph.num_vertices(), "root outside the graph");

        let num_vertices = graph.num_vertices();
        let atom = setup.coalesce.atom_size as Addr;
        let edges: Arc<[Edge]> = graph.edges().into();
        let channels = (0..setup.mem.interleave)
            .map(|i| {
                let map = AddrMap::new(
                    setup.mem.base_addr + i as Addr * atom,
                    atom,
                    setup.mem.interleave as Addr,
                );
                let memory = BackingMemory::new(setup.mem.server(), map, num_vertices);
                let push = PushEngine::new(
                    setup.push,
                    setup.graph.workload,
                    Arc::clone(&edges),
                    setup.mem.base_addr,
                    setup.coalesce.records_per_line(),
                );
                Channel {
                    engine: CoalesceEngine::new(setup.coalesce, map, num_vertices, memory, push, Min),
                    reduce: ReduceEngine::new(setup.reduce, Min),
                }
            })
            .collect();

        let mut sim = Sim {
            setup,
            graph,
            channels,
            now: 0,
        };
        for vertex in 0..num_vertices {
            let addr = sim.vertex_addr(vertex);
            let record = sim.graph.record(vertex);
            let owner = sim.owner(addr);
            sim.channels[owner].engine.write_functional(addr, record);
        }

        let root = sim.vertex_addr(sim.setup.graph.root);
        let owner = sim.owner(root);
        let seeded = sim.channels[owner].reduce.try_push_update(Update { addr: root, value: 0 });
        assert!(seeded, "reduce queue refused the root update");
        info!(
            "sim: {} vertices, {} edges, {} channel(s), root {}",
            num_vertices,
            sim.graph.num_edges(),
            sim.channels.len(),
            sim.setup.graph.root
        );
        sim
    }

    pub fn vertex_addr(&self, vertex: usize) -> Addr {
        self.setup.mem.base_addr + (vertex * VertexRecord::BYTES) as Addr
    }

    /// Channel owning the atom that holds `addr`.
    pub fn owner(&self, addr: Addr) -> usize {
        let atom = self.setup.coalesce.atom_size as Addr;
        (((addr - self.setup.mem.base_addr) / atom) % self.channels.len() as Addr) as usize
    }

    pub fn graph(&self) -> &GraphImage {
        &self.graph
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn finished(&self) -> bool {
        self.channels.iter().all(Channel::is_idle)
    }

    pub fn tick(&mut self) {
        let now = self.now;
        for channel in &mut self.channels {
            let engine = &mut channel.engine;
            for response in engine.mem_mut().tick(now) {
                engine.on_mem_response(response);
            }
            if engine.mem_mut().take_retry_signal() {
                engine.on_mem_retry();
            }
            engine.push_mut().tick(now);
            for _ in 0..engine.push_mut().take_notifications() {
                engine.on_capacity_freed();
            }
        }

        self.route_updates();

        for channel in &mut self.channels {
            let Channel { engine, reduce } = channel;
            reduce.tick(engine);
            engine.tick(now, reduce);
        }
        self.now += 1;
    }

    /// Move updates from each push model to the owning reduction model until one refuses.
    fn route_updates(&mut self) {
        for source in 0..self.channels.len() {
            while let Some(update) = self.channels[source].engine.push().peek_update() {
                let owner = self.owner(update.addr);
                if !self.channels[owner].reduce.try_push_update(update) {
                    break;
                }
                self.channels[source].engine.push_mut().pop_update();
            }
        }
    }

    /// Run until every channel drains or the timeout expires.
    pub fn simulate(&mut self) -> RunSummary {
        let timeout = self.setup.sim.timeout;
        while self.now < timeout {
            self.tick();
            if self.finished() {
                break;
            }
        }
        let finished = self.finished();
        if finished {
            info!("sim: finished after {} cycles", self.now);
        } else {
            warn!("sim: timed out after {} cycles", self.now);
        }
        self.summary(finished)
    }

    /// Final best value of every vertex, through the untimed path.
    pub fn values(&self) -> Vec<u32> {
        (0..self.graph.num_vertices())
            .map(|vertex| {
                let addr = self.vertex_addr(vertex);
                self.channels[self.owner(addr)].engine.read_functional(addr).prop
            })
            .collect()
    }

    pub fn summary(&self, finished: bool) -> RunSummary {
        let per_channel: Vec<_> = self.channels.iter().map(Channel::summary).collect();
        let mut total = AggregateSummary::default();
        per_channel.iter().for_each(|channel| total += channel);
        RunSummary {
            workload: self.setup.graph.workload,
            num_vertices: self.graph.num_vertices(),
            num_edges: self.graph.num_edges(),
            root: self.setup.graph.root,
            cycles: self.now,
            finished,
            reached: self.values().iter().filter(|&&value| value != u32::MAX).count(),
            total,
            per_channel,
        }
    }
}
