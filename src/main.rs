use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use coalescer::sim::log as sim_log;
use coalescer::sim::perf_log::write_summary;
use coalescer::sim::top::Sim;
use coalescer::ui::{make_setup, read_toml, CoalescerArgs};

pub fn main() -> Result<()> {
    let argv = CoalescerArgs::parse();
    let config = read_toml(&argv.config_path)?;
    let setup = make_setup(&config, Some(&argv))?;
    sim_log::init(setup.sim.log_level);

    let summary_path = setup.sim.summary_json.clone();
    let mut sim = Sim::new(setup)?;
    let summary = sim.simulate();

    info!(
        "{} vertices reached in {} cycles, hit rate {:.3}",
        summary.reached,
        summary.cycles,
        summary.hit_rate()
    );
    println!(
        "{:?}: reached {}/{} vertices in {} cycles (hit rate {:.3}, {} write-backs, {} retry sweeps)",
        summary.workload,
        summary.reached,
        summary.num_vertices,
        summary.cycles,
        summary.hit_rate(),
        summary.total.coalesce.write_backs,
        summary.total.coalesce.retry_sweeps,
    );
    if let Some(path) = summary_path {
        write_summary(&path, &summary)?;
        info!("wrote run summary to {}", path.display());
    }
    if !summary.finished {
        bail!("simulation did not drain within {} cycles", summary.cycles);
    }
    Ok(())
}
