use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use toml::Table;

use crate::coalesce::CoalesceConfig;
use crate::sim::config::{
    Config, GraphConfig, MemConfig, PushConfig, ReduceConfig, SimConfig, Workload,
};
use crate::sim::top::{Sim, SimSetup};

#[derive(Parser)]
#[command(version, about)]
pub struct CoalescerArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: PathBuf,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug, 3:trace)")]
    pub log: Option<u64>,
    #[arg(long, help = "Override edge list path")]
    pub graph: Option<PathBuf>,
    #[arg(long, help = "Override root vertex")]
    pub root: Option<usize>,
    #[arg(long, help = "Override workload (bfs, sssp)")]
    pub workload: Option<Workload>,
    #[arg(long, help = "Override timeout in cycles")]
    pub timeout: Option<u64>,
    #[arg(long, help = "Write the run summary as JSON")]
    pub summary_json: Option<PathBuf>,
}

pub fn read_toml(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))
}

/// Collect every config section from the TOML document.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn make_setup(toml_string: &str, cli_args: Option<&CoalescerArgs>) -> Result<SimSetup> {
    let config_table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
    let mut setup = SimSetup {
        sim: SimConfig::from_section(config_table.get("sim")),
        coalesce: CoalesceConfig::from_section(config_table.get("coalesce")),
        mem: MemConfig::from_section(config_table.get("mem")),
        push: PushConfig::from_section(config_table.get("push")),
        reduce: ReduceConfig::from_section(config_table.get("reduce")),
        graph: GraphConfig::from_section(config_table.get("graph")),
    };

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        setup.sim.log_level = args.log.unwrap_or(setup.sim.log_level);
        setup.sim.timeout = args.timeout.unwrap_or(setup.sim.timeout);
        setup.graph.root = args.root.unwrap_or(setup.graph.root);
        setup.graph.workload = args.workload.unwrap_or(setup.graph.workload);
        if let Some(path) = &args.graph {
            setup.graph.path = Some(path.clone());
        }
        if let Some(path) = &args.summary_json {
            setup.sim.summary_json = Some(path.clone());
        }
    }
    Ok(setup)
}

/// Make a Sim object from the TOML configuration.
pub fn make_sim(toml_string: &str, cli_args: Option<&CoalescerArgs>) -> Result<Sim> {
    Sim::new(make_setup(toml_string, cli_args)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[sim]
timeout = 5000

[coalesce]
cache_size = 512
num_mshr_entries = 4

[graph]
num_vertices = 32
workload = "sssp"
"#;

    #[test]
    fn cli_overrides_toml() {
        let args = CoalescerArgs::parse_from([
            "coalescer",
            "config.toml",
            "--root",
            "3",
            "--workload",
            "bfs",
            "--timeout",
            "77",
        ]);
        let setup = make_setup(CONFIG, Some(&args)).unwrap();
        assert_eq!(3, setup.graph.root);
        assert_eq!(Workload::Bfs, setup.graph.workload);
        assert_eq!(77, setup.sim.timeout);
        assert_eq!(512, setup.coalesce.cache_size);
        assert_eq!(4, setup.coalesce.num_mshr_entries);
    }

    #[test]
    fn toml_alone() {
        let setup = make_setup(CONFIG, None).unwrap();
        assert_eq!(Workload::Sssp, setup.graph.workload);
        assert_eq!(5000, setup.sim.timeout);
        assert_eq!(32, setup.graph.num_vertices);
        assert!(make_setup("[sim\n", None).is_err());
    }
}
