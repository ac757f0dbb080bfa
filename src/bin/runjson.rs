//  Copyright 2024 UFO Engine Developers.
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Run a JSON pipeline description to completion.

use std::{
    fs,
    io::Write,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};
use anyhow::{ensure, Context, Result};
use structopt::{clap::AppSettings, StructOpt};
use ufo_engine::{
    json,
    sched::{RemoteMode, Scheduler, SchedulerConfig, SchedulerKind},
    PluginRegistry, Resources,
};

#[derive(StructOpt, PartialEq, Debug)]
#[structopt(about,
    // When showing --help, we want to keep the order of arguments defined
    // in the `Opts` struct, as opposed to the default alphabetical order.
    global_setting(AppSettings::DeriveDisplayOrder),
    // help subcommand is not useful, disable it.
    global_setting(AppSettings::DisableHelpSubcommand),
)]
struct Opts {
    /// Scheduler variant. Only `dynamic` is wired in this build.
    #[structopt(short, long, default_value = "dynamic")]
    scheduler: String,

    /// Record per-task call counts and durations, printed after the run.
    #[structopt(short, long)]
    trace: bool,

    /// Add wall-clock timestamps to the trace summary.
    #[structopt(long)]
    timestamps: bool,

    /// Suppress the live progress counter.
    #[structopt(short, long)]
    quiet: bool,

    /// Suppress the progress counter and the final summary.
    #[structopt(long)]
    quieter: bool,

    /// Address of a remote `ufod` peer (tcp://host:port). May be repeated
    /// to split the stream across several peers.
    #[structopt(short, long, number_of_values = 1)]
    address: Vec<String>,

    /// Directory searched for OpenCL kernel files. May be repeated.
    #[structopt(short, long, number_of_values = 1)]
    path: Vec<PathBuf>,

    /// The JSON pipeline description to run.
    file: PathBuf,
}

fn build_resources(opts: &Opts) -> Resources {
    #[cfg(feature = "opencl")]
    let mut resources = match ufo_engine::opencl::opencl_resources() {
        Ok(resources) => resources,
        Err(err) => {
            log::warn!("OpenCL unavailable ({}), running host-only", err);
            Resources::host_only()
        }
    };
    #[cfg(not(feature = "opencl"))]
    let mut resources = Resources::host_only();

    for path in &opts.path {
        resources.add_kernel_path(path);
    }
    resources
}

fn main() -> Result<()> {
    let opts: Opts = Opts::from_args();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let kind: SchedulerKind = opts.scheduler.parse()?;
    ensure!(
        kind == SchedulerKind::Dynamic,
        "the {:?} scheduler is not available in this build",
        kind
    );

    let registry = PluginRegistry::with_basics();
    let resources = Arc::new(build_resources(&opts));

    let document = fs::read_to_string(&opts.file)
        .with_context(|| format!("Failed to read {}", opts.file.display()))?;
    let mut graph = json::read_graph(&document, &registry)
        .with_context(|| format!("Failed to build the pipeline from {}", opts.file.display()))?;

    let config = SchedulerConfig {
        expand: true,
        remote_mode: RemoteMode::Stream,
        trace: opts.trace,
        timestamps: opts.timestamps,
    };
    let mut scheduler = Scheduler::new(config, resources);
    scheduler
        .connect_remotes(&opts.address)
        .context("Failed to connect to remote peers")?;

    let show_counter = !opts.quiet && !opts.quieter;
    if show_counter {
        scheduler.set_progress_hook(|label, count| {
            eprint!("\r{}: {} items", label, count);
            let _ = std::io::stderr().flush();
        });
    }

    let start = Instant::now();
    let outcome = scheduler.run(&mut graph);
    if show_counter {
        eprintln!();
    }
    outcome.context("Executing the pipeline failed")?;

    if !opts.quieter {
        println!("finished in {:.3}s", start.elapsed().as_secs_f64());
    }
    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    fn defaults(file: &str) -> Opts {
        Opts {
            scheduler: String::from("dynamic"),
            trace: false,
            timestamps: false,
            quiet: false,
            quieter: false,
            address: vec![],
            path: vec![],
            file: PathBuf::from(file),
        }
    }

    #[test]
    fn test_file_only() {
        assert_eq!(Opts::from_iter(vec!["runjson", "graph.json"]), defaults("graph.json"));
    }

    #[test]
    fn test_flags() {
        assert_eq!(
            Opts::from_iter(vec!["runjson", "--trace", "--timestamps", "--quiet", "graph.json"]),
            Opts {
                trace: true,
                timestamps: true,
                quiet: true,
                ..defaults("graph.json")
            }
        );
    }

    #[test]
    fn test_scheduler_choice() {
        assert_eq!(
            Opts::from_iter(vec!["runjson", "--scheduler", "fixed", "graph.json"]),
            Opts { scheduler: String::from("fixed"), ..defaults("graph.json") }
        );
    }

    #[test]
    fn test_addresses() {
        assert_eq!(
            Opts::from_iter(vec![
                "runjson",
                "-a", "tcp://node1:5555",
                "-a", "tcp://node2:5555",
                "graph.json",
            ]),
            Opts {
                address: vec![
                    String::from("tcp://node1:5555"),
                    String::from("tcp://node2:5555"),
                ],
                ..defaults("graph.json")
            }
        );
    }
}
