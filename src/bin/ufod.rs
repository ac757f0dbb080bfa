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

//! The engine daemon: accepts remote subgraphs and runs them locally.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    thread,
    time::Duration,
};
use anyhow::{Context, Result};
use nix::sys::signal::{signal, SigHandler, Signal};
use structopt::{clap::AppSettings, StructOpt};
use ufo_engine::{daemon::Daemon, PluginRegistry, Resources};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signum: i32) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

#[derive(StructOpt, PartialEq, Debug)]
#[structopt(about,
    global_setting(AppSettings::DeriveDisplayOrder),
    global_setting(AppSettings::DisableHelpSubcommand),
)]
struct Opts {
    /// Address to listen on.
    #[structopt(short, long, default_value = "tcp://127.0.0.1:5555")]
    listen: String,

    /// Directory searched for OpenCL kernel files. May be repeated.
    #[structopt(short, long)]
    path: Vec<PathBuf>,

    /// Enable debug messages.
    #[structopt(short, long)]
    debug: bool,
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

    let default_filter = if opts.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let registry = Arc::new(PluginRegistry::with_basics());
    let resources = Arc::new(build_resources(&opts));

    let mut daemon = Daemon::new(&opts.listen, registry, resources);
    let bound = daemon
        .start()
        .with_context(|| format!("Failed to listen on {}", opts.listen))?;
    println!("ufod {} - waiting for requests on tcp://{} ...", env!("CARGO_PKG_VERSION"), bound);

    unsafe {
        signal(Signal::SIGTERM, SigHandler::Handler(on_signal)).context("signal handler")?;
        signal(Signal::SIGINT, SigHandler::Handler(on_signal)).context("signal handler")?;
    }

    while !SHUTDOWN.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    println!("shutting down...");
    daemon.stop();
    Ok(())
}
