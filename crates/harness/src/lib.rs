//! apphost test-deployment harness
//!
//! This crate publishes a web application with an external toolchain,
//! launches the published artifact as a child host process and supervises it
//! for the duration of an integration test:
//! - Builds immutable deployment parameters per runtime flavor
//! - Runs `publish` and turns a non-zero exit into a build failure
//! - Spawns the host with both output streams continuously drained
//! - Exposes a one-shot shutdown signal that fires when the host exits
//! - Probes the host over HTTP, retrying while it is still starting
//! - Restores once per fixture and cleans up processes and directories
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ApplicationFixture (per app)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  create_deployment(flavor) -> Deployer                      │
//! │    ├── Restorer::restore()            (once per fixture)    │
//! │    └── ParameterStrategy -> DeploymentParameters            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Deployer::deploy() -> DeploymentResult                     │
//! │    ├── Publisher::publish()                                 │
//! │    └── Launcher::launch() -> Supervisor                     │
//! │          ├── stdout reader ─┐                               │
//! │          ├── stderr reader ─┴─> OutputSink                  │
//! │          └── exit watcher  ───> ShutdownSignal              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HttpProbe::get_with_retry(url, attempts)                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod fixture;
pub mod launcher;
pub mod output;
pub mod params;
pub mod paths;
pub mod probe;
pub mod publish;
pub mod restore;
pub mod state;

mod command;

pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use fixture::{ApplicationFixture, Deployer};
pub use launcher::{DeploymentResult, Launcher, ShutdownSignal, Supervisor};
pub use params::{ApplicationType, DeploymentParameters, RuntimeFlavor};
pub use probe::HttpProbe;
pub use publish::Publisher;
