//! berthd - container daemon restore and shutdown
//!
//! Rebuilds the daemon's view of every container from its on-disk
//! checkpoints, reconciles it with the task runtime and applies restart and
//! removal policies; at shutdown it drains running containers and tears the
//! daemon's services down.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                        Daemon                        │
//! │  loader · registrar · reconcile · restart · shutdown │
//! ├──────────────────────────────────────────────────────┤
//! │  ContainerIndex │ NameIndex │ LinkGraph │ WorkerPool │
//! ├──────────────────────────────────────────────────────┤
//! │  Store │ TaskRuntime │ ImageService │ Network │ Ops  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Everything in the bottom row is a trait; the daemon only drives it.

pub mod config;
pub mod container;
pub mod daemon;
pub mod image;
pub mod network;
pub mod offline;
pub mod ops;
pub mod persist;
pub mod runtime;

pub use config::DaemonConfig;
pub use container::{Container, ContainerRecord};
pub use daemon::{Daemon, DaemonError, RestoreReport, Services};
