//! The distributed job-queue worker core: fair, priority-preempting job selection over a shared
//! document store, process supervision, and job retirement, driven by a cooperative single-
//! threaded phase scheduler.
//!
//! This crate defines the scheduling logic and the narrow store/launcher contracts it depends
//! on; it is deliberately silent about wire protocols. `queue-worker-store-mongo` supplies the
//! concrete store, and the `queue-worker` binary crate wires a concrete launcher, configuration,
//! and logging around a running [`worker::Worker`].

pub mod context;
pub mod error;
pub mod execution_plan;
pub mod launcher;
pub mod lock_service;
pub mod model;
pub mod resource_sampler;
pub mod retirement;
pub mod selector;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod testing;
pub mod worker;
