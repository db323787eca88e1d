//! Relay services.
//!
//! # Architecture Overview
//!
//! One listener runs per connected chain. Listeners push events on their own channel, the
//! relayer merges the channels and runs one pipeline task per event:
//!
//! ```text
//!  ┌─────────┐   ┌─────────┐   ┌─────────┐
//!  │ Chain A │   │ Chain B │   │ Chain C │ ◄───────────── submitProof ────────────┐
//!  └────┬────┘   └────┬────┘   └────┬────┘                                         │
//!       │ logs        │ logs        │ logs                                         │
//!       ▼             ▼             ▼                                              │
//!  ┌──────────┐  ┌──────────┐  ┌──────────┐                                        │
//!  │ Listener │  │ Listener │  │ Listener │  (de-duplicate, assemble RawEvent)     │
//!  └────┬─────┘  └────┬─────┘  └────┬─────┘                                        │
//!       │             │             │                                              │
//!       └─────────────┼─────────────┘                                              │
//!                     ▼                                                            │
//!              ┌─────────────┐   in-flight   ┌────────────────┐   proof   ┌────────┴───┐
//!              │   Relayer   ├──── ticket ──►│ ProofAcquirer  ├──────────►│ Dispatcher │
//!              └─────────────┘               └───────┬────────┘           └────────────┘
//!                                                    │ request / poll
//!                                                    ▼
//!                                          ┌─────────────────────┐
//!                                          │ Attestation service │
//!                                          └─────────────────────┘
//! ```
//!
//! # Services
//!
//! - [`listener::ChainListener`]: Follows `InvoiceBatch` logs of one chain and forwards new events
//! - [`proof::ProofAcquirer`]: Requests a proof job and polls it until the proof is ready
//! - [`fanout::Dispatcher`]: Submits a proof to every chain but its source, in parallel
//! - [`relay::Relayer`]: Lifecycle and event loop, guarded by [`ticket::InFlight`]

pub mod fanout;
pub mod listener;
pub mod proof;
pub mod relay;
pub mod ticket;
