//! HTTP client for the cross-chain attestation service.
//!
//! The attestation service observes a log on a source chain and issues an opaque proof that a
//! target chain contract can verify. Proof generation is asynchronous: a request returns a job id,
//! and the job is queried until the proof is ready.
//!
//! ## Example
//!
//! ```no_run
//! use attestor_client::{AttestorClient, Error, ProofRequest, ProofStatus};
//!
//! # async fn example() -> Result<(), Error> {
//! let client = AttestorClient::new("https://proof.testnet.polymer.zone", "api-key")?;
//!
//! let job_id = client
//!     .request_proof(&ProofRequest {
//!         src_chain_id: 11155420,
//!         src_block_number: 1_234_567,
//!         tx_index: 3,
//!         local_log_index: 1,
//!     })
//!     .await?;
//!
//! match client.query_proof(job_id).await? {
//!     ProofStatus::Ready(proof) => println!("proof is {} bytes", proof.len()),
//!     ProofStatus::Pending => println!("not ready yet"),
//!     ProofStatus::Failed(reason) => println!("job failed: {reason}"),
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub use client::AttestorClient;
pub use error::Error;
pub use types::{JobId, ProofRequest, ProofStatus, QueryProofResult};

mod client;
mod error;
mod types;
