//! Solidity bindings of the invoice contract deployed on every registered chain.

use alloy_sol_types::sol;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IInvoiceRelay {
        /// Emitted for each invoice as it is recorded. Only feeds batches, never relayed.
        event InvoiceCreated(bytes32 indexed invoiceHash, address indexed sender);

        /// Emitted once per batch. This is the event relayed to the other chains.
        event InvoiceBatch(address indexed sender, bytes32[] invoiceHashes);

        /// Verifies an attestation proof of an `InvoiceBatch` emitted on a trusted source.
        function submitProof(bytes proof) external;
    }
}

pub use IInvoiceRelay::{InvoiceBatch, InvoiceCreated, submitProofCall};
