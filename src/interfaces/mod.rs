//! Outer surfaces: the RPC contract and the JSON-lines transport that drives
//! it from the command line.

pub mod jsonl;
pub mod rpc;
