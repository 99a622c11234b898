//! Backend specific [`ClientWrapper`](crate::client_wrapper::ClientWrapper) implementations.
//!
//! Each submodule offers a concrete client that speaks a particular server's API while
//! conforming to the uniform reflectllm contract.

pub mod ollama;
