//! Service discovery: the cluster's address book.

pub mod client;
pub mod http;
pub mod registry;
pub mod server;

pub use client::DiscoveryClient;
pub use registry::Registry;
pub use server::DiscoveryServer;
