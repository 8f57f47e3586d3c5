pub mod binding;
pub mod client;
pub mod https_server;

pub use binding::{ContainerBindingAdapter, ServerTlsBinding};
pub use client::{ClientSession, OutboundTlsClient};
pub use https_server::{HttpsServer, HyperTlsAdapter, RequestHandler};
