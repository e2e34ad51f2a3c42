pub mod client;
pub mod codec;
pub mod endpoint;
pub mod transport;

pub use client::ProxyClient;
pub use endpoint::{EndpointHandle, ProxyEndpoint};
pub use transport::{HttpTransport, Transport};
