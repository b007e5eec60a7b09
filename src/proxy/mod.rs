//! Forwarding core
//!
//! This module provides:
//! - Health scoring and rotation strategies over the proxy pool
//! - Concurrent proxy probing
//! - Proxy issuing, upstream transport and the retrying forwarder
//! - The HTTP/1 forward server

pub mod handler;
pub mod issuer;
pub mod middleware;
pub mod probe;
pub mod rotation;
pub mod score;
pub mod server;
pub mod transport;

pub use handler::{Forwarder, ForwarderConfig};
pub use issuer::{
    CredentialVerifier, IssueRequest, LocalProxyIssuer, ProxyIssuer, StaticCredentialVerifier,
};
pub use probe::{HttpProbeTransport, ProbeConfig, ProbeTransport, ProxyProber};
pub use rotation::{RotationSelector, RotationStrategy};
pub use server::ForwardServer;
pub use transport::{ReqwestUpstream, UpstreamClient, UpstreamRequest};
