//! HTTP transport
//!
//! [`Transport`] is the seam between the API client and the network. The
//! production implementation wraps `reqwest`; tests substitute scripted
//! transports or point [`ReqwestTransport`] at a `wiremock` server.

pub mod client;

pub use client::{
    HttpRequest, HttpResponse, ReqwestTransport, ReqwestTransportBuilder, Transport,
    TransportError,
};
