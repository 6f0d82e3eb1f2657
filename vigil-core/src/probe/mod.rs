//! Single-attempt HTTP/HTTPS probing with TLS certificate inspection.

pub mod cert;
mod engine;
mod types;

pub use cert::{parse_certificate, ssl_info_from_der, NameAttributes, ParsedCertificate};
pub use engine::{classify_error, HttpProbe, HttpProbeEngine};
pub use types::{
    HeaderSummary, ProbeRequest, ProbeResponse, ProbeResult, RequestMethod, SslInfo,
};
