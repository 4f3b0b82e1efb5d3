pub mod body;
pub mod http_transport;

pub use body::{from_reqwest, BytesBody, ReqwestBody, UpstreamBody, UpstreamResponse};
pub use http_transport::HttpTransport;
