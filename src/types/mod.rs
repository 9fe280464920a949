//! Public types for the Huginn API.

mod fingerprint;
mod method;
mod request;
mod response;

pub use fingerprint::{
    Fingerprint, endpoint_key, normalize_url, trailing_segment, under_prefix,
};
pub use method::Method;
pub use request::{RequestOptions, TransportRequest};
pub use response::{RawResponse, Response};
