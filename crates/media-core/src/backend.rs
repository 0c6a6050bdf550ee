//! Host media backends.

use std::sync::Arc;

use clipreel_common::error::ClipreelResult;

use crate::element::DecodeElement;
use crate::encoder::{EncoderConfig, StreamEncoder};

/// Factory for the decode elements and encoders of one host media stack.
///
/// Every call to `create_decode_element`/`create_encoder` returns an
/// independent instance, so concurrent exports never share decoder or
/// encoder state.
pub trait MediaBackend: Send + Sync {
    /// Backend identifier, also the capability cache key.
    fn name(&self) -> &str;

    /// Whether the host stack could be initialised.
    fn is_available(&self) -> bool {
        true
    }

    fn create_decode_element(&self) -> ClipreelResult<Arc<dyn DecodeElement>>;

    /// Probe whether an encoder for `mime_type` can be built.
    fn is_mime_type_supported(&self, mime_type: &str) -> bool;

    /// Build (but do not start) an encoder.
    fn create_encoder(&self, config: &EncoderConfig) -> ClipreelResult<Box<dyn StreamEncoder>>;
}
