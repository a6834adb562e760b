//! HTTP transport and completion providers for chatrelay.
//!
//! - [`transport`]: the retrying single-request HTTP client shared by the
//!   completion provider and the plugin adapters
//! - [`openai_compat`]: chat completions over the transport
//!
//! All providers implement the `chatrelay_core::Provider` trait.

pub mod openai_compat;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod test_server;

pub use openai_compat::OpenAiCompatProvider;
pub use transport::{BodyReceiver, RetryPolicy, TransportClient};
