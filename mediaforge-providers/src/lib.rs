//! Provider/Handler extension contracts, artifact upload, and the typed
//! registries tying task types to each.

mod handler;
mod provider;
mod uploader;

pub use handler::{DefaultHandler, Handler, HandlerRegistry};
pub use provider::{
    Provider, ProviderExecuteResult, ProviderOutput, ProviderQueryResult, ProviderRegistry,
    QueryStatus,
};
pub use uploader::{ArtifactUploader, HttpStreamingStore, ObjectStore};

#[cfg(any(test, feature = "test-util"))]
pub use provider::FakeProvider;

#[cfg(any(test, feature = "test-util"))]
pub use uploader::FakeObjectStore;
