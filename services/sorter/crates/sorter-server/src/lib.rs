//! smartbin server library: image intake, classification, the bin lid
//! lifecycle and the remote store backends it writes to.

pub mod error;
pub mod inference;
pub mod intake;
pub mod lifecycle;
pub mod routes;
pub mod state;
pub mod store;

pub use error::ApiError;
pub use inference::{classify, probability_to_class, Classifier, InferenceError, RemoteModel};
pub use intake::{ImageFetcher, ImageTensor, InputError};
pub use lifecycle::{BinLifecycleController, CycleHandle, CycleOutcome, LifecycleConfig};
pub use state::AppState;
pub use store::{StateStore, StoreError};

/// Install the process-wide rustls crypto provider. Several dependencies
/// enable different providers, so rustls cannot pick one on its own.
pub fn install_crypto_provider() {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}
