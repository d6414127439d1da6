//! Shared application state handed to every request handler.

use std::sync::Arc;

use smartbin_common::BinLocation;

use crate::inference::Classifier;
use crate::intake::ImageFetcher;
use crate::lifecycle::BinLifecycleController;

pub struct AppState {
    pub controller: BinLifecycleController,
    pub classifier: Arc<dyn Classifier>,
    pub fetcher: ImageFetcher,
    pub location: BinLocation,
    /// Upload cap in bytes, also applied to downloaded images.
    pub max_upload_bytes: usize,
}

impl AppState {
    #[must_use]
    pub fn new(
        controller: BinLifecycleController,
        classifier: Arc<dyn Classifier>,
        fetcher: ImageFetcher,
        location: BinLocation,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            controller,
            classifier,
            fetcher,
            location,
            max_upload_bytes,
        }
    }
}
