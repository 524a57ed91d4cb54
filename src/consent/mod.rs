pub mod client;
pub mod error;
pub mod preflight;
pub mod types;

pub use client::{ConsentApi, HttpConsentClient};
pub use error::ConsentError;
pub use preflight::{AgreementTerms, ConsentCache, ConsentPreflight};
