//! Domain types shared by the registry, the issuance path and the synthesizer.

pub mod certificate;
pub mod secret;

pub use certificate::CertificateRecord;
pub use secret::SecretBytes;
