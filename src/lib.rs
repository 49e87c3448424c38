//! Vulcan PKI
//!
//! The certificate-issuance and revocation-status core of an X.509 public
//! key infrastructure: a CA that issues certificates from PKCS#10
//! requests, tracks revocation state in a persistent store, publishes
//! full and delta CRLs, and answers OCSP queries.
//!
//! # Components
//!
//! - **asn1** / **x509** / **csr**: hand-rolled DER reader and writer with
//!   structural decoders for certificates, CSRs, CRLs and OCSP requests
//! - **signer**: bounded pools of stateful signer instances
//! - **store**: the shared SQL-backed certificate store
//! - **issuance**: the profile-driven issuance pipeline
//! - **crl** / **ocsp**: revocation publication and online status
//!
//! Enrollment gateways (CMP, SCEP, EST, ACME, REST), management shells
//! and PKCS#11 drivers live outside this crate; they deliver CSRs and
//! consume certificates through the types exported here.
//!
//! # Example
//!
//! ```rust,no_run
//! use vulcan_pki::uid::UniqueIdGenerator;
//!
//! let generator = UniqueIdGenerator::new(0, 3).unwrap();
//! let id = generator.next_id();
//! assert!(id > 0);
//! ```

#![deny(unsafe_code)]

pub mod asn1;
pub mod crl;
pub mod csr;
pub mod hash;
pub mod issuance;
pub mod issuer;
pub mod ocsp;
pub mod profile;
pub mod republish;
pub mod signer;
pub mod store;
pub mod types;
pub mod uid;
pub mod x509;

pub mod error;

pub use error::{ErrorKind, OperationError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
