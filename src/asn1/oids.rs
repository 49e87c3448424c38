//! Raw DER content bytes of the object identifiers used by this crate.
//!
//! All constants are the OID content octets, i.e. what follows the
//! `06 <len>` header.

// Hash algorithms
pub const SHA1: &[u8] = &[0x2B, 0x0E, 0x03, 0x02, 0x1A];
pub const SHA224: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x04];
pub const SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
pub const SHA384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
pub const SHA512: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];
pub const SHA3_224: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x07];
pub const SHA3_256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x08];
pub const SHA3_384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x09];
pub const SHA3_512: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x0A];
pub const SHAKE128: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x0B];
pub const SHAKE256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x0C];
// GM/T 0004-2012, 1.2.156.10197.1.401
pub const SM3: &[u8] = &[0x2A, 0x81, 0x1C, 0xCF, 0x55, 0x01, 0x83, 0x11];

// Signature algorithms
pub const RSA_WITH_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0B];
pub const RSA_WITH_SHA384: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0C];
pub const RSA_WITH_SHA512: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0D];
pub const ECDSA_WITH_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];
pub const ECDSA_WITH_SHA384: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x03];
pub const ED25519: &[u8] = &[0x2B, 0x65, 0x70];

// Diffie-Hellman static proof-of-possession algorithms (RFC 6955 style),
// 1.3.6.1.4.1.45522.1.{1,2}
pub const DH_POP_X25519_SHA256: &[u8] =
    &[0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0xE3, 0x52, 0x01, 0x01];
pub const DH_POP_X448_SHA512: &[u8] =
    &[0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0xE3, 0x52, 0x01, 0x02];

// Key-agreement public key algorithms
pub const X25519: &[u8] = &[0x2B, 0x65, 0x6E];
pub const X448: &[u8] = &[0x2B, 0x65, 0x6F];

// Public key algorithms
pub const RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
pub const EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];
pub const SECP256R1: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];

// PKCS#9 / CSR attributes
pub const EXTENSION_REQUEST: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x0E];
pub const CHALLENGE_PASSWORD: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x07];

// X.509 certificate and CRL extensions
pub const BASIC_CONSTRAINTS: &[u8] = &[0x55, 0x1D, 0x13];
pub const KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x0F];
pub const EXT_KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x25];
pub const SUBJECT_KEY_ID: &[u8] = &[0x55, 0x1D, 0x0E];
pub const AUTHORITY_KEY_ID: &[u8] = &[0x55, 0x1D, 0x23];
pub const SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1D, 0x11];
pub const CRL_NUMBER: &[u8] = &[0x55, 0x1D, 0x14];
pub const DELTA_CRL_INDICATOR: &[u8] = &[0x55, 0x1D, 0x1B];
pub const CRL_REASON: &[u8] = &[0x55, 0x1D, 0x15];
pub const INVALIDITY_DATE: &[u8] = &[0x55, 0x1D, 0x18];

// OCSP
pub const OCSP_NONCE: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x02];
pub const OCSP_BASIC: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01];
pub const EKU_OCSP_SIGNING: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x09];

// Distinguished-name attribute types
pub const DN_CN: &[u8] = &[0x55, 0x04, 0x03];
pub const DN_SERIAL_NUMBER: &[u8] = &[0x55, 0x04, 0x05];
pub const DN_C: &[u8] = &[0x55, 0x04, 0x06];
pub const DN_L: &[u8] = &[0x55, 0x04, 0x07];
pub const DN_ST: &[u8] = &[0x55, 0x04, 0x08];
pub const DN_O: &[u8] = &[0x55, 0x04, 0x0A];
pub const DN_OU: &[u8] = &[0x55, 0x04, 0x0B];
pub const DN_DC: &[u8] = &[0x09, 0x92, 0x26, 0x89, 0x93, 0xF2, 0x2C, 0x64, 0x01, 0x19];
pub const DN_EMAIL: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x01];
pub const DN_UID: &[u8] = &[0x09, 0x92, 0x26, 0x89, 0x93, 0xF2, 0x2C, 0x64, 0x01, 0x01];
