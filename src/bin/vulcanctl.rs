//! vulcanctl - Vulcan PKI management CLI
//!
//! A minimal operational surface over the library: bootstrap a CA
//! directory, enroll and revoke certificates, and produce CRLs. The real
//! enrollment protocols (CMP, SCEP, EST, ...) live in their gateways;
//! this tool drives the same pipeline directly for testing and
//! administration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use r2d2_sqlite::SqliteConnectionManager;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};

use vulcan_pki::asn1::oids;
use vulcan_pki::crl::{CrlControl, CrlGenerator};
use vulcan_pki::hash::SignAlgo;
use vulcan_pki::issuance::{CaEntry, CertIssuer, EnrollRequest};
use vulcan_pki::profile::{
    key_usage, AuthorityKeyIdProducer, BasicConstraintsProducer, CertLevel, KeyPolicy,
    KeyUsageProducer, Profile, SubjectKeyIdProducer, Validity, ValidityMode,
};
use vulcan_pki::signer::{KeyMaterial, PoolAlgorithm, SignerPool};
use vulcan_pki::store::{schema, CertStore};
use vulcan_pki::types::{CertRevocationInfo, CrlReason, NameId, RequestType, SerialNumber};
use vulcan_pki::uid::UniqueIdGenerator;
use vulcan_pki::x509::X500Name;

#[derive(Parser)]
#[command(name = "vulcanctl")]
#[command(about = "Vulcan PKI management tool", long_about = None)]
struct Cli {
    /// CA directory (holds ca.db, ca-cert.der, ca-key.p8)
    #[arg(long, default_value = "./ca")]
    ca_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap a CA directory with a fresh self-signed root
    Init {
        /// Root subject, e.g. "CN=Vulcan Root CA,O=Example,C=DE"
        #[arg(long)]
        subject: String,

        /// Root validity in days
        #[arg(long, default_value_t = 3650)]
        validity_days: i64,
    },

    /// Enroll a certificate from a PKCS#10 request
    EnrollCert {
        /// DER-encoded CSR file
        #[arg(long)]
        csr: PathBuf,

        /// Certificate profile name
        #[arg(long, default_value = "tls")]
        profile: String,

        /// Output file for the issued certificate (DER)
        #[arg(long)]
        out: PathBuf,
    },

    /// Revoke a certificate
    RevokeCert {
        /// Serial number, hex
        #[arg(long)]
        serial: String,

        /// Revocation reason name, e.g. keyCompromise or certificateHold
        #[arg(long, default_value = "unspecified")]
        reason: String,

        /// Bypass the already-revoked guard
        #[arg(long)]
        force: bool,
    },

    /// Lift a certificateHold suspension
    UnsuspendCert {
        /// Serial number, hex
        #[arg(long)]
        serial: String,

        /// Unrevoke even when the reason is not certificateHold
        #[arg(long)]
        force: bool,
    },

    /// Write the current CRL
    Crl {
        /// Output file (DER)
        #[arg(long)]
        out: PathBuf,
    },

    /// Generate, persist and write a new full CRL
    NewCrl {
        /// Output file (DER)
        #[arg(long)]
        out: PathBuf,
    },

    /// Write the CA certificate
    Cacerts {
        /// Output file (DER)
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { subject, validity_days } => init_ca(&cli.ca_dir, &subject, validity_days),
        Commands::EnrollCert { csr, profile, out } => {
            let issuer = load_issuer(&cli.ca_dir)?;
            let csr_der = fs::read(&csr).with_context(|| format!("reading {}", csr.display()))?;
            let issued = issuer.issue(EnrollRequest {
                csr_der,
                profile,
                requested_not_before: None,
                requested_not_after: None,
                requestor: NameId::new(1, "vulcanctl"),
                user_id: None,
                transaction_id: None,
                req_type: RequestType::Ca,
            })?;
            fs::write(&out, issued.cert.der())?;
            println!("issued {} -> {}", issued.cert.serial(), out.display());
            Ok(())
        }
        Commands::RevokeCert { serial, reason, force } => {
            let issuer = load_issuer(&cli.ca_dir)?;
            let serial = parse_serial(&serial)?;
            let reason = parse_reason(&reason)?;
            let rev_info =
                CertRevocationInfo::new(reason, chrono::Utc::now().timestamp(), None);
            match issuer.revoke_cert(&serial, rev_info, force)? {
                Some(_) => println!("revoked {serial} ({})", reason.description()),
                None => println!("certificate {serial} does not exist"),
            }
            Ok(())
        }
        Commands::UnsuspendCert { serial, force } => {
            let issuer = load_issuer(&cli.ca_dir)?;
            let serial = parse_serial(&serial)?;
            match issuer.unrevoke_cert(&serial, force)? {
                Some(_) => println!("unsuspended {serial}"),
                None => println!("certificate {serial} does not exist"),
            }
            Ok(())
        }
        Commands::Crl { out } => {
            let issuer = load_issuer(&cli.ca_dir)?;
            let crl = issuer
                .store()
                .get_encoded_crl(&issuer.ca().ident, None)?
                .ok_or_else(|| anyhow!("no CRL has been generated yet"))?;
            fs::write(&out, crl)?;
            println!("wrote CRL to {}", out.display());
            Ok(())
        }
        Commands::NewCrl { out } => {
            let issuer = load_issuer(&cli.ca_dir)?;
            let generator = CrlGenerator::new(
                &issuer.ca().ident,
                &issuer.ca().cert,
                issuer.ca().signer.as_ref(),
                CrlControl::default(),
            );
            let stop = AtomicBool::new(false);
            let crl = generator.generate_full(
                issuer.store(),
                chrono::Utc::now().timestamp(),
                &stop,
            )?;
            fs::write(&out, crl)?;
            println!("wrote new CRL to {}", out.display());
            Ok(())
        }
        Commands::Cacerts { out } => {
            let cert_path = cli.ca_dir.join("ca-cert.der");
            let der = fs::read(&cert_path)
                .with_context(|| format!("reading {}", cert_path.display()))?;
            fs::write(&out, der)?;
            println!("wrote CA certificate to {}", out.display());
            Ok(())
        }
    }
}

fn init_ca(ca_dir: &Path, subject: &str, validity_days: i64) -> Result<()> {
    fs::create_dir_all(ca_dir)?;
    let db_path = ca_dir.join("ca.db");
    if db_path.exists() {
        return Err(anyhow!("{} already exists", db_path.display()));
    }

    let subject_name =
        X500Name::parse_text(subject).map_err(|err| anyhow!("invalid subject: {err}"))?;

    let mut rng = rand::thread_rng();
    let key = rsa::RsaPrivateKey::new(&mut rng, 2048)?;
    let key_der = key.to_pkcs8_der()?;
    fs::write(ca_dir.join("ca-key.p8"), key_der.as_bytes())?;

    let manager = SqliteConnectionManager::file(&db_path);
    let pool = r2d2::Pool::builder().build(manager)?;
    schema::initialize(&*pool.get()?)?;

    let id_generator = Arc::new(UniqueIdGenerator::new(0, 0)?);
    let store = Arc::new(CertStore::new(pool, id_generator)?);

    let signer = Arc::new(SignerPool::from_key(
        "root",
        &KeyMaterial::Rsa(key.clone()),
        PoolAlgorithm::Signature(SignAlgo::RsaPkcs1Sha256),
        4,
    )?);

    // bootstrap certificate: sign a CSR for our own key
    let csr_der = self_csr(&subject_name, &key)?;
    let placeholder = bootstrap_cert(&signer, &subject_name)?;
    let ca_entry = CaEntry {
        ident: NameId::new(1, "root"),
        cert: placeholder,
        validity_mode: ValidityMode::Cutoff,
        signer: Arc::clone(&signer),
    };

    let mut issuer = CertIssuer::new(ca_entry, Arc::clone(&store));
    issuer.add_profile(NameId::new(1, "rootca"), Arc::new(root_profile(validity_days)));
    issuer.add_profile(NameId::new(2, "tls"), Arc::new(tls_profile()));

    let serial = vulcan_pki::issuance::random_serial(127);
    let issued = issuer.issue_self_signed(
        EnrollRequest {
            csr_der,
            profile: "rootca".to_string(),
            requested_not_before: None,
            requested_not_after: None,
            requestor: NameId::new(1, "vulcanctl"),
            user_id: None,
            transaction_id: None,
            req_type: RequestType::Ca,
        },
        serial,
    )?;

    fs::write(ca_dir.join("ca-cert.der"), issued.cert.der())?;
    println!("initialized CA at {} (subject {subject})", ca_dir.display());
    Ok(())
}

/// A throwaway self-signed certificate used only to satisfy the issuer's
/// CA entry while the real root is being created.
fn bootstrap_cert(
    signer: &Arc<SignerPool>,
    subject: &X500Name,
) -> Result<vulcan_pki::x509::X509Cert> {
    use vulcan_pki::asn1::writer;

    let spki = signer
        .public_key()
        .ok_or_else(|| anyhow!("signer exposes no public key"))?;
    let now = chrono::Utc::now().timestamp();
    let algo = SignAlgo::RsaPkcs1Sha256;

    let mut tbs = Vec::new();
    tbs.extend_from_slice(&writer::tlv(0xA0, &writer::integer_u64(2)));
    tbs.extend_from_slice(&writer::integer_u64(1));
    tbs.extend_from_slice(&algo.algorithm_identifier());
    tbs.extend_from_slice(&subject.to_der());
    let mut validity = writer::x509_time(now);
    validity.extend_from_slice(&writer::x509_time(now + 100 * 365 * 86_400));
    tbs.extend_from_slice(&writer::sequence(&validity));
    tbs.extend_from_slice(&subject.to_der());
    tbs.extend_from_slice(&spki.to_der());
    let tbs = writer::sequence(&tbs);

    let signature = signer
        .borrow(std::time::Duration::from_secs(5))?
        .sign_message(&tbs)?;
    let mut cert = tbs;
    cert.extend_from_slice(&algo.algorithm_identifier());
    cert.extend_from_slice(&writer::bit_string(&signature));
    let der = writer::sequence(&cert);
    vulcan_pki::x509::X509Cert::parse(der).map_err(|err| anyhow!("bootstrap cert: {err}"))
}

fn self_csr(subject: &X500Name, key: &rsa::RsaPrivateKey) -> Result<Vec<u8>> {
    use rsa::pkcs1v15::SigningKey;
    use rsa::traits::PublicKeyParts;
    use signature::{SignatureEncoding, Signer};
    use vulcan_pki::asn1::writer;

    let public = rsa::RsaPublicKey::from(key);
    let mut pk_body = writer::integer_from_magnitude(&public.n().to_bytes_be());
    pk_body.extend_from_slice(&writer::integer_from_magnitude(&public.e().to_bytes_be()));
    let spki = vulcan_pki::x509::Spki {
        algorithm: oids::RSA_ENCRYPTION.to_vec(),
        parameters: Some(writer::null()),
        key_bits: writer::sequence(&pk_body),
    };

    let mut cri = writer::integer_u64(0);
    cri.extend_from_slice(&subject.to_der());
    cri.extend_from_slice(&spki.to_der());
    cri.extend_from_slice(&writer::tlv(0xA0, &[]));
    let cri = writer::sequence(&cri);

    let signing = SigningKey::<sha2::Sha256>::new(key.clone());
    let signature = signing.sign(&cri).to_vec();

    let mut alg = writer::oid(oids::RSA_WITH_SHA256);
    alg.extend_from_slice(&writer::null());

    let mut csr = cri;
    csr.extend_from_slice(&writer::sequence(&alg));
    csr.extend_from_slice(&writer::bit_string(&signature));
    Ok(writer::sequence(&csr))
}

fn load_issuer(ca_dir: &Path) -> Result<CertIssuer> {
    let key_der = fs::read(ca_dir.join("ca-key.p8"))
        .with_context(|| format!("no CA key in {}", ca_dir.display()))?;
    let key = rsa::RsaPrivateKey::from_pkcs8_der(&key_der)?;
    let cert_der = fs::read(ca_dir.join("ca-cert.der"))
        .with_context(|| format!("no CA certificate in {}", ca_dir.display()))?;
    let cert = vulcan_pki::x509::X509Cert::parse(cert_der)
        .map_err(|err| anyhow!("unreadable CA certificate: {err}"))?;

    let manager = SqliteConnectionManager::file(ca_dir.join("ca.db"));
    let pool = r2d2::Pool::builder().build(manager)?;
    let id_generator = Arc::new(UniqueIdGenerator::new(0, 0)?);
    let store = Arc::new(CertStore::new(pool, id_generator)?);

    let signer = Arc::new(SignerPool::from_key(
        "root",
        &KeyMaterial::Rsa(key),
        PoolAlgorithm::Signature(SignAlgo::RsaPkcs1Sha256),
        4,
    )?);

    let ca_entry = CaEntry {
        ident: NameId::new(1, "root"),
        cert,
        validity_mode: ValidityMode::Cutoff,
        signer,
    };
    let mut issuer = CertIssuer::new(ca_entry, store);
    issuer.add_profile(NameId::new(1, "rootca"), Arc::new(root_profile(3650)));
    issuer.add_profile(NameId::new(2, "tls"), Arc::new(tls_profile()));
    Ok(issuer)
}

fn root_profile(validity_days: i64) -> Profile {
    Profile::new("rootca", CertLevel::RootCa, Validity::days(validity_days))
        .with_key_policy(KeyPolicy::Rsa { min_bits: 2048 })
        .with_extension(Box::new(BasicConstraintsProducer { path_len: None }))
        .with_extension(Box::new(KeyUsageProducer {
            bits: key_usage::KEY_CERT_SIGN | key_usage::CRL_SIGN,
        }))
        .with_extension(Box::new(SubjectKeyIdProducer))
}

fn tls_profile() -> Profile {
    Profile::new("tls", CertLevel::EndEntity, Validity::days(90))
        .with_key_policy(KeyPolicy::Rsa { min_bits: 2048 })
        .with_key_policy(KeyPolicy::EcP256)
        .with_extension(Box::new(BasicConstraintsProducer { path_len: None }))
        .with_extension(Box::new(KeyUsageProducer {
            bits: key_usage::DIGITAL_SIGNATURE | key_usage::KEY_ENCIPHERMENT,
        }))
        .with_extension(Box::new(SubjectKeyIdProducer))
        .with_extension(Box::new(AuthorityKeyIdProducer))
        .permit_request_extension(oids::SUBJECT_ALT_NAME)
}

fn parse_serial(text: &str) -> Result<SerialNumber> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    SerialNumber::from_hex(text).ok_or_else(|| anyhow!("invalid serial {text}"))
}

fn parse_reason(name: &str) -> Result<CrlReason> {
    for code in 0..=10u8 {
        if let Some(reason) = CrlReason::from_code(code) {
            if reason.description().eq_ignore_ascii_case(name) {
                return Ok(reason);
            }
        }
    }
    Err(anyhow!("unknown revocation reason {name}"))
}
