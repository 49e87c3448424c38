use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vulcan_pki::asn1::{read_header, writer};
use vulcan_pki::hash::HashAlgo;
use vulcan_pki::ocsp::OcspRequest;

fn sample_request(count: usize) -> Vec<u8> {
    let mut request_list = Vec::new();
    for serial in 0..count as u64 {
        let mut alg_id = writer::oid(HashAlgo::Sha256.oid());
        alg_id.extend_from_slice(&writer::null());
        let mut cert_id = writer::sequence(&alg_id);
        cert_id.extend_from_slice(&writer::octet_string(&[0x11; 32]));
        cert_id.extend_from_slice(&writer::octet_string(&[0x22; 32]));
        cert_id.extend_from_slice(&writer::integer_u64(serial + 1));
        request_list.extend_from_slice(&writer::sequence(&writer::sequence(&cert_id)));
    }
    let tbs = writer::sequence(&request_list);
    writer::sequence(&writer::sequence(&tbs))
}

fn bench_read_header(c: &mut Criterion) {
    let request = sample_request(1);
    c.bench_function("DER header read", |b| {
        b.iter(|| black_box(read_header(black_box(&request), 0).unwrap()));
    });
}

fn bench_parse_single_request(c: &mut Criterion) {
    let request = sample_request(1);
    c.bench_function("OCSP request parse (1 CertID)", |b| {
        b.iter(|| black_box(OcspRequest::parse(black_box(&request)).unwrap()));
    });
}

fn bench_parse_batch_request(c: &mut Criterion) {
    let request = sample_request(50);
    c.bench_function("OCSP request parse (50 CertIDs)", |b| {
        b.iter(|| black_box(OcspRequest::parse(black_box(&request)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_read_header,
    bench_parse_single_request,
    bench_parse_batch_request
);
criterion_main!(benches);
