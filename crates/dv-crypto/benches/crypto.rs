use dv_core::types::{KdfParams, KDF_VERSION};
use dv_crypto::cipher::{decrypt_str, encrypt_to_string};
use dv_crypto::{derive_key, seal_for_self, KeyPair, MasterKey};
use secrecy::SecretString;

fn make_entry(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 2)) as u8)
        .collect()
}

#[divan::bench(args = [256, 4096, 65536])]
fn bench_encrypt_record(bencher: divan::Bencher, size: usize) {
    let key = MasterKey::generate();
    let entry = make_entry(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            encrypt_to_string(
                divan::black_box(key.as_bytes()),
                divan::black_box(&entry),
                None,
            )
            .unwrap()
        });
}

#[divan::bench(args = [256, 4096, 65536])]
fn bench_decrypt_record(bencher: divan::Bencher, size: usize) {
    let key = MasterKey::generate();
    let encoded = encrypt_to_string(key.as_bytes(), &make_entry(size), None).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            decrypt_str(
                divan::black_box(key.as_bytes()),
                divan::black_box(&encoded),
                None,
            )
            .unwrap()
        });
}

#[divan::bench(args = [256, 4096])]
fn bench_seal_for_self(bencher: divan::Bencher, size: usize) {
    let kp = KeyPair::generate();
    let entry = make_entry(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| seal_for_self(divan::black_box(kp.public()), divan::black_box(&entry)).unwrap());
}

// Production cost; keep the sample count low.
#[divan::bench(sample_count = 5)]
fn bench_derive_key_default_params(bencher: divan::Bencher) {
    let password = SecretString::from("correct horse battery staple");
    let salt = [9u8; 32];
    let params = KdfParams::default();
    assert_eq!(params.version, KDF_VERSION);
    bencher.bench(|| derive_key(&password, divan::black_box(&salt), &params).unwrap());
}

fn main() {
    divan::main();
}
