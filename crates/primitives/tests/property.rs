use cashd_primitives::encoding::{decode, encode, DecodeError, Decoder, Encoder};
use cashd_primitives::hash::Hash256;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxIn, TxOut};

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn gen_range(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

fn random_hash(rng: &mut Lcg) -> Hash256 {
    std::array::from_fn(|_| rng.next_u64() as u8)
}

fn random_vec(rng: &mut Lcg, max_len: u64) -> Vec<u8> {
    (0..rng.gen_range(max_len + 1))
        .map(|_| rng.next_u64() as u8)
        .collect()
}

fn random_transaction(rng: &mut Lcg) -> Transaction {
    let inputs = (0..1 + rng.gen_range(3))
        .map(|_| TxIn {
            prevout: OutPoint::new(random_hash(rng), rng.next_u32()),
            unlocking_script: random_vec(rng, 24),
            sequence: rng.next_u32(),
        })
        .collect();
    let outputs = (0..1 + rng.gen_range(3))
        .map(|_| TxOut {
            value: (rng.next_u32() as i64) % 21_000_000,
            locking_script: random_vec(rng, 24),
            token_prefix: None,
        })
        .collect();
    Transaction {
        version: if rng.gen_range(2) == 0 { 1 } else { 2 },
        inputs,
        outputs,
        lock_time: rng.next_u32(),
    }
}

#[test]
fn random_transactions_survive_the_codec() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..64 {
        let tx = random_transaction(&mut rng);
        let encoded = encode(&tx);
        assert_eq!(encoded.len(), tx.serialized_size());
        let decoded: Transaction = decode(&encoded).expect("decode random transaction");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), tx.txid());
    }
}

#[test]
fn varint_boundaries_stay_canonical() {
    for value in [0u64, 0xfc, 0xfd, 0xffff, 0x0001_0000, 0x01ff_ffff] {
        let mut encoder = Encoder::new();
        encoder.write_varint(value);
        let bytes = encoder.into_inner();
        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_varint().expect("canonical varint"), value);
        assert!(decoder.is_empty());
    }
}

#[test]
fn padded_varint_encodings_are_rejected() {
    // 0xfc fits in one byte; the same value behind a 0xfd tag is
    // non-canonical.
    let mut decoder = Decoder::new(&[0xfd, 0xfc, 0x00]);
    assert!(matches!(
        decoder.read_varint(),
        Err(DecodeError::NonCanonicalVarInt)
    ));
}

#[test]
fn trailing_bytes_fail_full_decodes() {
    let tx = Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::new([1u8; 32], 0),
            unlocking_script: Vec::new(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 1,
            locking_script: vec![0x51],
            token_prefix: None,
        }],
        lock_time: 0,
    };
    let mut encoded = encode(&tx);
    encoded.push(0x00);
    assert!(matches!(
        decode::<Transaction>(&encoded),
        Err(DecodeError::TrailingBytes)
    ));
}

#[test]
fn truncated_transactions_report_eof() {
    let tx = random_transaction(&mut Lcg::new(42));
    let encoded = encode(&tx);
    for cut in [1, encoded.len() / 2, encoded.len() - 1] {
        assert!(matches!(
            decode::<Transaction>(&encoded[..cut]),
            Err(DecodeError::UnexpectedEof)
        ));
    }
}
