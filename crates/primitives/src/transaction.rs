//! Transaction types and serialization.

use walletd_consensus::{Hash256, ZERO_HASH};

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub previous_out_point: OutPoint,
    pub sequence: u32,
    pub signature_script: Vec<u8>,
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.previous_out_point.consensus_encode(encoder);
        encoder.write_u32_le(self.sequence);
        encoder.write_var_bytes(&self.signature_script);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let previous_out_point = OutPoint::consensus_decode(decoder)?;
        let sequence = decoder.read_u32_le()?;
        let signature_script = decoder.read_var_bytes()?;
        Ok(Self {
            previous_out_point,
            sequence,
            signature_script,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub version: u16,
    pub pk_script: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_u16_le(self.version);
        encoder.write_var_bytes(&self.pk_script);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let version = decoder.read_u16_le()?;
        let pk_script = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            version,
            pk_script,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u16,
    pub tx_in: Vec<TxIn>,
    pub tx_out: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

impl Transaction {
    pub fn serialize(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    /// Hash of the canonical serialization.
    pub fn txid(&self) -> Hash256 {
        sha256d(&self.serialize())
    }

    /// A transaction is a coinbase when its single input references no
    /// previous output.
    pub fn is_coinbase(&self) -> bool {
        self.tx_in.len() == 1 && self.tx_in[0].previous_out_point.hash == ZERO_HASH
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u16_le(self.version);
        encoder.write_varint(self.tx_in.len() as u64);
        for input in &self.tx_in {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.tx_out.len() as u64);
        for output in &self.tx_out {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
        encoder.write_u32_le(self.expiry);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_u16_le()?;
        let input_count = decoder.read_varint()? as usize;
        let mut tx_in = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            tx_in.push(TxIn::consensus_decode(decoder)?);
        }
        let output_count = decoder.read_varint()? as usize;
        let mut tx_out = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            tx_out.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        let expiry = decoder.read_u32_le()?;
        Ok(Self {
            version,
            tx_in,
            tx_out,
            lock_time,
            expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outpoint::TREE_REGULAR;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            tx_in: vec![TxIn {
                previous_out_point: OutPoint::new([7u8; 32], 3, TREE_REGULAR),
                sequence: u32::MAX,
                signature_script: vec![0x51],
            }],
            tx_out: vec![TxOut {
                value: 5_000,
                version: 0,
                pk_script: vec![0x6a],
            }],
            lock_time: 0,
            expiry: 0,
        }
    }

    #[test]
    fn serialize_roundtrip() {
        let tx = sample_tx();
        let bytes = tx.serialize();
        let decoded = Transaction::deserialize(&bytes).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), tx.txid());
    }

    #[test]
    fn coinbase_detection() {
        let mut tx = sample_tx();
        assert!(!tx.is_coinbase());
        tx.tx_in[0].previous_out_point = OutPoint::null();
        assert!(tx.is_coinbase());
    }

    #[test]
    fn deserialize_rejects_trailing_bytes() {
        let mut bytes = sample_tx().serialize();
        bytes.push(0);
        assert_eq!(
            Transaction::deserialize(&bytes),
            Err(DecodeError::TrailingBytes)
        );
    }
}
