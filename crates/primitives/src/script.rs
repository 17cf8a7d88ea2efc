//! Output script classification.
//!
//! The wallet only needs to recognize the standard payment shapes and the
//! stake opcode tags that prefix them; full script evaluation is a node
//! concern.

use crate::transaction::Transaction;

pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// Tag recorded on credits whose script carries no stake opcode.
pub const OP_NONSTAKE: u8 = 0xb9;
pub const OP_SSTX: u8 = 0xba;
pub const OP_SSGEN: u8 = 0xbb;
pub const OP_SSRTX: u8 = 0xbc;
pub const OP_SSTXCHANGE: u8 = 0xbd;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptClass {
    NonStandard,
    PubKeyHash,
    ScriptHash,
    Multisig,
    NullData,
    StakeSubmission,
    StakeGen,
    StakeRevocation,
    StakeChange,
}

impl ScriptClass {
    pub fn is_stake(self) -> bool {
        matches!(
            self,
            ScriptClass::StakeSubmission
                | ScriptClass::StakeGen
                | ScriptClass::StakeRevocation
                | ScriptClass::StakeChange
        )
    }
}

pub fn classify(script: &[u8]) -> ScriptClass {
    match script.first() {
        Some(&OP_SSTX) => ScriptClass::StakeSubmission,
        Some(&OP_SSGEN) => ScriptClass::StakeGen,
        Some(&OP_SSRTX) => ScriptClass::StakeRevocation,
        Some(&OP_SSTXCHANGE) => ScriptClass::StakeChange,
        Some(&OP_RETURN) => ScriptClass::NullData,
        _ if is_pub_key_hash(script) => ScriptClass::PubKeyHash,
        _ if is_script_hash(script) => ScriptClass::ScriptHash,
        _ if multisig_m_n(script).is_some() => ScriptClass::Multisig,
        _ => ScriptClass::NonStandard,
    }
}

/// Classification of the payload under a stake opcode tag. Non-stake scripts
/// classify as themselves.
pub fn stake_subclass(script: &[u8]) -> ScriptClass {
    if classify(script).is_stake() {
        classify(&script[1..])
    } else {
        classify(script)
    }
}

fn is_pub_key_hash(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_script_hash(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 20 && script[22] == OP_EQUAL
}

/// Extracts the script hash from a pay-to-script-hash script, including the
/// stake-tagged variants.
pub fn script_hash_from_p2sh(script: &[u8]) -> Option<[u8; 20]> {
    let payload = if classify(script).is_stake() {
        &script[1..]
    } else {
        script
    };
    if !is_script_hash(payload) {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[2..22]);
    Some(hash)
}

fn small_int(op: u8) -> Option<u8> {
    (0x51..=0x60).contains(&op).then(|| op - 0x50)
}

/// Parses the required and total signature counts out of a standard
/// multisignature redeem script.
pub fn multisig_m_n(script: &[u8]) -> Option<(u8, u8)> {
    let len = script.len();
    if len < 3 || script[len - 1] != OP_CHECKMULTISIG {
        return None;
    }
    let m = small_int(script[0])?;
    let n = small_int(script[len - 2])?;
    if m == 0 || m > n {
        return None;
    }

    let mut cursor = 1;
    let mut keys = 0u8;
    while cursor < len - 2 {
        let push = script[cursor] as usize;
        if push != 33 && push != 65 {
            return None;
        }
        cursor += 1 + push;
        keys += 1;
    }
    if cursor != len - 2 || keys != n {
        return None;
    }
    Some((m, n))
}

/// Maps an output script to the opcode tag recorded on its credit.
pub fn credit_op_code(pk_script: &[u8]) -> u8 {
    match classify(pk_script) {
        ScriptClass::StakeSubmission => OP_SSTX,
        ScriptClass::StakeGen => OP_SSGEN,
        ScriptClass::StakeRevocation => OP_SSRTX,
        ScriptClass::StakeChange => OP_SSTXCHANGE,
        _ => OP_NONSTAKE,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxType {
    Regular,
    Ticket,
    Vote,
    Revocation,
}

impl TxType {
    pub fn to_byte(self) -> u8 {
        match self {
            TxType::Regular => 0,
            TxType::Ticket => 1,
            TxType::Vote => 2,
            TxType::Revocation => 3,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TxType::Regular),
            1 => Some(TxType::Ticket),
            2 => Some(TxType::Vote),
            3 => Some(TxType::Revocation),
            _ => None,
        }
    }
}

/// Determines the stake kind of a transaction from its output script tags.
pub fn determine_tx_type(tx: &Transaction) -> TxType {
    let mut classes = tx.tx_out.iter().map(|out| classify(&out.pk_script));
    if classes.clone().any(|class| class == ScriptClass::StakeGen) {
        return TxType::Vote;
    }
    if classes.any(|class| class == ScriptClass::StakeRevocation) {
        return TxType::Revocation;
    }
    match tx.tx_out.first() {
        Some(out) if classify(&out.pk_script) == ScriptClass::StakeSubmission => TxType::Ticket,
        _ => TxType::Regular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outpoint::{OutPoint, TREE_REGULAR};
    use crate::transaction::{TxIn, TxOut};

    pub fn p2pkh(tag: u8) -> Vec<u8> {
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
        script.extend_from_slice(&[tag; 20]);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        script
    }

    pub fn p2sh(tag: u8) -> Vec<u8> {
        let mut script = Vec::with_capacity(23);
        script.extend_from_slice(&[OP_HASH160, 20]);
        script.extend_from_slice(&[tag; 20]);
        script.push(OP_EQUAL);
        script
    }

    fn tagged(op: u8, inner: Vec<u8>) -> Vec<u8> {
        let mut script = Vec::with_capacity(inner.len() + 1);
        script.push(op);
        script.extend_from_slice(&inner);
        script
    }

    fn output(pk_script: Vec<u8>) -> TxOut {
        TxOut {
            value: 0,
            version: 0,
            pk_script,
        }
    }

    fn tx_with_outputs(outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            version: 1,
            tx_in: vec![TxIn {
                previous_out_point: OutPoint::new([1u8; 32], 0, TREE_REGULAR),
                sequence: u32::MAX,
                signature_script: Vec::new(),
            }],
            tx_out: outputs,
            lock_time: 0,
            expiry: 0,
        }
    }

    #[test]
    fn classify_standard_shapes() {
        assert_eq!(classify(&p2pkh(1)), ScriptClass::PubKeyHash);
        assert_eq!(classify(&p2sh(2)), ScriptClass::ScriptHash);
        assert_eq!(classify(&[OP_RETURN, 1, 0xaa]), ScriptClass::NullData);
        assert_eq!(classify(&[0x01, 0x02]), ScriptClass::NonStandard);
        assert_eq!(
            classify(&tagged(OP_SSTX, p2pkh(1))),
            ScriptClass::StakeSubmission
        );
        assert_eq!(
            stake_subclass(&tagged(OP_SSGEN, p2sh(3))),
            ScriptClass::ScriptHash
        );
    }

    #[test]
    fn p2sh_hash_extraction() {
        assert_eq!(script_hash_from_p2sh(&p2sh(9)), Some([9u8; 20]));
        assert_eq!(
            script_hash_from_p2sh(&tagged(OP_SSTXCHANGE, p2sh(9))),
            Some([9u8; 20])
        );
        assert_eq!(script_hash_from_p2sh(&p2pkh(9)), None);
    }

    #[test]
    fn multisig_parse() {
        // 2-of-3 with compressed keys.
        let mut script = vec![0x52];
        for tag in 0..3 {
            script.push(33);
            script.extend_from_slice(&[tag; 33]);
        }
        script.extend_from_slice(&[0x53, OP_CHECKMULTISIG]);
        assert_eq!(multisig_m_n(&script), Some((2, 3)));
        assert_eq!(classify(&script), ScriptClass::Multisig);

        // Declared n disagrees with the number of pushed keys.
        let mut bad = vec![0x52];
        bad.push(33);
        bad.extend_from_slice(&[0u8; 33]);
        bad.extend_from_slice(&[0x53, OP_CHECKMULTISIG]);
        assert_eq!(multisig_m_n(&bad), None);
    }

    #[test]
    fn tx_type_from_outputs() {
        let regular = tx_with_outputs(vec![output(p2pkh(1))]);
        assert_eq!(determine_tx_type(&regular), TxType::Regular);

        let ticket = tx_with_outputs(vec![
            output(tagged(OP_SSTX, p2pkh(1))),
            output(tagged(OP_SSTXCHANGE, p2pkh(2))),
        ]);
        assert_eq!(determine_tx_type(&ticket), TxType::Ticket);

        let vote = tx_with_outputs(vec![
            output(vec![OP_RETURN, 0x24]),
            output(tagged(OP_SSGEN, p2pkh(1))),
        ]);
        assert_eq!(determine_tx_type(&vote), TxType::Vote);

        let revocation = tx_with_outputs(vec![output(tagged(OP_SSRTX, p2pkh(1)))]);
        assert_eq!(determine_tx_type(&revocation), TxType::Revocation);
    }
}
