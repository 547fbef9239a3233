// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::result_large_err)]

use crate::Hash32;
use secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};

// Feste Aux-Randomness: Signaturen sind reproduzierbar (keine lokale Zufälligkeit im Knoten)
const AUX_ZERO: [u8; 32] = [0u8; 32];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchnorrKeypair {
    pub keypair: Keypair,
    pub xonly: XOnlyPublicKey,
}

impl SchnorrKeypair {
    pub fn from_secret_key_bytes(sk_bytes: &[u8; 32]) -> Result<Self, secp256k1::Error> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(sk_bytes)?;
        let kp = Keypair::from_secret_key(&secp, &sk);
        let (xonly, _parity) = XOnlyPublicKey::from_keypair(&kp);
        Ok(Self { keypair: kp, xonly })
    }

    pub fn public_xonly_bytes(&self) -> [u8; 32] {
        self.xonly.serialize()
    }
}

/// BIP-340 Signatur über einen 32-Byte-Digest
pub fn schnorr_sign(msg32: &Hash32, kp: &SchnorrKeypair) -> [u8; 64] {
    let secp = Secp256k1::signing_only();
    let m = Message::from_digest(*msg32);
    let sig = secp.sign_schnorr_with_aux_rand(&m, &kp.keypair, &AUX_ZERO);
    let bytes_ref: &[u8; 64] = sig.as_ref();
    *bytes_ref
}

/// Prüft eine Signatur gegen einen x-only Public Key in Rohform.
/// Ungültige Schlüssel oder Signaturen ergeben `false`, nie einen Fehler.
pub fn schnorr_verify(msg32: &Hash32, sig64: &[u8; 64], pubkey_xonly: &[u8; 32]) -> bool {
    let secp = Secp256k1::verification_only();
    let pk = match XOnlyPublicKey::from_slice(pubkey_xonly) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let m = Message::from_digest(*msg32);
    let sig = match secp256k1::schnorr::Signature::from_slice(sig64) {
        Ok(s) => s,
        Err(_) => return false,
    };
    secp.verify_schnorr(&sig, &m, &pk).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blake3_32;

    #[test]
    fn schnorr_roundtrip() {
        // deterministischer seckey aus Hash
        let seed = blake3_32(b"por:schnorr:test:seed");
        let kp = SchnorrKeypair::from_secret_key_bytes(&seed).expect("valid seckey");
        let msg = blake3_32(b"message");
        let sig = schnorr_sign(&msg, &kp);
        assert!(schnorr_verify(&msg, &sig, &kp.public_xonly_bytes()));

        // negative
        let mut tampered = sig;
        tampered[0] ^= 0x01;
        assert!(!schnorr_verify(&msg, &tampered, &kp.public_xonly_bytes()));
        let other = blake3_32(b"other message");
        assert!(!schnorr_verify(&other, &sig, &kp.public_xonly_bytes()));
    }

    #[test]
    fn signing_is_deterministic() {
        let kp = SchnorrKeypair::from_secret_key_bytes(&blake3_32(b"det")).expect("valid seckey");
        let msg = blake3_32(b"m");
        assert_eq!(schnorr_sign(&msg, &kp), schnorr_sign(&msg, &kp));
    }

    #[test]
    fn wrong_key_and_garbage_key_fail() {
        let k1 = SchnorrKeypair::from_secret_key_bytes(&blake3_32(b"sk1")).expect("sk1");
        let k2 = SchnorrKeypair::from_secret_key_bytes(&blake3_32(b"sk2")).expect("sk2");
        let msg = blake3_32(b"m1");
        let sig = schnorr_sign(&msg, &k1);
        assert!(!schnorr_verify(&msg, &sig, &k2.public_xonly_bytes()));
        // kein gültiger Kurvenpunkt
        assert!(!schnorr_verify(&msg, &sig, &[0xffu8; 32]));
    }
}
