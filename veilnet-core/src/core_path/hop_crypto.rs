/*
    Hop crypto - per-hop keys and onion layering

    Every hop of a path shares two symmetric keys with the originator:
    - upstream: the originator adds one layer per hop, each hop peels its own
    - downstream: each hop adds one layer, the originator peels them all

    Keys come from an X25519 agreement between a fresh ephemeral key chosen
    by the originator and the hop's long-term encryption key, expanded with
    HKDF-SHA256. The same expansion yields the key that seals the hop's
    extend record.

    A layer is `nonce(24) || XChaCha20-Poly1305 ciphertext`.
*/

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::extend_record::ExtendRecord;
use super::PathError;
use crate::core_identity::EncryptionKey;

pub const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Bytes added by one onion layer
pub const LAYER_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

const HOP_KDF_INFO: &[u8] = b"veilnet hop keys v1";

/// Encrypt `plaintext` under `key` with a random nonce.
pub fn seal_layer(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, PathError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = rand::random::<[u8; NONCE_LEN]>();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| PathError::Seal)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Authenticate and decrypt one layer produced by [`seal_layer`].
pub fn open_layer(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, PathError> {
    if data.len() < LAYER_OVERHEAD {
        return Err(PathError::Open);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| PathError::Open)
}

/// Symmetric keys shared between the originator and one hop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HopKeys {
    upstream: [u8; 32],
    downstream: [u8; 32],
}

impl HopKeys {
    pub fn from_parts(upstream: [u8; 32], downstream: [u8; 32]) -> Self {
        HopKeys {
            upstream,
            downstream,
        }
    }

    /// Remove this hop's upstream layer.
    pub fn peel_upstream(&self, data: &[u8]) -> Result<Vec<u8>, PathError> {
        open_layer(&self.upstream, data)
    }

    /// Add this hop's downstream layer.
    pub fn add_downstream(&self, data: &[u8]) -> Result<Vec<u8>, PathError> {
        seal_layer(&self.downstream, data)
    }
}

impl fmt::Debug for HopKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HopKeys(..)")
    }
}

/// Originator side: add one upstream layer per hop, last hop innermost.
pub fn wrap_upstream<'a, I>(hops: I, payload: &[u8]) -> Result<Vec<u8>, PathError>
where
    I: IntoIterator<Item = &'a HopKeys>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut data = payload.to_vec();
    for keys in hops.into_iter().rev() {
        data = seal_layer(&keys.upstream, &data)?;
    }
    Ok(data)
}

/// Originator side: remove the downstream layers of `hops`, first hop outermost.
pub fn unwrap_downstream<'a, I>(hops: I, data: &[u8]) -> Result<Vec<u8>, PathError>
where
    I: IntoIterator<Item = &'a HopKeys>,
{
    let mut data = data.to_vec();
    for keys in hops {
        data = open_layer(&keys.downstream, &data)?;
    }
    Ok(data)
}

/// Extend record as it travels to a hop, plus the ephemeral key it was sealed with.
#[derive(Debug, Clone)]
pub struct SealedRecord {
    pub ephemeral_key: [u8; 32],
    pub sealed: Vec<u8>,
}

fn derive(
    shared: &[u8; 32],
    ephemeral_public: &[u8; 32],
    hop_public: &[u8; 32],
) -> Result<(Zeroizing<[u8; 32]>, HopKeys), PathError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public);
    salt[32..].copy_from_slice(hop_public);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; 96]);
    hk.expand(HOP_KDF_INFO, &mut okm[..])
        .map_err(|_| PathError::KeyAgreement)?;

    let mut record_key = Zeroizing::new([0u8; 32]);
    record_key.copy_from_slice(&okm[..32]);
    let mut upstream = [0u8; 32];
    upstream.copy_from_slice(&okm[32..64]);
    let mut downstream = [0u8; 32];
    downstream.copy_from_slice(&okm[64..]);
    Ok((record_key, HopKeys::from_parts(upstream, downstream)))
}

/// Originator side: seal `record` to a hop's public encryption key.
pub fn seal_record(
    hop_public: &[u8; 32],
    record: &ExtendRecord,
) -> Result<(SealedRecord, HopKeys), PathError> {
    let ephemeral = EncryptionKey::generate();
    let ephemeral_key = ephemeral.public();
    let shared = Zeroizing::new(
        ephemeral
            .agree(hop_public)
            .ok_or(PathError::KeyAgreement)?,
    );
    let (record_key, keys) = derive(&shared, &ephemeral_key, hop_public)?;
    let sealed = seal_layer(&record_key, &record.encode())?;
    Ok((
        SealedRecord {
            ephemeral_key,
            sealed,
        },
        keys,
    ))
}

/// Hop side: open a record sealed to our encryption key.
pub fn open_record(
    local: &EncryptionKey,
    ephemeral_key: &[u8; 32],
    sealed: &[u8],
) -> Result<(ExtendRecord, HopKeys), PathError> {
    let shared = Zeroizing::new(local.agree(ephemeral_key).ok_or(PathError::KeyAgreement)?);
    let (record_key, keys) = derive(&shared, ephemeral_key, &local.public())?;
    let plain = Zeroizing::new(open_layer(&record_key, sealed)?);
    let record = ExtendRecord::decode(&plain)?;
    Ok((record, keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_path::PathId;

    fn hop_chain(n: usize) -> (Vec<HopKeys>, Vec<HopKeys>) {
        // (originator's copy, each hop's copy) derived independently
        let mut originator = Vec::new();
        let mut hops = Vec::new();
        for _ in 0..n {
            let hop_key = EncryptionKey::generate();
            let record = ExtendRecord {
                rx_id: PathId::random(),
                tx_id: PathId::random(),
                lifetime_ms: 1000,
            };
            let (sealed, keys) = seal_record(&hop_key.public(), &record).unwrap();
            let (opened, hop_keys) =
                open_record(&hop_key, &sealed.ephemeral_key, &sealed.sealed).unwrap();
            assert_eq!(opened, record);
            originator.push(keys);
            hops.push(hop_keys);
        }
        (originator, hops)
    }

    #[test]
    fn test_onion_round_trip_both_directions() {
        for n in [1usize, 2, 3, 8] {
            let (originator, hops) = hop_chain(n);
            let payload = format!("payload through {} hops", n).into_bytes();

            let mut data = wrap_upstream(&originator, &payload).unwrap();
            assert_eq!(data.len(), payload.len() + n * LAYER_OVERHEAD);
            for hop in &hops {
                data = hop.peel_upstream(&data).unwrap();
            }
            assert_eq!(data, payload, "upstream through {} hops", n);

            let mut data = payload.clone();
            for hop in hops.iter().rev() {
                data = hop.add_downstream(&data).unwrap();
            }
            assert_eq!(
                unwrap_downstream(&originator, &data).unwrap(),
                payload,
                "downstream through {} hops",
                n
            );
        }
    }

    #[test]
    fn test_wrong_hop_cannot_peel() {
        let (originator, hops) = hop_chain(2);
        let data = wrap_upstream(&originator, b"secret").unwrap();
        assert_eq!(hops[1].peel_upstream(&data), Err(PathError::Open));
    }

    #[test]
    fn test_tampered_layer_rejected() {
        let (originator, hops) = hop_chain(1);
        let mut data = wrap_upstream(&originator, b"secret").unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        assert!(hops[0].peel_upstream(&data).is_err());
        assert!(open_layer(&[0u8; 32], &data[..10]).is_err());
    }

    #[test]
    fn test_record_for_other_hop_does_not_open() {
        let intended = EncryptionKey::generate();
        let other = EncryptionKey::generate();
        let record = ExtendRecord {
            rx_id: PathId::random(),
            tx_id: PathId::random(),
            lifetime_ms: 5,
        };
        let (sealed, _) = seal_record(&intended.public(), &record).unwrap();
        assert!(open_record(&other, &sealed.ephemeral_key, &sealed.sealed).is_err());
    }
}
