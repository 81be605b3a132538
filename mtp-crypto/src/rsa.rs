//! RSA padding used by Telegram's auth key exchange.

use num_bigint::BigUint;
use crate::{aes, sha1, sha256};

/// An RSA public key (n, e).
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    n: BigUint,
    e: BigUint,
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// The server-advertised fingerprint: the low 64 bits of
    /// `SHA1(bytes(n) ‖ bytes(e))`, both as wire strings.
    pub fn fingerprint(&self) -> i64 {
        let mut buf = Vec::with_capacity(272);
        write_tl_bytes(&mut buf, &self.n.to_bytes_be());
        write_tl_bytes(&mut buf, &self.e.to_bytes_be());
        let sha = sha1!(&buf);
        let mut low = [0u8; 8];
        low.copy_from_slice(&sha[12..20]);
        i64::from_le_bytes(low)
    }
}

fn write_tl_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    let header = if data.len() <= 253 {
        buf.push(data.len() as u8);
        1
    } else {
        buf.push(0xfe);
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
        4
    };
    buf.extend_from_slice(data);
    let padding = (4 - (header + data.len()) % 4) % 4;
    buf.extend(std::iter::repeat_n(0u8, padding));
}

fn increment(data: &mut [u8]) {
    let mut i = data.len() - 1;
    loop {
        let (n, overflow) = data[i].overflowing_add(1);
        data[i] = n;
        if overflow {
            i = i.checked_sub(1).unwrap_or(data.len() - 1);
        } else {
            break;
        }
    }
}

/// RSA-encrypt `data` using the MTProto RSA-PAD scheme.
///
/// `random_bytes` must be exactly 224 bytes of secure random data.
/// Returns `None` if `data` is longer than 144 bytes.
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 224]) -> Option<Vec<u8>> {
    if data.len() > 144 {
        return None;
    }

    // data_with_padding: 192 bytes
    let mut data_with_padding = Vec::with_capacity(192);
    data_with_padding.extend_from_slice(data);
    data_with_padding.extend_from_slice(&random_bytes[..192 - data.len()]);

    // data_pad_reversed
    let data_pad_reversed: Vec<u8> = data_with_padding.iter().copied().rev().collect();

    let mut temp_key = [0u8; 32];
    temp_key.copy_from_slice(&random_bytes[192..]);

    let key_aes_encrypted = loop {
        // data_with_hash = data_pad_reversed + SHA256(temp_key + data_with_padding)
        let mut data_with_hash = Vec::with_capacity(224);
        data_with_hash.extend_from_slice(&data_pad_reversed);
        data_with_hash.extend_from_slice(&sha256!(&temp_key, &data_with_padding));

        aes::ige_encrypt(&mut data_with_hash, &temp_key, &[0u8; 32]);

        // temp_key_xor = temp_key XOR SHA256(aes_encrypted)
        let hash = sha256!(&data_with_hash);
        let mut xored = temp_key;
        for (a, b) in xored.iter_mut().zip(hash.iter()) { *a ^= b; }

        let mut candidate = Vec::with_capacity(256);
        candidate.extend_from_slice(&xored);
        candidate.extend_from_slice(&data_with_hash);

        if BigUint::from_bytes_be(&candidate) < key.n {
            break candidate;
        }
        increment(&mut temp_key);
    };

    let payload = BigUint::from_bytes_be(&key_aes_encrypted);
    let encrypted = payload.modpow(&key.e, &key.n);
    let mut block = encrypted.to_bytes_be();
    while block.len() < 256 { block.insert(0, 0); }
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Telegram's current production key.
    const PROD_N: &str = "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323";

    #[test]
    fn prod_fingerprint() {
        let key = Key::new(PROD_N, "65537").unwrap();
        assert_eq!(key.fingerprint(), -3414540481677951611);
    }

    #[test]
    fn encrypt_hashed_is_one_block() {
        let key = Key::new(PROD_N, "65537").unwrap();
        let out = encrypt_hashed(&[1u8; 100], &key, &[9u8; 224]).unwrap();
        assert_eq!(out.len(), 256);
        assert!(encrypt_hashed(&[0u8; 145], &key, &[9u8; 224]).is_none());
    }

    #[test]
    fn increment_carries() {
        let mut data = [0x00, 0xff, 0xff];
        increment(&mut data);
        assert_eq!(data, [0x01, 0x00, 0x00]);
    }
}
