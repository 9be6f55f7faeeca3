use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use std::collections::{BTreeMap, HashMap};

use crate::constants::{SEAT_AVAILABLE, SEAT_BOOKED};
use crate::error::{Result, ScraperError};
use crate::types::Cents;

/// Per-category seat totals decoded from one encrypted seat-layout payload,
/// joined with the show's category price map.
#[derive(Debug, Clone, Default)]
pub struct SeatCollection {
    pub seats_by_category: BTreeMap<String, u32>,
    pub booked_by_category: BTreeMap<String, u32>,
    pub total_tickets: u32,
    pub booked_tickets: u32,
    pub total_gross: Cents,
    pub booked_gross: Cents,
}

impl SeatCollection {
    /// One (price, total-seats) pair per category, for fingerprint building.
    pub fn category_price_pairs(&self, price_map: &BTreeMap<String, Cents>) -> Vec<(Cents, u32)> {
        self.seats_by_category
            .iter()
            .map(|(cat, &count)| (price_map.get(cat).copied().unwrap_or(0), count))
            .collect()
    }
}

/// Decrypts a base64 seat-layout payload. The platform mandates AES-CBC with
/// an all-zero IV and PKCS#7 padding; reproduced exactly for wire
/// compatibility.
pub fn decrypt_seat_payload(encoded: &str, key: &[u8]) -> Result<String> {
    let data = B64
        .decode(encoded.trim())
        .map_err(|e| ScraperError::Decrypt(format!("base64: {}", e)))?;
    let plaintext = decrypt_zero_iv(key, &data)?;
    String::from_utf8(plaintext).map_err(|e| ScraperError::Decrypt(format!("utf-8: {}", e)))
}

fn decrypt_zero_iv(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let iv = [0u8; 16];
    let decrypted = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, &iv)
            .map_err(|e| ScraperError::Decrypt(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, &iv)
            .map_err(|e| ScraperError::Decrypt(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, &iv)
            .map_err(|e| ScraperError::Decrypt(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        n => {
            return Err(ScraperError::Decrypt(format!(
                "unsupported key length {}",
                n
            )))
        }
    };
    decrypted.map_err(|e| ScraperError::Decrypt(e.to_string()))
}

/// Parses the decrypted delimiter grammar:
///
/// ```text
/// <category-header>||<row>|<row>|...
/// category-header := <entry>|<entry>|...   entry := code:letter:areaCode[:extra]
/// row := <seat>:<seat>:...                 seat[0] = category letter, seat[1] = status digit
/// ```
///
/// Status digits: 0 void/aisle (ignored), 1 available, 2 booked. Rows and
/// seat tokens failing the minimum length/field-count guards are skipped,
/// never fatal.
pub fn parse_seat_grammar(
    decrypted: &str,
    price_map: &BTreeMap<String, Cents>,
) -> Result<SeatCollection> {
    let (header, rows_part) = decrypted
        .split_once("||")
        .ok_or_else(|| ScraperError::Payload("missing header/rows separator".into()))?;

    // Block letter -> area category code
    let mut category_map: HashMap<char, String> = HashMap::new();
    for entry in header.split('|') {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() >= 3 {
            if let Some(letter) = parts[1].chars().next() {
                category_map.insert(letter, parts[2].to_string());
            }
        }
    }

    let mut collection = SeatCollection::default();

    for row in rows_part.split('|') {
        if row.is_empty() {
            continue;
        }
        let parts: Vec<&str> = row.split(':').collect();
        if parts.len() < 3 {
            continue;
        }
        let block_field = if parts.len() > 3 { parts[3] } else { parts[2] };
        let Some(block) = block_field.chars().next() else {
            continue;
        };
        let Some(area) = category_map.get(&block) else {
            continue;
        };

        for seat in &parts {
            let mut chars = seat.chars();
            let (Some(letter), Some(status)) = (chars.next(), chars.next()) else {
                continue;
            };
            if letter == block && (status == SEAT_AVAILABLE || status == SEAT_BOOKED) {
                *collection
                    .seats_by_category
                    .entry(area.clone())
                    .or_insert(0) += 1;
            }
            if status == SEAT_BOOKED {
                *collection
                    .booked_by_category
                    .entry(area.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    for (area, &total) in &collection.seats_by_category {
        let booked = collection.booked_by_category.get(area).copied().unwrap_or(0);
        let price = price_map.get(area).copied().unwrap_or(0);
        collection.total_tickets += total;
        collection.booked_tickets += booked;
        collection.total_gross += total as Cents * price;
        collection.booked_gross += booked as Cents * price;
    }

    Ok(collection)
}

/// Decrypt + parse in one step.
pub fn decode_seat_layout(
    encoded: &str,
    key: &[u8],
    price_map: &BTreeMap<String, Cents>,
) -> Result<SeatCollection> {
    let decrypted = decrypt_seat_payload(encoded, key)?;
    parse_seat_grammar(&decrypted, price_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    const TEST_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn encrypt_zero_iv(key: &[u8], plaintext: &str) -> String {
        let iv = [0u8; 16];
        let ct = cbc::Encryptor::<Aes256>::new_from_slices(key, &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        B64.encode(ct)
    }

    fn price_map() -> BTreeMap<String, Cents> {
        BTreeMap::from([("CLUB".to_string(), 200_00), ("GOLD".to_string(), 150_00)])
    }

    // header: block A -> CLUB, block B -> GOLD
    const PAYLOAD: &str = "0001:A:CLUB|0002:B:GOLD||A1:A1:A2:A0|B2:B2:B1:B1";

    #[test]
    fn grammar_counts_totals_and_booked() {
        let col = parse_seat_grammar(PAYLOAD, &price_map()).unwrap();
        // row A: three live seats (two available, one booked), one void
        assert_eq!(col.seats_by_category.get("CLUB"), Some(&3));
        assert_eq!(col.booked_by_category.get("CLUB"), Some(&1));
        // row B: four live seats, two booked
        assert_eq!(col.seats_by_category.get("GOLD"), Some(&4));
        assert_eq!(col.booked_by_category.get("GOLD"), Some(&2));

        assert_eq!(col.total_tickets, 7);
        assert_eq!(col.booked_tickets, 3);
        assert_eq!(col.total_gross, 3 * 200_00 + 4 * 150_00);
        assert_eq!(col.booked_gross, 200_00 + 2 * 150_00);
    }

    #[test]
    fn malformed_rows_and_seats_are_skipped() {
        let payload = "0001:A:CLUB||x|A1:A2|A:A1:A1:A1|Z1:Z2:Z3";
        let col = parse_seat_grammar(payload, &price_map()).unwrap();
        // "x" fails the field-count guard; "A1:A2" too (needs 3 fields);
        // the bare "A" token inside the third row fails the length guard;
        // "Z" rows have no category mapping.
        assert_eq!(col.seats_by_category.get("CLUB"), Some(&3));
        assert_eq!(col.total_tickets, 3);
    }

    #[test]
    fn missing_separator_is_an_error() {
        let err = parse_seat_grammar("no separator here", &price_map()).unwrap_err();
        assert!(matches!(err, ScraperError::Payload(_)));
    }

    #[test]
    fn decrypts_zero_iv_payload() {
        let encoded = encrypt_zero_iv(TEST_KEY, PAYLOAD);
        let decrypted = decrypt_seat_payload(&encoded, TEST_KEY).unwrap();
        assert_eq!(decrypted, PAYLOAD);

        let col = decode_seat_layout(&encoded, TEST_KEY, &price_map()).unwrap();
        assert_eq!(col.total_tickets, 7);
    }

    #[test]
    fn wrong_key_length_rejected() {
        let err = decrypt_seat_payload("AAAA", b"short").unwrap_err();
        assert!(matches!(err, ScraperError::Decrypt(_)));
    }

    #[test]
    fn unknown_category_priced_at_zero() {
        let payload = "0001:A:BALCONY||A1:A2:A1";
        let col = parse_seat_grammar(payload, &price_map()).unwrap();
        assert_eq!(col.total_tickets, 3);
        assert_eq!(col.total_gross, 0);
    }
}
