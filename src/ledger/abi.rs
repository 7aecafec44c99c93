//! ABI encoding for the grade contract
//!
//! Only the shapes the contract actually uses: `string`, `uint256` and
//! `bytes32`, laid out per the Solidity head/tail rules.

use sha3::{Digest, Keccak256};

use super::{GradeEntry, LedgerError, StoredGrade};

/// Write method: studentId, courseId, score, semester, teacherId, metadata
pub const ADD_GRADE_SIGNATURE: &str = "addGrade(string,string,uint256,string,string,string)";

/// Read method returning the stored tuple plus the block timestamp
pub const GET_GRADE_SIGNATURE: &str = "getGrade(bytes32)";

/// Event emitted by `addGrade`; the grade id is the first indexed topic
pub const GRADE_ADDED_EVENT: &str = "GradeAdded(bytes32,string,string,uint256)";

const WORD: usize = 32;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic hash of an event signature, 0x-prefixed
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

enum Token<'a> {
    Uint(u64),
    Str(&'a str),
}

fn encode_tokens(tokens: &[Token<'_>]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Uint(v) => head.extend_from_slice(&uint_word(*v)),
            Token::Str(s) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u64));
                let bytes = s.as_bytes();
                tail.extend_from_slice(&uint_word(bytes.len() as u64));
                tail.extend_from_slice(bytes);
                tail.resize(tail.len() + padded_len(bytes.len()) - bytes.len(), 0);
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Calldata for `addGrade`
pub fn encode_add_grade(entry: &GradeEntry) -> Vec<u8> {
    let mut data = selector(ADD_GRADE_SIGNATURE).to_vec();
    data.extend(encode_tokens(&[
        Token::Str(&entry.student_id),
        Token::Str(&entry.course_id),
        Token::Uint(entry.score as u64),
        Token::Str(&entry.semester),
        Token::Str(&entry.teacher_id),
        Token::Str(&entry.metadata),
    ]));
    data
}

/// Parse a 64-hex-char identifier (optionally 0x-prefixed) into bytes32
pub fn parse_bytes32(grade_id: &str) -> Result<[u8; 32], LedgerError> {
    let normalized = super::normalize_grade_id(grade_id)
        .ok_or_else(|| LedgerError::Decode(format!("not a bytes32 identifier: {}", grade_id)))?;
    let bytes = hex::decode(normalized).map_err(|e| LedgerError::Decode(e.to_string()))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Calldata for `getGrade`
pub fn encode_get_grade(grade_id: &str) -> Result<Vec<u8>, LedgerError> {
    let mut data = selector(GET_GRADE_SIGNATURE).to_vec();
    data.extend_from_slice(&parse_bytes32(grade_id)?);
    Ok(data)
}

fn to_offset(value: u64) -> Result<usize, LedgerError> {
    usize::try_from(value)
        .map_err(|_| LedgerError::Decode(format!("offset {} out of range", value)))
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn word(&self, offset: usize) -> Result<&'a [u8], LedgerError> {
        offset
            .checked_add(WORD)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| LedgerError::Decode(format!("truncated word at offset {}", offset)))
    }

    fn uint(&self, offset: usize) -> Result<u64, LedgerError> {
        let word = self.word(offset)?;
        if word[..WORD - 8].iter().any(|b| *b != 0) {
            return Err(LedgerError::Decode(format!(
                "uint256 at offset {} does not fit in 64 bits",
                offset
            )));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&word[WORD - 8..]);
        Ok(u64::from_be_bytes(buf))
    }

    fn string(&self, head_offset: usize) -> Result<String, LedgerError> {
        let start = to_offset(self.uint(head_offset)?)?;
        let len = to_offset(self.uint(start)?)?;
        let bytes = start
            .checked_add(WORD)
            .and_then(|body_start| Some((body_start, body_start.checked_add(len)?)))
            .and_then(|(body_start, end)| self.data.get(body_start..end))
            .ok_or_else(|| LedgerError::Decode(format!("truncated string at offset {}", start)))?;
        String::from_utf8(bytes.to_vec()).map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

/// Decode the return data of `getGrade`
pub fn decode_stored_grade(data: &[u8]) -> Result<StoredGrade, LedgerError> {
    let reader = Reader { data };
    Ok(StoredGrade {
        student_id: reader.string(0)?,
        course_id: reader.string(WORD)?,
        score: reader.uint(2 * WORD)?,
        semester: reader.string(3 * WORD)?,
        teacher_id: reader.string(4 * WORD)?,
        metadata: reader.string(5 * WORD)?,
        timestamp: reader.uint(6 * WORD)?,
    })
}

/// Encode a stored grade the way `getGrade` returns it. Used by test nodes.
pub fn encode_stored_grade(grade: &StoredGrade) -> Vec<u8> {
    encode_tokens(&[
        Token::Str(&grade.student_id),
        Token::Str(&grade.course_id),
        Token::Uint(grade.score),
        Token::Str(&grade.semester),
        Token::Str(&grade.teacher_id),
        Token::Str(&grade.metadata),
        Token::Uint(grade.timestamp),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> GradeEntry {
        GradeEntry {
            student_id: "s1".into(),
            course_id: "c1".into(),
            score: 85,
            semester: "2024-1".into(),
            teacher_id: "t1".into(),
            metadata: r#"{"status":"PENDING"}"#.into(),
        }
    }

    #[test]
    fn test_known_selector() {
        // transfer(address,uint256) is the canonical ERC-20 selector
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }

    #[test]
    fn test_add_grade_layout() {
        let data = encode_add_grade(&entry());
        assert_eq!(&data[..4], &selector(ADD_GRADE_SIGNATURE));

        let args = &data[4..];
        let reader = Reader { data: args };
        // Six head words; the first string starts right after them
        assert_eq!(reader.uint(0).unwrap(), 6 * 32);
        assert_eq!(reader.uint(2 * 32).unwrap(), 85);
        assert_eq!(reader.string(0).unwrap(), "s1");
        assert_eq!(reader.string(3 * 32).unwrap(), "2024-1");
        assert_eq!(reader.string(5 * 32).unwrap(), r#"{"status":"PENDING"}"#);
        assert_eq!(args.len() % 32, 0);
    }

    #[test]
    fn test_stored_grade_decoding() {
        let stored = StoredGrade {
            student_id: "student-with-a-rather-long-identifier-over-32-bytes".into(),
            course_id: "c1".into(),
            score: 100,
            semester: "2024-2".into(),
            teacher_id: "t9".into(),
            metadata: String::new(),
            timestamp: 1_700_000_000,
        };
        let decoded = decode_stored_grade(&encode_stored_grade(&stored)).unwrap();
        assert_eq!(decoded, stored);
    }

    #[test]
    fn test_truncated_return_data_is_an_error() {
        let encoded = encode_stored_grade(&StoredGrade {
            student_id: "s1".into(),
            course_id: "c1".into(),
            score: 1,
            semester: "x".into(),
            teacher_id: "t".into(),
            metadata: "m".into(),
            timestamp: 1,
        });
        assert!(decode_stored_grade(&encoded[..100]).is_err());
        assert!(decode_stored_grade(&[]).is_err());
    }

    #[test]
    fn test_oversized_offsets_are_an_error() {
        let mut data = vec![0u8; 7 * WORD];
        // Head word pointing near usize::MAX
        data[WORD - 8..WORD].copy_from_slice(&[0xff; 8]);
        assert!(matches!(decode_stored_grade(&data), Err(LedgerError::Decode(_))));

        // Valid head, string length near usize::MAX
        let mut data = vec![0u8; 8 * WORD];
        data[WORD - 1] = (7 * WORD) as u8;
        data[8 * WORD - 8..].copy_from_slice(&[0xff; 8]);
        assert!(matches!(decode_stored_grade(&data), Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_get_grade_calldata() {
        let id = "ab".repeat(32);
        let data = encode_get_grade(&id).unwrap();
        assert_eq!(data.len(), 36);
        assert_eq!(&data[4..], hex::decode(&id).unwrap().as_slice());
        assert!(encode_get_grade("0x1234").is_err());
    }
}
