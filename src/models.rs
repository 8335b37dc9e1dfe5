use serde::{Deserialize, Serialize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the bytes. Stable across runs and builds, unlike `std` hashers.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Host identifier shared by the scan output and the rank table.
pub fn host_id(host: &str) -> u64 {
    stable_hash(host.trim().to_lowercase().as_bytes())
}

/// One rule that fired on a scanned document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule: usize,
    pub matched: usize,
}

/// One line of a `.scanned` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedDocument {
    pub url: String,
    pub host: String,
    pub host_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    pub hits: Vec<RuleHit>,
    #[serde(default)]
    pub paragraphs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub language: String,
    pub ideology_type: String,
    pub topic: String,
    pub sub_topic: String,
    pub strength: f32,
}

/// The document body sent to the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub url: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_rank: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    pub classifications: Vec<Classification>,
    pub paragraphs: Vec<String>,
}

impl IndexedDocument {
    /// `_id` in the index, derived from the URL so re-imports overwrite.
    pub fn doc_id(&self) -> String {
        format!("{:016x}", stable_hash(self.url.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_known_values() {
        assert_eq!(stable_hash(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(stable_hash(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn host_id_ignores_case_and_padding() {
        assert_eq!(host_id("Example.COM"), host_id(" example.com "));
        assert_ne!(host_id("example.com"), host_id("example.org"));
    }

    #[test]
    fn doc_id_is_hex_of_url() {
        let doc = IndexedDocument {
            url: "https://example.com/a".to_string(),
            host: "example.com".to_string(),
            host_rank: None,
            content_language: None,
            classifications: vec![],
            paragraphs: vec![],
        };
        assert_eq!(doc.doc_id().len(), 16);
        assert_eq!(
            doc.doc_id(),
            format!("{:016x}", stable_hash(b"https://example.com/a"))
        );
    }

    #[test]
    fn scanned_document_tolerates_missing_optionals() {
        let line = r#"{"url":"https://a.org/","host":"a.org","host_id":1,"hits":[{"rule":0,"matched":2}]}"#;
        let doc: ScannedDocument = serde_json::from_str(line).unwrap();
        assert_eq!(doc.content_language, None);
        assert!(doc.paragraphs.is_empty());
        assert_eq!(doc.hits, vec![RuleHit { rule: 0, matched: 2 }]);
    }

    #[test]
    fn indexed_document_omits_missing_rank() {
        let doc = IndexedDocument {
            url: "u".to_string(),
            host: "h".to_string(),
            host_rank: None,
            content_language: None,
            classifications: vec![],
            paragraphs: vec![],
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert!(!json.contains("host_rank"));
    }
}
