//! Content sniffing from leading payload bytes

/// Guesses a MIME type from the first bytes of a payload
pub trait MagicSniffer: Send + Sync {
    /// Returns the detected MIME type name, or `None` if nothing matched
    fn sniff(&self, data: &[u8]) -> Option<String>;
}

/// Byte signature at a fixed offset
#[derive(Debug, Clone)]
pub struct Signature {
    pub offset: usize,
    pub magic: &'static [u8],
    pub mime: &'static str,
}

const DEFAULT_SIGNATURES: &[Signature] = &[
    Signature { offset: 0, magic: b"GIF87a", mime: "image/gif" },
    Signature { offset: 0, magic: b"GIF89a", mime: "image/gif" },
    Signature { offset: 0, magic: b"\x89PNG\r\n\x1a\n", mime: "image/png" },
    Signature { offset: 0, magic: b"\xff\xd8\xff", mime: "image/jpeg" },
    Signature { offset: 0, magic: b"BM", mime: "image/bmp" },
    Signature { offset: 0, magic: b"%PDF-", mime: "application/pdf" },
    Signature { offset: 0, magic: b"PK\x03\x04", mime: "application/zip" },
    Signature { offset: 0, magic: b"\x1f\x8b", mime: "application/gzip" },
    Signature { offset: 0, magic: b"ID3", mime: "audio/mpeg" },
    Signature { offset: 0, magic: b"OggS", mime: "audio/ogg" },
    Signature { offset: 0, magic: b"fLaC", mime: "audio/flac" },
    Signature { offset: 4, magic: b"ftyp", mime: "video/mp4" },
    Signature { offset: 0, magic: b"\x1a\x45\xdf\xa3", mime: "video/webm" },
    Signature { offset: 0, magic: b"<?xml", mime: "text/xml" },
    Signature { offset: 0, magic: b"<!DOCTYPE html", mime: "text/html" },
    Signature { offset: 0, magic: b"<html", mime: "text/html" },
];

/// Table driven sniffer; first matching signature wins.
///
/// Falls back to `text/plain` for printable input and
/// `application/octet-stream` otherwise.
#[derive(Debug, Clone)]
pub struct SignatureSniffer {
    signatures: Vec<Signature>,
}

impl Default for SignatureSniffer {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_SIGNATURES.to_vec(),
        }
    }
}

impl SignatureSniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signature checked before the built-in ones
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signatures.insert(0, signature);
        self
    }
}

impl MagicSniffer for SignatureSniffer {
    fn sniff(&self, data: &[u8]) -> Option<String> {
        if data.is_empty() {
            return None;
        }

        let found = self.signatures.iter().find(|sig| {
            data.get(sig.offset..sig.offset + sig.magic.len()) == Some(sig.magic)
        });
        if let Some(sig) = found {
            return Some(sig.mime.to_string());
        }

        let printable = data
            .iter()
            .all(|&b| b.is_ascii_graphic() || b.is_ascii_whitespace());
        Some(if printable { "text/plain" } else { "application/octet-stream" }.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_signatures() {
        let sniffer = SignatureSniffer::new();
        assert_eq!(sniffer.sniff(b"GIF89a\x01\x00").as_deref(), Some("image/gif"));
        assert_eq!(sniffer.sniff(b"%PDF-1.7\n").as_deref(), Some("application/pdf"));
        assert_eq!(sniffer.sniff(b"\0\0\0\x18ftypmp42").as_deref(), Some("video/mp4"));
    }

    #[test]
    fn test_fallbacks() {
        let sniffer = SignatureSniffer::new();
        assert_eq!(sniffer.sniff(b"hello world\r\n").as_deref(), Some("text/plain"));
        assert_eq!(sniffer.sniff(&[0u8, 1, 2, 3]).as_deref(), Some("application/octet-stream"));
        assert_eq!(sniffer.sniff(b""), None);
    }

    #[test]
    fn test_custom_signature_precedence() {
        let sniffer = SignatureSniffer::new().with_signature(Signature {
            offset: 0,
            magic: b"GIF89a",
            mime: "image/x-custom",
        });
        assert_eq!(sniffer.sniff(b"GIF89a").as_deref(), Some("image/x-custom"));
    }
}
