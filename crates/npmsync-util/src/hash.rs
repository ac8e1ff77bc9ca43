use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::Sha1;
use sha2::{Digest, Sha512};

/// Incremental digest over a tarball payload.
///
/// Computes the legacy `shasum` (sha1, hex) and the modern `integrity`
/// (sha512, Subresource Integrity form) in a single pass, so a streamed
/// download only has to be read once.
#[derive(Debug, Clone, Default)]
pub struct TarballDigest {
    sha1: Sha1,
    sha512: Sha512,
    size: u64,
}

/// Finished digests for one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digests {
    /// Hex-encoded sha1 (`dist.shasum`).
    pub shasum: String,
    /// `sha512-<base64>` (`dist.integrity`).
    pub integrity: String,
    /// Number of bytes hashed.
    pub size: u64,
}

impl TarballDigest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.sha1.update(chunk);
        self.sha512.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Bytes seen so far.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn finish(self) -> Digests {
        Digests {
            shasum: hex::encode(self.sha1.finalize()),
            integrity: format!("sha512-{}", STANDARD.encode(self.sha512.finalize())),
            size: self.size,
        }
    }
}

/// Digest a complete byte slice.
#[must_use]
pub fn digest_bytes(data: &[u8]) -> Digests {
    let mut digest = TarballDigest::new();
    digest.update(data);
    digest.finish()
}

/// Check a computed digest against an SRI string such as `sha512-...`.
///
/// Multiple space-separated hashes are allowed; any match is accepted.
/// Algorithms other than sha512 and sha1 are ignored, and `None` is returned
/// when nothing comparable was present.
#[must_use]
pub fn integrity_matches(expected: &str, digests: &Digests) -> Option<bool> {
    let mut compared = false;
    for entry in expected.split_whitespace() {
        let Some((algo, _)) = entry.split_once('-') else {
            continue;
        };
        match algo {
            "sha512" => {
                compared = true;
                if entry == digests.integrity {
                    return Some(true);
                }
            }
            "sha1" => {
                compared = true;
                let b64 = STANDARD.encode(hex::decode(&digests.shasum).unwrap_or_default());
                if entry == format!("sha1-{b64}") {
                    return Some(true);
                }
            }
            _ => {}
        }
    }
    compared.then_some(false)
}
