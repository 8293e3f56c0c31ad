//! Backup encryption: scrypt key derivation, the artifact header, and the
//! chunked streaming AES-256-GCM cipher.
//!
//! The archive is encrypted in 64 KiB plaintext chunks. Each chunk is
//! sealed under a nonce derived from the random base nonce and the chunk
//! counter, with the counter and a final-chunk flag as associated data, so
//! chunks cannot be reordered, dropped, or truncated without failing
//! authentication. The final chunk's tag doubles as the whole-artifact tag
//! recorded in the header.

use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// First line of every backup artifact.
pub const BACKUP_MAGIC: &str = "FLATWIKI-BACKUP";

/// Plaintext bytes per encrypted chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Ceiling on scrypt working memory (128 * n * r bytes). Applies to both
/// configured parameters and parameters read back from artifact headers.
pub const MAX_KDF_MEMORY_BYTES: u64 = flatwiki_core::config::MAX_KDF_MEMORY_BYTES;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KdfParams {
    pub name: String,
    pub n: u32,
    pub r: u32,
    pub p: u32,
}

/// Single-line JSON metadata record following the magic line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupHeader {
    pub v: u32,
    pub alg: String,
    pub kdf: KdfParams,
    pub salt: String,
    pub iv: String,
    pub tag: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub source: String,
}

/// Derive the 32-byte archive key from the passphrase. CPU and memory heavy;
/// runs on the blocking pool.
pub async fn derive_key(
    passphrase: &str,
    salt: [u8; SALT_LEN],
    n: u32,
    r: u32,
    p: u32,
) -> Result<[u8; 32]> {
    if n < 2 || !n.is_power_of_two() {
        bail!("scrypt n must be a power of two >= 2 (got {})", n);
    }
    if r == 0 || p == 0 {
        bail!("scrypt r and p must be non-zero");
    }
    let memory = 128 * n as u64 * r as u64;
    if memory > MAX_KDF_MEMORY_BYTES {
        bail!(
            "scrypt parameters require {} bytes, exceeding the {} byte ceiling",
            memory,
            MAX_KDF_MEMORY_BYTES
        );
    }

    let passphrase = passphrase.to_owned();
    tokio::task::spawn_blocking(move || -> Result<[u8; 32]> {
        let log_n = n.trailing_zeros() as u8;
        let params = scrypt::Params::new(log_n, r, p, 32)
            .map_err(|e| anyhow!("invalid scrypt parameters: {}", e))?;
        let mut key = [0u8; 32];
        scrypt::scrypt(passphrase.as_bytes(), &salt, &params, &mut key)
            .map_err(|e| anyhow!("key derivation failed: {}", e))?;
        Ok(key)
    })
    .await
    .context("key derivation task failed")?
}

fn chunk_nonce(base: &[u8; NONCE_LEN], counter: u32) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    let bytes = counter.to_be_bytes();
    for i in 0..4 {
        nonce[NONCE_LEN - 4 + i] ^= bytes[i];
    }
    nonce
}

fn chunk_aad(counter: u64, last: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&counter.to_be_bytes());
    aad[8] = last as u8;
    aad
}

/// Fill `buf` from `reader`, returning how many bytes were read (short only
/// at end of stream).
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Stream-encrypt `reader` into `writer`, invoking `progress` with the
/// plaintext byte count processed so far. Returns the final chunk's tag.
pub async fn encrypt_stream<R, W>(
    key: &[u8; 32],
    base_nonce: &[u8; NONCE_LEN],
    reader: &mut R,
    writer: &mut W,
    mut progress: impl FnMut(u64),
) -> Result<[u8; TAG_LEN]>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut current = vec![0u8; CHUNK_SIZE];
    let mut next = vec![0u8; CHUNK_SIZE];
    let mut current_len = read_chunk(reader, &mut current).await?;

    let mut counter: u32 = 0;
    let mut plaintext_done: u64 = 0;
    let mut final_tag = [0u8; TAG_LEN];

    loop {
        // One chunk of lookahead decides whether this one is the last.
        let next_len = read_chunk(reader, &mut next).await?;
        let is_last = next_len == 0;

        let nonce = chunk_nonce(base_nonce, counter);
        let aad = chunk_aad(counter as u64, is_last);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &current[..current_len],
                    aad: &aad,
                },
            )
            .map_err(|_| anyhow!("chunk encryption failed"))?;

        final_tag.copy_from_slice(&sealed[sealed.len() - TAG_LEN..]);
        writer.write_all(&sealed).await?;

        plaintext_done += current_len as u64;
        progress(plaintext_done);

        if is_last {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        counter = counter
            .checked_add(1)
            .ok_or_else(|| anyhow!("archive exceeds maximum chunk count"))?;
    }

    writer.flush().await?;
    Ok(final_tag)
}

/// Stream-decrypt `reader` into `writer`, verifying every chunk tag and
/// that the final chunk's tag equals `expected_tag`. Returns the plaintext
/// byte count.
pub async fn decrypt_stream<R, W>(
    key: &[u8; 32],
    base_nonce: &[u8; NONCE_LEN],
    expected_tag: &[u8; TAG_LEN],
    reader: &mut R,
    writer: &mut W,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let sealed_chunk_len = CHUNK_SIZE + TAG_LEN;

    let mut current = vec![0u8; sealed_chunk_len];
    let mut next = vec![0u8; sealed_chunk_len];
    let mut current_len = read_chunk(reader, &mut current).await?;

    let mut counter: u32 = 0;
    let mut plaintext_done: u64 = 0;

    loop {
        let next_len = read_chunk(reader, &mut next).await?;
        let is_last = next_len == 0;

        if current_len < TAG_LEN {
            bail!("truncated backup ciphertext");
        }

        let nonce = chunk_nonce(base_nonce, counter);
        let aad = chunk_aad(counter as u64, is_last);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &current[..current_len],
                    aad: &aad,
                },
            )
            .map_err(|_| anyhow!("backup decryption failed: authentication error"))?;

        if is_last && &current[current_len - TAG_LEN..current_len] != expected_tag {
            bail!("backup decryption failed: final tag mismatch");
        }

        writer.write_all(&plaintext).await?;
        plaintext_done += plaintext.len() as u64;

        if is_last {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        counter = counter
            .checked_add(1)
            .ok_or_else(|| anyhow!("ciphertext exceeds maximum chunk count"))?;
    }

    writer.flush().await?;
    Ok(plaintext_done)
}

/// Read and parse the artifact header, leaving `reader` positioned at the
/// first ciphertext byte.
pub async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<BackupHeader> {
    let mut magic = Vec::new();
    reader.read_until(b'\n', &mut magic).await?;
    if magic.strip_suffix(b"\n") != Some(BACKUP_MAGIC.as_bytes()) {
        bail!("not a flatwiki backup artifact");
    }

    let mut meta = Vec::new();
    reader.read_until(b'\n', &mut meta).await?;
    let header: BackupHeader =
        serde_json::from_slice(&meta).context("invalid backup metadata header")?;

    if header.v != 1 {
        bail!("unsupported backup format version {}", header.v);
    }
    if header.alg != "aes-256-gcm" {
        bail!("unsupported backup algorithm {}", header.alg);
    }
    if header.kdf.name != "scrypt" {
        bail!("unsupported backup kdf {}", header.kdf.name);
    }
    Ok(header)
}

/// Parse a fixed-length base64 header field.
pub fn decode_field<const N: usize>(value: &str, field: &str) -> Result<[u8; N]> {
    use base64::{engine::general_purpose, Engine as _};
    let raw = general_purpose::STANDARD
        .decode(value)
        .with_context(|| format!("invalid base64 in header field {}", field))?;
    let arr: [u8; N] = raw
        .try_into()
        .map_err(|_| anyhow!("unexpected length for header field {}", field))?;
    Ok(arr)
}

/// Open an artifact and return its parsed header plus a reader positioned
/// at the ciphertext.
pub async fn open_artifact(path: &Path) -> Result<(BackupHeader, BufReader<fs::File>)> {
    let file = fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader).await?;
    Ok((header, reader))
}
