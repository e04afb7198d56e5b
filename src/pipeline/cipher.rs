use aes::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use aes::Aes128;
use ctr::Ctr128BE;
use std::io::{self, Read, Seek, SeekFrom};
use symphonia::core::io::MediaSource;

type Aes128Ctr = Ctr128BE<Aes128>;

/// AES-128-CTR key material for protected album content
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CipherKey {
    key: [u8; 16],
    nonce: [u8; 8],
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

impl CipherKey {
    pub fn new(key: [u8; 16], nonce: [u8; 8]) -> Self {
        Self { key, nonce }
    }

    /// Counter block for the 16-byte block containing `byte_offset`
    fn iv_for_offset(&self, byte_offset: u64) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&self.nonce);
        iv[8..].copy_from_slice(&(byte_offset / 16).to_be_bytes());
        iv
    }

    /// XOR the keystream for `[byte_offset, byte_offset + data.len())` into `data`.
    /// Encryption and decryption are the same operation.
    pub fn apply_keystream_at(&self, data: &mut [u8], byte_offset: u64) {
        if data.is_empty() {
            return;
        }
        let iv = self.iv_for_offset(byte_offset);
        let mut cipher = Aes128Ctr::new(&self.key.into(), &iv.into());
        cipher.seek(byte_offset % 16);
        cipher.apply_keystream(data);
    }
}

/// Stream cipher filter: decrypts an encrypted byte source on the fly.
///
/// The keystream is derived from the absolute byte offset, so seeking is exact.
pub struct CipherReader<R> {
    inner: R,
    key: CipherKey,
    pos: u64,
    len: Option<u64>,
}

impl<R: Read + Seek> CipherReader<R> {
    pub fn new(mut inner: R, key: CipherKey) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            key,
            pos: 0,
            len: Some(len),
        })
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.key.apply_keystream_at(&mut buf[..n], self.pos);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for CipherReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = self.inner.seek(pos)?;
        Ok(self.pos)
    }
}

impl<R: Read + Seek + Send + Sync> MediaSource for CipherReader<R> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.len
    }
}
