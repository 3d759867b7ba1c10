use aes::cipher::{
    block_padding::{NoPadding, Pkcs7},
    generic_array::GenericArray,
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use log::warn;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::{
    error::{PdfError, PdfResult},
    objects::{Dictionary, Object, Reference},
    resolve::Resolve,
};

mod rc4;

use rc4::Rc4;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// The password pad from the standard security handler.
const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    Rc4_40,
    Rc4_128,
    Aes128,
    Aes256,
}

impl EncryptionMode {
    fn is_aes(self) -> bool {
        matches!(self, EncryptionMode::Aes128 | EncryptionMode::Aes256)
    }
}

bitflags::bitflags! {
    /// User-access permissions carried in /P.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const PRINT = 1 << 2;
        const MODIFY = 1 << 3;
        const COPY = 1 << 4;
        const ANNOTATE = 1 << 5;
        const FILL_FORMS = 1 << 8;
        const EXTRACT_FOR_ACCESSIBILITY = 1 << 9;
        const ASSEMBLE = 1 << 10;
        const PRINT_HIGH_QUALITY = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

impl Permissions {
    /// The /P integer: granted bits plus the reserved bits that shall be 1.
    pub(crate) fn as_p(self) -> i32 {
        (self.bits() | 0xFFFF_F0C0) as i32
    }

    pub(crate) fn from_p(p: i32) -> Self {
        Self::from_bits_truncate(p as u32)
    }
}

/// The standard security handler: password validation, key derivation, and
/// string/stream encryption for RC4-40/128, AES-128, and AES-256.
#[derive(Debug)]
pub struct SecurityHandler {
    mode: EncryptionMode,
    revision: i64,
    /// File key length in bytes.
    length: usize,
    file_key: Vec<u8>,
    owner_value: Vec<u8>,
    user_value: Vec<u8>,
    /// /OE and /UE blobs, revision 6 only.
    owner_key_blob: Vec<u8>,
    user_key_blob: Vec<u8>,
    /// /Perms blob, revision 6 only.
    perms_blob: Vec<u8>,
    permissions: i32,
    encrypt_metadata: bool,
}

impl SecurityHandler {
    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_p(self.permissions)
    }

    /// Authenticate against an /Encrypt dictionary.
    ///
    /// Returns `Ok(None)` when the password is rejected, so the caller can
    /// ask its password provider again. Unsupported handlers are an error.
    pub(crate) fn from_dict(
        dict: &Dictionary,
        file_id: &[u8],
        password: &[u8],
        resolver: &mut dyn Resolve,
    ) -> PdfResult<Option<Self>> {
        let filter = dict.expect_name("Filter", resolver)?;

        if filter != "Standard" {
            anyhow::bail!(PdfError::Crypto(format!(
                "unsupported security handler /{}",
                filter
            )));
        }

        let v = dict.get_integer("V", resolver)?.unwrap_or(0);
        let revision = dict.expect_integer("R", resolver)?;
        let length_bits = dict.get_integer("Length", resolver)?.unwrap_or(40);
        let owner_value = dict
            .get_string("O", resolver)?
            .ok_or_else(|| PdfError::Crypto("missing /O entry".into()))?;
        let user_value = dict
            .get_string("U", resolver)?
            .ok_or_else(|| PdfError::Crypto("missing /U entry".into()))?;
        let permissions = dict.expect_integer("P", resolver)? as i32;
        let encrypt_metadata = dict.get_bool("EncryptMetadata", resolver)?.unwrap_or(true);

        let mode = match v {
            1 => EncryptionMode::Rc4_40,
            2 => {
                if length_bits <= 40 {
                    EncryptionMode::Rc4_40
                } else {
                    EncryptionMode::Rc4_128
                }
            }
            4 | 5 => {
                let stream_filter = dict
                    .get_name("StmF", resolver)?
                    .map(|name| name.as_str().to_owned())
                    .unwrap_or_else(|| "Identity".to_owned());
                let method = dict
                    .get_dict("CF", resolver)?
                    .and_then(|cf| cf.get(&stream_filter).cloned())
                    .map(|obj| -> PdfResult<Option<String>> {
                        let filter_dict = resolver.assert_dict(obj)?;
                        Ok(filter_dict
                            .get_name("CFM", resolver)?
                            .map(|name| name.as_str().to_owned()))
                    })
                    .transpose()?
                    .flatten();

                match (v, method.as_deref()) {
                    (4, Some("V2")) => EncryptionMode::Rc4_128,
                    (4, Some("AESV2")) => EncryptionMode::Aes128,
                    (5, Some("AESV3")) | (5, None) => EncryptionMode::Aes256,
                    (_, method) => {
                        anyhow::bail!(PdfError::Crypto(format!(
                            "unsupported crypt filter method {:?} for V {}",
                            method, v
                        )));
                    }
                }
            }
            v => {
                anyhow::bail!(PdfError::Crypto(format!("unsupported encryption V {}", v)));
            }
        };

        let length = match mode {
            EncryptionMode::Rc4_40 => 5,
            EncryptionMode::Rc4_128 => {
                let bytes = (length_bits / 8) as usize;

                if length_bits % 8 != 0 || !(5..=16).contains(&bytes) {
                    anyhow::bail!(PdfError::Crypto(format!(
                        "invalid key length {} bits",
                        length_bits
                    )));
                }

                bytes
            }
            EncryptionMode::Aes128 => 16,
            EncryptionMode::Aes256 => 32,
        };

        let mut handler = SecurityHandler {
            mode,
            revision,
            length,
            file_key: Vec::new(),
            owner_value,
            user_value,
            owner_key_blob: dict.get_string("OE", resolver)?.unwrap_or_default(),
            user_key_blob: dict.get_string("UE", resolver)?.unwrap_or_default(),
            perms_blob: dict.get_string("Perms", resolver)?.unwrap_or_default(),
            permissions,
            encrypt_metadata,
        };

        let authenticated = if revision >= 5 {
            handler.authenticate_revision_6(password)?
        } else {
            handler.authenticate_legacy(password, file_id)
        };

        Ok(authenticated.then_some(handler))
    }

    /// Build a handler for a document being written.
    pub(crate) fn for_write(
        mode: EncryptionMode,
        user_password: &str,
        owner_password: &str,
        permissions: Permissions,
        file_id: &[u8],
    ) -> PdfResult<Self> {
        let owner_password = if owner_password.is_empty() {
            user_password
        } else {
            owner_password
        };

        let (revision, length) = match mode {
            EncryptionMode::Rc4_40 => (2, 5),
            EncryptionMode::Rc4_128 => (3, 16),
            EncryptionMode::Aes128 => (4, 16),
            EncryptionMode::Aes256 => (6, 32),
        };

        let mut handler = SecurityHandler {
            mode,
            revision,
            length,
            file_key: Vec::new(),
            owner_value: Vec::new(),
            user_value: Vec::new(),
            owner_key_blob: Vec::new(),
            user_key_blob: Vec::new(),
            perms_blob: Vec::new(),
            permissions: permissions.as_p(),
            encrypt_metadata: true,
        };

        if revision >= 5 {
            handler.generate_revision_6(
                &sanitize_utf8_password(user_password),
                &sanitize_utf8_password(owner_password),
            )?;
        } else {
            handler.owner_value = compute_owner_value(
                owner_password.as_bytes(),
                user_password.as_bytes(),
                revision,
                length,
            );
            handler.file_key = compute_file_key(
                user_password.as_bytes(),
                &handler.owner_value,
                handler.permissions,
                file_id,
                revision,
                length,
                true,
            );
            handler.user_value = compute_user_value(&handler.file_key, file_id, revision);
        }

        Ok(handler)
    }

    /// The /Encrypt dictionary for this handler.
    pub(crate) fn encryption_dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();

        dict.insert("Filter", Object::name("Standard"));

        let v: i64 = match self.mode {
            EncryptionMode::Rc4_40 => 1,
            EncryptionMode::Rc4_128 => 2,
            EncryptionMode::Aes128 => 4,
            EncryptionMode::Aes256 => 5,
        };

        dict.insert("V", v);
        dict.insert("R", self.revision);
        dict.insert("Length", (self.length * 8) as i64);
        dict.insert("P", i64::from(self.permissions));

        if self.mode.is_aes() {
            let mut std_cf = Dictionary::new();
            std_cf.insert("Type", Object::name("CryptFilter"));
            std_cf.insert(
                "CFM",
                Object::name(if self.mode == EncryptionMode::Aes256 {
                    "AESV3"
                } else {
                    "AESV2"
                }),
            );
            std_cf.insert("AuthEvent", Object::name("DocOpen"));
            std_cf.insert("Length", self.length as i64);

            let mut cf = Dictionary::new();
            cf.insert("StdCF", Object::Dictionary(std_cf));

            dict.insert("CF", Object::Dictionary(cf));
            dict.insert("StmF", Object::name("StdCF"));
            dict.insert("StrF", Object::name("StdCF"));
        }

        dict.insert("O", Object::Binary(self.owner_value.clone()));
        dict.insert("U", Object::Binary(self.user_value.clone()));

        if self.revision >= 5 {
            dict.insert("OE", Object::Binary(self.owner_key_blob.clone()));
            dict.insert("UE", Object::Binary(self.user_key_blob.clone()));
            dict.insert("Perms", Object::Binary(self.perms_blob.clone()));
        }

        dict
    }

    /// Per-object key derivation. AES-256 uses the file key directly;
    /// every other mode mixes in the object number and generation.
    fn object_key(&self, reference: Reference) -> Vec<u8> {
        if self.mode == EncryptionMode::Aes256 {
            return self.file_key.clone();
        }

        let mut hash = md5::Context::new();
        hash.consume(&self.file_key);
        hash.consume(&reference.number.to_le_bytes()[..3]);
        hash.consume(&reference.generation.to_le_bytes()[..2]);

        if self.mode.is_aes() {
            hash.consume(b"sAlT");
        }

        let digest = hash.compute();
        let key_len = (self.length + 5).min(16);

        digest[..key_len].to_vec()
    }

    pub(crate) fn decrypt(&self, data: &[u8], reference: Reference) -> PdfResult<Vec<u8>> {
        let key = self.object_key(reference);

        if !self.mode.is_aes() {
            return Ok(Rc4::apply(&key, data));
        }

        if data.len() < 16 || data.len() % 16 != 0 {
            anyhow::bail!(PdfError::Crypto(format!(
                "AES data of {} bytes is not an IV plus whole blocks",
                data.len()
            )));
        }

        let (iv, ciphertext) = data.split_at(16);

        aes_cbc_decrypt_padded(&key, iv, ciphertext)
    }

    pub(crate) fn encrypt(&self, data: &[u8], reference: Reference) -> PdfResult<Vec<u8>> {
        let key = self.object_key(reference);

        if !self.mode.is_aes() {
            return Ok(Rc4::apply(&key, data));
        }

        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut out = iv.to_vec();
        out.extend_from_slice(&aes_cbc_encrypt_padded(&key, &iv, data)?);

        Ok(out)
    }

    fn authenticate_legacy(&mut self, password: &[u8], file_id: &[u8]) -> bool {
        if let Some(key) = self.check_user_password(password, file_id) {
            self.file_key = key;
            return true;
        }

        // try the password as the owner password: recover the padded user
        // password from /O and re-run the user check with it
        let digest = owner_rc4_key(password, self.revision, self.length);
        let mut user_password = self.owner_value.clone();

        if self.revision == 2 {
            Rc4::apply_in_place(&digest, &mut user_password);
        } else {
            for i in (0..=19u8).rev() {
                let key: Vec<u8> = digest.iter().map(|b| b ^ i).collect();
                Rc4::apply_in_place(&key, &mut user_password);
            }
        }

        if let Some(key) = self.check_user_password(&user_password, file_id) {
            self.file_key = key;
            return true;
        }

        false
    }

    fn check_user_password(&self, password: &[u8], file_id: &[u8]) -> Option<Vec<u8>> {
        let key = compute_file_key(
            password,
            &self.owner_value,
            self.permissions,
            file_id,
            self.revision,
            self.length,
            self.encrypt_metadata,
        );
        let expected = compute_user_value(&key, file_id, self.revision);

        let matches = if self.revision == 2 {
            expected == self.user_value
        } else {
            self.user_value.len() >= 16 && expected[..16] == self.user_value[..16]
        };

        matches.then_some(key)
    }

    fn authenticate_revision_6(&mut self, password: &[u8]) -> PdfResult<bool> {
        if self.user_value.len() < 48 || self.owner_value.len() < 48 {
            anyhow::bail!(PdfError::Crypto(
                "/U and /O must be 48 bytes for revision 6".into()
            ));
        }

        if self.user_key_blob.len() != 32 || self.owner_key_blob.len() != 32 {
            anyhow::bail!(PdfError::Crypto(
                "/UE and /OE must be 32 bytes for revision 6".into()
            ));
        }

        let password = &password[..password.len().min(127)];

        // user password
        let hash = self.revision_hash(password, &self.user_value[32..40], b"")?;
        if hash == self.user_value[..32] {
            let ikey = self.revision_hash(password, &self.user_value[40..48], b"")?;
            self.file_key = aes_cbc_nopad_decrypt(&ikey, &[0u8; 16], &self.user_key_blob)?;
            self.verify_perms_blob();
            return Ok(true);
        }

        // owner password; the hash salts in /O run over the full /U entry
        let udata = self.user_value[..48].to_vec();
        let hash = self.revision_hash(password, &self.owner_value[32..40], &udata)?;
        if hash == self.owner_value[..32] {
            let ikey = self.revision_hash(password, &self.owner_value[40..48], &udata)?;
            self.file_key = aes_cbc_nopad_decrypt(&ikey, &[0u8; 16], &self.owner_key_blob)?;
            self.verify_perms_blob();
            return Ok(true);
        }

        Ok(false)
    }

    fn revision_hash(&self, password: &[u8], salt: &[u8], udata: &[u8]) -> PdfResult<Vec<u8>> {
        if self.revision == 5 {
            let mut hasher = Sha256::new();
            hasher.update(password);
            hasher.update(salt);
            hasher.update(udata);

            return Ok(hasher.finalize().to_vec());
        }

        revision_6_hash(password, salt, udata)
    }

    fn verify_perms_blob(&self) {
        if self.perms_blob.len() != 16 {
            warn!("missing or malformed /Perms entry");
            return;
        }

        let cipher = match aes::Aes256::new_from_slice(&self.file_key) {
            Ok(cipher) => cipher,
            Err(..) => return,
        };

        let mut block = GenericArray::clone_from_slice(&self.perms_blob);
        cipher.decrypt_block(&mut block);

        if &block[9..12] != b"adb" {
            warn!("/Perms entry failed validation");
        }
    }

    fn generate_revision_6(&mut self, user_password: &[u8], owner_password: &[u8]) -> PdfResult<()> {
        let mut rng = rand::thread_rng();

        let mut file_key = vec![0u8; 32];
        rng.fill_bytes(&mut file_key);
        self.file_key = file_key;

        // /U and /UE
        let mut salts = [0u8; 16];
        rng.fill_bytes(&mut salts);

        let mut user_value = revision_6_hash(user_password, &salts[..8], b"")?;
        user_value.extend_from_slice(&salts);
        let ikey = revision_6_hash(user_password, &salts[8..16], b"")?;
        self.user_key_blob = aes_cbc_nopad_encrypt(&ikey, &[0u8; 16], &self.file_key)?;
        self.user_value = user_value;

        // /O and /OE, salted over the finished /U entry
        let mut salts = [0u8; 16];
        rng.fill_bytes(&mut salts);

        let udata = self.user_value.clone();
        let mut owner_value = revision_6_hash(owner_password, &salts[..8], &udata)?;
        owner_value.extend_from_slice(&salts);
        let ikey = revision_6_hash(owner_password, &salts[8..16], &udata)?;
        self.owner_key_blob = aes_cbc_nopad_encrypt(&ikey, &[0u8; 16], &self.file_key)?;
        self.owner_value = owner_value;

        // /Perms
        let mut perms = [0u8; 16];
        perms[..4].copy_from_slice(&self.permissions.to_le_bytes());
        perms[4..8].copy_from_slice(&[0xFF; 4]);
        perms[8] = b'T';
        perms[9..12].copy_from_slice(b"adb");
        rng.fill_bytes(&mut perms[12..16]);

        let cipher = aes::Aes256::new_from_slice(&self.file_key)
            .map_err(|_| PdfError::Crypto("invalid AES-256 key length".into()))?;
        let mut block = GenericArray::clone_from_slice(&perms);
        cipher.encrypt_block(&mut block);
        self.perms_blob = block.to_vec();

        Ok(())
    }
}

/// Pad or truncate a password to exactly 32 bytes.
fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);

    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);

    padded
}

fn sanitize_utf8_password(password: &str) -> Vec<u8> {
    let bytes = password.as_bytes();

    bytes[..bytes.len().min(127)].to_vec()
}

/// File-key derivation for revisions 2 to 4.
fn compute_file_key(
    password: &[u8],
    owner_value: &[u8],
    permissions: i32,
    file_id: &[u8],
    revision: i64,
    length: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut hash = md5::Context::new();
    hash.consume(pad_password(password));
    hash.consume(owner_value);
    hash.consume(permissions.to_le_bytes());
    hash.consume(file_id);

    if revision >= 4 && !encrypt_metadata {
        hash.consume([0xFF, 0xFF, 0xFF, 0xFF]);
    }

    let mut digest = hash.compute();

    if revision >= 3 {
        for _ in 0..50 {
            digest = md5::compute(&digest[..length]);
        }
    }

    digest[..length].to_vec()
}

/// The RC4 key that wraps /O, derived from the owner password.
fn owner_rc4_key(owner_password: &[u8], revision: i64, length: usize) -> Vec<u8> {
    let mut digest = md5::compute(pad_password(owner_password));

    if revision >= 3 {
        for _ in 0..50 {
            digest = md5::compute(&digest[..]);
        }
    }

    digest[..length].to_vec()
}

/// The /O entry.
fn compute_owner_value(
    owner_password: &[u8],
    user_password: &[u8],
    revision: i64,
    length: usize,
) -> Vec<u8> {
    let rc4_key = owner_rc4_key(owner_password, revision, length);
    let mut owner_value = pad_password(user_password).to_vec();

    Rc4::apply_in_place(&rc4_key, &mut owner_value);

    if revision >= 3 {
        for i in 1..=19u8 {
            let key: Vec<u8> = rc4_key.iter().map(|b| b ^ i).collect();
            Rc4::apply_in_place(&key, &mut owner_value);
        }
    }

    owner_value
}

/// The /U entry.
fn compute_user_value(file_key: &[u8], file_id: &[u8], revision: i64) -> Vec<u8> {
    if revision == 2 {
        let mut user_value = PADDING.to_vec();
        Rc4::apply_in_place(file_key, &mut user_value);
        return user_value;
    }

    let mut hash = md5::Context::new();
    hash.consume(PADDING);
    hash.consume(file_id);

    let mut user_value = hash.compute().to_vec();
    Rc4::apply_in_place(file_key, &mut user_value);

    for i in 1..=19u8 {
        let key: Vec<u8> = file_key.iter().map(|b| b ^ i).collect();
        Rc4::apply_in_place(&key, &mut user_value);
    }

    // 16 hash bytes plus 16 bytes of arbitrary padding
    user_value.extend_from_slice(&PADDING[..16]);
    user_value
}

/// The iterated hash from the revision 6 handler.
fn revision_6_hash(password: &[u8], salt: &[u8], udata: &[u8]) -> PdfResult<Vec<u8>> {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.update(udata);

    let mut key = hasher.finalize().to_vec();
    let mut round = 0usize;

    loop {
        let mut block = Vec::with_capacity(64 * (password.len() + key.len() + udata.len()));
        for _ in 0..64 {
            block.extend_from_slice(password);
            block.extend_from_slice(&key);
            block.extend_from_slice(udata);
        }

        let encrypted = aes_cbc_nopad_encrypt(&key[..16], key[16..32].try_into()?, &block)?;

        let selector: u32 = encrypted[..16].iter().map(|&b| u32::from(b)).sum();
        key = match selector % 3 {
            0 => Sha256::digest(&encrypted).to_vec(),
            1 => Sha384::digest(&encrypted).to_vec(),
            _ => Sha512::digest(&encrypted).to_vec(),
        };

        round += 1;

        if round >= 64 && usize::from(*encrypted.last().unwrap_or(&0)) <= round - 32 {
            break;
        }
    }

    Ok(key[..32].to_vec())
}

fn aes_cbc_encrypt_padded(key: &[u8], iv: &[u8; 16], plain: &[u8]) -> PdfResult<Vec<u8>> {
    let msg_len = plain.len();
    let mut buffer = vec![0u8; msg_len + 16];
    buffer[..msg_len].copy_from_slice(plain);

    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| PdfError::Crypto("invalid AES key length".into()))?
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, msg_len),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| PdfError::Crypto("invalid AES key length".into()))?
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, msg_len),
        len => anyhow::bail!(PdfError::Crypto(format!("invalid AES key length {}", len))),
    }
    .map_err(|_| PdfError::Crypto("AES encryption failed".into()))?;

    Ok(ciphertext.to_vec())
}

fn aes_cbc_decrypt_padded(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> PdfResult<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();

    let plain = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| PdfError::Crypto("invalid AES key length".into()))?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| PdfError::Crypto("invalid AES key length".into()))?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer),
        len => anyhow::bail!(PdfError::Crypto(format!("invalid AES key length {}", len))),
    }
    .map_err(|_| PdfError::Crypto("bad padding in AES data".into()))?;

    Ok(plain.to_vec())
}

fn aes_cbc_nopad_encrypt(key: &[u8], iv: &[u8; 16], plain: &[u8]) -> PdfResult<Vec<u8>> {
    let mut buffer = plain.to_vec();

    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| PdfError::Crypto("invalid AES key length".into()))?
            .encrypt_padded_mut::<NoPadding>(&mut buffer, plain.len()),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| PdfError::Crypto("invalid AES key length".into()))?
            .encrypt_padded_mut::<NoPadding>(&mut buffer, plain.len()),
        len => anyhow::bail!(PdfError::Crypto(format!("invalid AES key length {}", len))),
    }
    .map_err(|_| PdfError::Crypto("AES encryption failed".into()))?;

    Ok(ciphertext.to_vec())
}

fn aes_cbc_nopad_decrypt(key: &[u8], iv: &[u8; 16], ciphertext: &[u8]) -> PdfResult<Vec<u8>> {
    if ciphertext.len() % 16 != 0 {
        anyhow::bail!(PdfError::Crypto(
            "AES data is not a whole number of blocks".into()
        ));
    }

    let mut buffer = ciphertext.to_vec();

    let plain = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| PdfError::Crypto("invalid AES key length".into()))?
            .decrypt_padded_mut::<NoPadding>(&mut buffer),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| PdfError::Crypto("invalid AES key length".into()))?
            .decrypt_padded_mut::<NoPadding>(&mut buffer),
        len => anyhow::bail!(PdfError::Crypto(format!("invalid AES key length {}", len))),
    }
    .map_err(|_| PdfError::Crypto("AES decryption failed".into()))?;

    Ok(plain.to_vec())
}

#[cfg(test)]
mod test {
    use super::*;

    const FILE_ID: &[u8] = b"\xDE\xAD\xBE\xEF\x00\x11\x22\x33\x44\x55\x66\x77\x88\x99\xAA\xBB";

    fn handler_for(mode: EncryptionMode) -> SecurityHandler {
        SecurityHandler::for_write(mode, "user pw", "owner pw", Permissions::default(), FILE_ID)
            .unwrap()
    }

    #[test]
    fn encrypt_decrypt_identity_all_modes() {
        let reference = Reference::new(7, 0);
        let data = b"string contents with \x00 binary \xFF bytes".to_vec();

        for mode in [
            EncryptionMode::Rc4_40,
            EncryptionMode::Rc4_128,
            EncryptionMode::Aes128,
            EncryptionMode::Aes256,
        ] {
            let handler = handler_for(mode);
            let encrypted = handler.encrypt(&data, reference).unwrap();

            assert_ne!(encrypted, data, "{:?} left plaintext visible", mode);
            assert_eq!(
                handler.decrypt(&encrypted, reference).unwrap(),
                data,
                "{:?} did not round trip",
                mode
            );
        }
    }

    #[test]
    fn aes_ivs_are_fresh_per_call() {
        let handler = handler_for(EncryptionMode::Aes128);
        let reference = Reference::new(3, 0);

        let first = handler.encrypt(b"same bytes", reference).unwrap();
        let second = handler.encrypt(b"same bytes", reference).unwrap();

        assert_ne!(first[..16], second[..16]);
        assert_ne!(first, second);
    }

    #[test]
    fn rc4_objects_get_distinct_keys() {
        let handler = handler_for(EncryptionMode::Rc4_128);

        let a = handler.encrypt(b"same bytes", Reference::new(1, 0)).unwrap();
        let b = handler.encrypt(b"same bytes", Reference::new(2, 0)).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn legacy_round_trip_through_dict() {
        for mode in [
            EncryptionMode::Rc4_40,
            EncryptionMode::Rc4_128,
            EncryptionMode::Aes128,
        ] {
            let written = handler_for(mode);
            let dict = written.encryption_dict();

            // correct user password
            let reopened = SecurityHandler::from_dict(
                &dict,
                FILE_ID,
                b"user pw",
                &mut crate::resolve::NoResolve,
            )
            .unwrap()
            .expect("user password rejected");
            assert_eq!(reopened.file_key, written.file_key);

            // correct owner password
            let via_owner = SecurityHandler::from_dict(
                &dict,
                FILE_ID,
                b"owner pw",
                &mut crate::resolve::NoResolve,
            )
            .unwrap()
            .expect("owner password rejected");
            assert_eq!(via_owner.file_key, written.file_key);

            // wrong password
            assert!(SecurityHandler::from_dict(
                &dict,
                FILE_ID,
                b"wrong",
                &mut crate::resolve::NoResolve,
            )
            .unwrap()
            .is_none());
        }
    }

    #[test]
    fn revision_6_round_trip_through_dict() {
        let written = handler_for(EncryptionMode::Aes256);
        let dict = written.encryption_dict();

        let reopened =
            SecurityHandler::from_dict(&dict, FILE_ID, b"user pw", &mut crate::resolve::NoResolve)
                .unwrap()
                .expect("user password rejected");
        assert_eq!(reopened.file_key, written.file_key);

        let via_owner =
            SecurityHandler::from_dict(&dict, FILE_ID, b"owner pw", &mut crate::resolve::NoResolve)
                .unwrap()
                .expect("owner password rejected");
        assert_eq!(via_owner.file_key, written.file_key);

        assert!(
            SecurityHandler::from_dict(&dict, FILE_ID, b"wrong", &mut crate::resolve::NoResolve)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn permissions_p_value() {
        let p = Permissions::PRINT.union(Permissions::COPY).as_p();

        assert!(p < 0, "reserved high bits must be set");
        assert_eq!(p & 0b100, 0b100);
        assert_eq!(p & 0b1000, 0);
    }
}
