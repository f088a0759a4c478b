// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! PGP signing of `Release` manifests.

Clients fetch the manifest as `Release` with a detached signature in
`Release.gpg`, or as `InRelease`, which is the manifest wrapped in a PGP
cleartext signature. [ManifestSigner] produces both from the exact manifest
bytes. [PgpSigner] implements it with an in-process secret key.
*/

use {
    crate::error::{RepositoryError, Result},
    chrono::SubsecRound,
    pgp::{
        crypto::{HashAlgorithm, SymmetricKeyAlgorithm},
        packet::{Packet, SignatureConfig, SignatureType, Subpacket},
        types::{CompressionAlgorithm, KeyVersion, SecretKeyTrait},
        Deserializable, KeyType, SecretKeyParamsBuilder, SignedSecretKey,
    },
    smallvec::{smallvec, SmallVec},
    std::io::Cursor,
};

const CLEARTEXT_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";

/// Produces signatures over manifest content.
pub trait ManifestSigner: Send + Sync {
    /// Produce an ASCII armored detached signature over `data`.
    fn sign_detached(&self, data: &[u8]) -> Result<String>;

    /// Produce a PGP cleartext signed document embedding `data`.
    fn sign_cleartext(&self, data: &[u8]) -> Result<String>;

    /// The ASCII armored public key clients verify signatures with.
    fn public_key_armored(&self) -> Result<String>;
}

/// Obtain a [SecretKeyParamsBuilder] defining how to generate a signing key.
///
/// The `primary_user_id` has a format like `Name <email>`. e.g. `John Smith <someone@example.com>`.
pub fn signing_secret_key_params_builder(primary_user_id: impl ToString) -> SecretKeyParamsBuilder {
    let mut key_params = SecretKeyParamsBuilder::default();
    key_params
        .key_type(KeyType::Rsa(2048))
        .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
        .preferred_hash_algorithms(smallvec![
            HashAlgorithm::SHA2_256,
            HashAlgorithm::SHA2_384,
            HashAlgorithm::SHA2_512
        ])
        .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
        .can_create_certificates(false)
        .can_sign(true)
        .primary_user_id(primary_user_id.to_string());

    key_params
}

fn signature_armored<PW>(
    key: &impl SecretKeyTrait,
    key_pw: PW,
    signature_type: SignatureType,
    data: &[u8],
) -> Result<String>
where
    PW: FnOnce() -> String,
{
    let hashed_subpackets = vec![
        Subpacket::IssuerFingerprint(KeyVersion::V4, SmallVec::from_slice(&key.fingerprint())),
        Subpacket::SignatureCreationTime(chrono::Utc::now().trunc_subsecs(0)),
    ];
    let unhashed_subpackets = vec![Subpacket::Issuer(key.key_id())];

    let config = SignatureConfig::new_v4(
        Default::default(),
        signature_type,
        key.algorithm(),
        HashAlgorithm::SHA2_256,
        hashed_subpackets,
        unhashed_subpackets,
    );

    let signature = config.sign(key, key_pw, Cursor::new(data))?;

    let mut writer = Cursor::new(Vec::<u8>::new());
    pgp::armor::write(
        &Packet::Signature(signature),
        pgp::armor::BlockType::Signature,
        &mut writer,
        None,
    )?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| RepositoryError::Signing(format!("armored signature is not UTF-8: {}", e)))
}

/// A [ManifestSigner] holding a PGP secret key.
pub struct PgpSigner {
    key: SignedSecretKey,
    passphrase: String,
}

impl PgpSigner {
    /// Construct an instance from a parsed key.
    pub fn new(key: SignedSecretKey, passphrase: impl ToString) -> Self {
        Self {
            key,
            passphrase: passphrase.to_string(),
        }
    }

    /// Construct an instance from an ASCII armored secret key.
    pub fn from_armored(armored: &str, passphrase: impl ToString) -> Result<Self> {
        let (key, _) = SignedSecretKey::from_armor_single(Cursor::new(armored.as_bytes()))?;

        Ok(Self::new(key, passphrase))
    }

    /// Generate a new self-signed RSA key with an empty passphrase.
    pub fn generate(primary_user_id: impl ToString) -> Result<Self> {
        let params = signing_secret_key_params_builder(primary_user_id)
            .build()
            .map_err(|e| RepositoryError::Signing(format!("invalid key parameters: {}", e)))?;

        let key = params.generate()?.sign(String::new)?;

        Ok(Self::new(key, ""))
    }

    /// The secret key, ASCII armored.
    pub fn to_armored(&self) -> Result<String> {
        Ok(self.key.to_armored_string(None)?)
    }

    fn passphrase(&self) -> impl FnOnce() -> String + Clone + '_ {
        move || self.passphrase.clone()
    }
}

impl ManifestSigner for PgpSigner {
    fn sign_detached(&self, data: &[u8]) -> Result<String> {
        signature_armored(&self.key, self.passphrase(), SignatureType::Binary, data)
    }

    fn sign_cleartext(&self, data: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(data)
            .map_err(|e| RepositoryError::Signing(format!("manifest is not UTF-8: {}", e)))?;

        // Trailing whitespace is not part of the signed text and lines beginning
        // with `-` or `From ` are dash-escaped.
        let mut dashed_lines = vec![];
        let mut source_lines = vec![];

        for line in text.lines() {
            let line = line.trim_end();

            dashed_lines.push(if line.starts_with('-') || line.starts_with("From ") {
                format!("- {}", line)
            } else {
                line.to_string()
            });
            source_lines.push(line);
        }

        let signed = source_lines.join("\r\n");
        let signature = signature_armored(
            &self.key,
            self.passphrase(),
            SignatureType::Text,
            signed.as_bytes(),
        )?;

        let lines = vec![
            CLEARTEXT_HEADER.to_string(),
            "Hash: SHA256".to_string(),
            String::new(),
        ]
        .into_iter()
        .chain(dashed_lines)
        .chain(std::iter::once(signature))
        .collect::<Vec<_>>();

        Ok(lines.join("\n"))
    }

    fn public_key_armored(&self) -> Result<String> {
        let public_key = self.key.public_key().sign(&self.key, self.passphrase())?;

        Ok(public_key.to_armored_string(None)?)
    }
}
