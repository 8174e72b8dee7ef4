//! Request signing for ACL-enabled clusters.

use super::protocol::RemotingCommand;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use shared_types::{MqError, MqResult};
use std::fmt;

type HmacSha1 = Hmac<Sha1>;

const ACCESS_KEY: &str = "AccessKey";
const SIGNATURE: &str = "Signature";

/// Signs every outgoing request with an access key / secret key pair.
#[derive(Clone)]
pub struct AclSigner {
    access_key: String,
    secret_key: String,
}

impl fmt::Debug for AclSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclSigner")
            .field("access_key", &self.access_key)
            .field("secret_key", &"****")
            .finish()
    }
}

impl AclSigner {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// base64(HMAC-SHA1(secret, ext-field values sorted by key ++ body)).
    pub fn signature(&self, cmd: &RemotingCommand) -> MqResult<String> {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| MqError::config("invalid ACL secret key").with_details(e.to_string()))?;
        for (key, value) in &cmd.header.ext_fields {
            if key != SIGNATURE {
                mac.update(value.as_bytes());
            }
        }
        if let Some(body) = &cmd.body {
            mac.update(body);
        }
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    pub fn sign(&self, cmd: &mut RemotingCommand) -> MqResult<()> {
        cmd.header.ext_fields.remove(SIGNATURE);
        cmd.header
            .ext_fields
            .insert(ACCESS_KEY.to_string(), self.access_key.clone());
        let signature = self.signature(cmd)?;
        cmd.header.ext_fields.insert(SIGNATURE.to_string(), signature);
        Ok(())
    }
}
