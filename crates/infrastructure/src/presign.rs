//! 上传 URL 签名器
//!
//! 自托管的预签名实现：HMAC-SHA256 对 (操作, key, 过期时间) 签名，
//! 拼出限时 URL。对象网关用同一份密钥校验后放行直传，字节流不经过
//! 本服务。

use async_trait::async_trait;
use data_encoding::HEXLOWER;
use domain::{ObjectStore, PresignOperation, PresignedUrl, StoreError, StoreResult};
use ring::hmac;
use time::OffsetDateTime;

/// HMAC 上传签名器
pub struct HmacPresigner {
    base_url: String,
    key: hmac::Key,
}

impl HmacPresigner {
    pub fn new(base_url: impl Into<String>, signing_secret: &str) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            key: hmac::Key::new(hmac::HMAC_SHA256, signing_secret.as_bytes()),
        }
    }

    fn operation_method(operation: PresignOperation) -> &'static str {
        match operation {
            PresignOperation::Put => "PUT",
            PresignOperation::Get => "GET",
        }
    }

    fn signature(&self, method: &str, key: &str, expires_unix: i64) -> String {
        let message = format!("{}\n{}\n{}", method, key, expires_unix);
        let tag = hmac::sign(&self.key, message.as_bytes());
        HEXLOWER.encode(tag.as_ref())
    }

    /// 校验一条签名 URL 的参数。对称校验，网关一侧使用。
    pub fn verify(
        &self,
        operation: PresignOperation,
        key: &str,
        expires_unix: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> bool {
        if expires_unix <= now.unix_timestamp() {
            return false;
        }
        let Ok(tag) = HEXLOWER.decode(signature.as_bytes()) else {
            return false;
        };
        let method = Self::operation_method(operation);
        let message = format!("{}\n{}\n{}", method, key, expires_unix);
        hmac::verify(&self.key, message.as_bytes(), &tag).is_ok()
    }
}

#[async_trait]
impl ObjectStore for HmacPresigner {
    async fn presign(
        &self,
        key: &str,
        operation: PresignOperation,
        ttl_seconds: u64,
    ) -> StoreResult<PresignedUrl> {
        if key.is_empty() || key.contains("..") {
            return Err(StoreError::storage("invalid object key"));
        }

        let expires_at = OffsetDateTime::now_utc() + time::Duration::seconds(ttl_seconds as i64);
        let expires_unix = expires_at.unix_timestamp();
        let method = Self::operation_method(operation);
        let signature = self.signature(method, key, expires_unix);

        Ok(PresignedUrl {
            url: format!(
                "{}/{}?op={}&exp={}&sig={}",
                self.base_url,
                key,
                method.to_ascii_lowercase(),
                expires_unix,
                signature
            ),
            key: key.to_string(),
            expires_at,
        })
    }
}
