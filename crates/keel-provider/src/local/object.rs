use keel_core::{ByteStream, ObjectInfo, ObjectStoreOptions};
use tracing::info;

use super::LocalProvider;
use crate::error::{ProviderError, ProviderResult};

impl LocalProvider {
    pub(super) async fn fetch_object(&self, app: &str, key: &str) -> ProviderResult<ByteStream> {
        self.require_app(app)?;
        match self.objects.fetch(app, key).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.is_not_found() => Err(ProviderError::not_found("object", key)),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn store_object(
        &self,
        app: &str,
        key: &str,
        reader: ByteStream,
        opts: ObjectStoreOptions,
    ) -> ProviderResult<ObjectInfo> {
        self.require_app(app)?;
        let info = self.objects.store(app, key, reader, &opts).await?;
        info!(%app, key = %info.key, size = info.size, "object stored");
        Ok(info)
    }

    pub(super) async fn object_present(&self, app: &str, key: &str) -> ProviderResult<bool> {
        self.require_app(app)?;
        Ok(self.objects.exists(app, key).await?)
    }

    pub(super) async fn delete_object(&self, app: &str, key: &str) -> ProviderResult<()> {
        self.require_app(app)?;
        match self.objects.delete(app, key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(ProviderError::not_found("object", key)),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn list_objects(
        &self,
        app: &str,
        prefix: &str,
    ) -> ProviderResult<Vec<String>> {
        self.require_app(app)?;
        Ok(self.objects.list(app, prefix).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::harness;
    use super::*;
    use crate::provider::Provider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn store_fetch_delete() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();

        let info = h
            .provider
            .object_store("web", "ctx/src.tgz", Box::new(&b"tarball"[..]), ObjectStoreOptions::default())
            .await
            .unwrap();
        assert_eq!(info.size, 7);
        assert_eq!(info.checksum.len(), 64);
        assert!(h.provider.object_exists("web", "ctx/src.tgz").await.unwrap());
        assert_eq!(h.provider.object_list("web", "ctx/").await.unwrap(), vec!["ctx/src.tgz"]);

        let mut reader = h.provider.object_fetch("web", "ctx/src.tgz").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"tarball");

        h.provider.object_delete("web", "ctx/src.tgz").await.unwrap();
        assert!(!h.provider.object_exists("web", "ctx/src.tgz").await.unwrap());
        assert!(h.provider.object_delete("web", "ctx/src.tgz").await.unwrap_err().is_not_found());
        assert!(h.provider.object_fetch("web", "ctx/src.tgz").await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn store_streams_from_a_pipe() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        let (reader, mut writer) = tokio::io::duplex(1024);
        let producer = tokio::spawn(async move {
            for _ in 0..64 {
                writer.write_all(&[7u8; 1024]).await.unwrap();
            }
        });

        let info = h
            .provider
            .object_store("web", "big", Box::new(reader), ObjectStoreOptions { public: true })
            .await
            .unwrap();
        producer.await.unwrap();

        assert_eq!(info.size, 64 * 1024);
        assert!(info.public);
    }

    #[tokio::test]
    async fn missing_app_is_not_found() {
        let h = harness();
        let err = h
            .provider
            .object_store("ghost", "k", Box::new(&b"x"[..]), ObjectStoreOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(h.provider.object_exists("ghost", "k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn traversal_keys_are_validation_errors() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        let err = h
            .provider
            .object_store("web", "../../etc/passwd", Box::new(&b"x"[..]), ObjectStoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
