//! Typed access to one resource kind

use std::marker::PhantomData;
use std::sync::Arc;

use bw_core::traits::{DeleteOutcome, Preconditions, ResourceStore};
use bw_core::{LabelSelector, Object, Resource, StoreError};

use crate::retry::retry_on_conflict;

/// Typed handle over a [`ResourceStore`] for objects of kind `K`
pub struct Api<K> {
    store: Arc<dyn ResourceStore>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Api<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _kind: PhantomData,
        }
    }
}

fn downcast<K: Resource>(object: Object) -> Result<K, StoreError> {
    let (kind, name) = (object.kind(), object.name().to_string());
    K::try_from_object(object).ok_or_else(|| {
        StoreError::Internal(format!(
            "expected {} but store returned {} {}",
            K::KIND,
            kind,
            name
        ))
    })
}

impl<K: Resource> Api<K> {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub async fn get(&self, name: &str) -> Result<K, StoreError> {
        downcast(self.store.get(K::KIND, name).await?)
    }

    /// Like [`Api::get`], with absence as `None`
    pub async fn get_opt(&self, name: &str) -> Result<Option<K>, StoreError> {
        match self.get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, selector: Option<&LabelSelector>) -> Result<Vec<K>, StoreError> {
        self.store
            .list(K::KIND, selector)
            .await?
            .items
            .into_iter()
            .map(downcast)
            .collect()
    }

    pub async fn create(&self, object: K) -> Result<K, StoreError> {
        downcast(self.store.create(object.into_object()).await?)
    }

    /// Version-checked replace of metadata and spec
    pub async fn replace(&self, object: K) -> Result<K, StoreError> {
        downcast(self.store.update(object.into_object()).await?)
    }

    /// Version-checked replace of status
    pub async fn replace_status(&self, object: K) -> Result<K, StoreError> {
        downcast(self.store.update_status(object.into_object()).await?)
    }

    pub async fn delete(&self, name: &str) -> Result<DeleteOutcome, StoreError> {
        self.store
            .delete(K::KIND, name, Preconditions::default())
            .await
    }

    /// Delete only if the object is still at `resource_version`
    pub async fn delete_at_version(
        &self,
        name: &str,
        resource_version: u64,
    ) -> Result<DeleteOutcome, StoreError> {
        self.store
            .delete(
                K::KIND,
                name,
                Preconditions {
                    resource_version: Some(resource_version),
                },
            )
            .await
    }

    /// Read-modify-write of metadata and spec. `mutate` returns whether it
    /// changed anything; nothing is written when it did not.
    pub async fn patch<F>(&self, name: &str, mutate: F) -> Result<K, StoreError>
    where
        F: Fn(&mut K) -> bool + Sync,
    {
        let mutate = &mutate;
        retry_on_conflict(move || {
            let current = self.get(name);
            async move {
                let mut object = current.await?;
                if !mutate(&mut object) {
                    return Ok(object);
                }
                self.replace(object).await
            }
        })
        .await
    }

    /// Read-modify-write of status, with the same contract as [`Api::patch`]
    pub async fn patch_status<F>(&self, name: &str, mutate: F) -> Result<K, StoreError>
    where
        F: Fn(&mut K) -> bool + Sync,
    {
        let mutate = &mutate;
        retry_on_conflict(move || {
            let current = self.get(name);
            async move {
                let mut object = current.await?;
                if !mutate(&mut object) {
                    return Ok(object);
                }
                self.replace_status(object).await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use bw_core::{Instance, InstanceSpec, Phase, Template, TemplateSpec};

    fn store() -> Arc<dyn ResourceStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_typed_create_get() {
        let api: Api<Template> = Api::new(store());
        api.create(Template::new(
            "web",
            TemplateSpec {
                image: "alpine".into(),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

        assert_eq!(api.get("web").await.unwrap().spec.image, "alpine");
        assert!(api.get_opt("nope").await.unwrap().is_none());
        assert_eq!(api.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_patch_status_survives_concurrent_writers() {
        let store = store();
        let api: Api<Instance> = Api::new(store.clone());
        api.create(Instance::new(
            "alice-web",
            InstanceSpec {
                owner: "alice".into(),
                template: Some("web".into()),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

        let mut tasks = Vec::new();
        for i in 0..8u64 {
            let api = api.clone();
            tasks.push(tokio::spawn(async move {
                api.patch_status("alice-web", |inst| {
                    let next = inst.status.last_active.unwrap_or(0).max(i + 1);
                    inst.status.last_active = Some(next);
                    true
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let inst = api.get("alice-web").await.unwrap();
        assert_eq!(inst.status.last_active, Some(8));
        assert_eq!(inst.status.phase, Phase::Pending);
    }

    #[tokio::test]
    async fn test_patch_without_change_does_not_write() {
        let store = Arc::new(MemoryStore::new());
        let api: Api<Template> = Api::new(store.clone());
        api.create(Template::new(
            "web",
            TemplateSpec {
                image: "alpine".into(),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

        api.patch("web", |_| false).await.unwrap();
        assert_eq!(store.stats().updates, 0);
    }
}
