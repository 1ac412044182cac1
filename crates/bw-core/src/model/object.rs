//! Kind-erased objects and the typed [`Resource`] view over them

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::{Instance, PersistentVolumeClaim, Pod, Template};
use crate::types::{Kind, ObjectMeta};

/// Any object the store holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Object {
    Template(Template),
    Instance(Instance),
    Pod(Pod),
    PersistentVolumeClaim(PersistentVolumeClaim),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Template(_) => Kind::Template,
            Object::Instance(_) => Kind::Instance,
            Object::Pod(_) => Kind::Pod,
            Object::PersistentVolumeClaim(_) => Kind::PersistentVolumeClaim,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Object::Template(o) => &o.metadata,
            Object::Instance(o) => &o.metadata,
            Object::Pod(o) => &o.metadata,
            Object::PersistentVolumeClaim(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Object::Template(o) => &mut o.metadata,
            Object::Instance(o) => &mut o.metadata,
            Object::Pod(o) => &mut o.metadata,
            Object::PersistentVolumeClaim(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    /// Whether `other` carries a different spec. Objects of different
    /// kinds always differ.
    pub fn spec_differs(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Template(a), Object::Template(b)) => a.spec != b.spec,
            (Object::Instance(a), Object::Instance(b)) => a.spec != b.spec,
            (Object::Pod(a), Object::Pod(b)) => a.spec != b.spec,
            (Object::PersistentVolumeClaim(a), Object::PersistentVolumeClaim(b)) => {
                a.spec != b.spec
            }
            _ => true,
        }
    }

    /// Replace this object's status with the one `source` carries.
    /// Templates have no status.
    pub fn copy_status_from(&mut self, source: &Object) {
        match (self, source) {
            (Object::Instance(a), Object::Instance(b)) => a.status = b.status.clone(),
            (Object::Pod(a), Object::Pod(b)) => a.status = b.status.clone(),
            (Object::PersistentVolumeClaim(a), Object::PersistentVolumeClaim(b)) => {
                a.status = b.status.clone()
            }
            _ => {}
        }
    }

    /// Kind-specific checks on a new object
    pub fn validate(&self) -> Result<(), String> {
        if !crate::naming::is_dns_label(self.name()) {
            return Err(format!("'{}' is not a valid DNS-1123 label", self.name()));
        }
        match self {
            Object::Instance(inst) => inst.validate(),
            Object::Template(t) if t.spec.image.is_empty() => {
                Err("template image must be set".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Kind-specific checks on an update of `stored`
    pub fn validate_update(&self, stored: &Object) -> Result<(), String> {
        match (stored, self) {
            (Object::Instance(old), Object::Instance(new)) => old.validate_update(new),
            _ => Ok(()),
        }
    }
}

/// Typed access to one kind of object
pub trait Resource: Clone + Debug + Send + Sync + 'static {
    const KIND: Kind;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn into_object(self) -> Object;
    fn try_from_object(object: Object) -> Option<Self>;

    fn name(&self) -> &str {
        &self.meta().name
    }
}

impl Resource for Template {
    const KIND: Kind = Kind::Template;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn into_object(self) -> Object {
        Object::Template(self)
    }
    fn try_from_object(object: Object) -> Option<Self> {
        match object {
            Object::Template(t) => Some(t),
            _ => None,
        }
    }
}

impl Resource for Instance {
    const KIND: Kind = Kind::Instance;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn into_object(self) -> Object {
        Object::Instance(self)
    }
    fn try_from_object(object: Object) -> Option<Self> {
        match object {
            Object::Instance(i) => Some(i),
            _ => None,
        }
    }
}

impl Resource for Pod {
    const KIND: Kind = Kind::Pod;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn into_object(self) -> Object {
        Object::Pod(self)
    }
    fn try_from_object(object: Object) -> Option<Self> {
        match object {
            Object::Pod(p) => Some(p),
            _ => None,
        }
    }
}

impl Resource for PersistentVolumeClaim {
    const KIND: Kind = Kind::PersistentVolumeClaim;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn into_object(self) -> Object {
        Object::PersistentVolumeClaim(self)
    }
    fn try_from_object(object: Object) -> Option<Self> {
        match object {
            Object::PersistentVolumeClaim(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceSpec, Phase, TemplateSpec};

    #[test]
    fn test_spec_differs_ignores_status() {
        let a = Instance::new(
            "alice-web",
            InstanceSpec {
                owner: "alice".into(),
                template: Some("web".into()),
                ..Default::default()
            },
        );
        let mut b = a.clone();
        b.status.phase = Phase::Ready;

        let a = a.into_object();
        let b = b.into_object();
        assert!(!a.spec_differs(&b));

        let t = Template::new("web", TemplateSpec::default()).into_object();
        assert!(a.spec_differs(&t));
    }

    #[test]
    fn test_typed_roundtrip_through_object() {
        let t = Template::new("web", TemplateSpec::default());
        let obj = t.clone().into_object();
        assert_eq!(obj.kind(), Kind::Template);
        assert_eq!(Template::try_from_object(obj.clone()), Some(t));
        assert!(Instance::try_from_object(obj).is_none());
    }
}
