//! Stable identifiers used as keys across the flow manager, publisher, and
//! agent registries.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::error::{MongooseError, Result};

/// Unique, immutable name identifying an event source within a server
/// instance. Equality and hashing are structural over the underlying string.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SourceName(Arc<str>);

impl SourceName {
    pub fn new(name: impl Into<Arc<str>>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(MongooseError::NullArgument {
                what: "source name must not be empty",
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceName({})", self.0)
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag identifying a dispatch contract: either the generic "on-event" shape,
/// or a typed-interface capability identified by its `TypeId` and a stable
/// label used for logging and admin listings.
///
/// `event_type` pins the concrete payload type `T` this key was created for,
/// so a `(SourceName, CallbackType)` pair unambiguously determines the
/// generic parameter used on the `Publisher`/`Reader`/`InvocationStrategy`
/// triad behind it — the Rust equivalent of the Java original's runtime
/// `Object` erasure.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct CallbackType {
    kind: CallbackKind,
    event_type: TypeId,
    label: &'static str,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
enum CallbackKind {
    OnEvent,
    Typed(TypeId),
}

impl CallbackType {
    /// The generic, singleton `onEvent(Object)` dispatch contract for payload type `T`.
    pub fn on_event<T: 'static>() -> Self {
        Self {
            kind: CallbackKind::OnEvent,
            event_type: TypeId::of::<T>(),
            label: std::any::type_name::<T>(),
        }
    }

    /// A typed-interface dispatch contract: only processors implementing
    /// capability `C` over payload `T` are eligible.
    pub fn typed<C: 'static, T: 'static>() -> Self {
        Self {
            kind: CallbackKind::Typed(TypeId::of::<C>()),
            event_type: TypeId::of::<T>(),
            label: std::any::type_name::<C>(),
        }
    }

    pub fn event_type_id(&self) -> TypeId {
        self.event_type
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.kind, CallbackKind::OnEvent)
    }
}

impl fmt::Debug for CallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CallbackKind::OnEvent => write!(f, "CallbackType::OnEvent<{}>", self.label),
            CallbackKind::Typed(_) => write!(f, "CallbackType::Typed<{}>", self.label),
        }
    }
}

/// Primary key for per-queue invocation mapping: `(source, callback type)`.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SubscriptionKey {
    pub source_name: SourceName,
    pub callback_type: CallbackType,
}

impl SubscriptionKey {
    pub fn new(source_name: SourceName, callback_type: CallbackType) -> Self {
        Self {
            source_name,
            callback_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_name_rejects_empty() {
        assert!(SourceName::new("").is_err());
        assert!(SourceName::new("clicks").is_ok());
    }

    #[test]
    fn callback_type_equality_is_structural() {
        let a = CallbackType::on_event::<String>();
        let b = CallbackType::on_event::<String>();
        let c = CallbackType::on_event::<u32>();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn subscription_key_equality() {
        let src = SourceName::new("orders").unwrap();
        let k1 = SubscriptionKey::new(src.clone(), CallbackType::on_event::<String>());
        let k2 = SubscriptionKey::new(src, CallbackType::on_event::<String>());
        assert_eq!(k1, k2);
    }
}
