//! Per-batch attribute bindings
//!
//! A batch defines its GPU state through one binding per attribute kind.
//! Components that are mutated often are bound by reference (`LiveRef`) and
//! compared by identity; everything else is cloned once (`Snapshot`) and
//! compared by value. All identity-versus-value decisions go through
//! [`AttributeSet::compare`].

use super::{AttributeKind, AttributeStore, AttributeValue, DirtyAttrs};
use crate::foundation::collections::{AppearanceHandle, AttributeHandle};

/// How one attribute kind of a batch is defined
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeBinding {
    /// Direct reference to a frequently mutated live component
    LiveRef {
        /// Referenced component
        handle: AttributeHandle,
        /// Component version the batch last loaded
        seen_version: u64,
    },
    /// Isolated clone of a stable component
    Snapshot(AttributeValue),
}

/// Outcome of comparing a binding against a candidate component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMatch {
    /// Equivalent and current
    Equal,
    /// Same live component, but it changed since the batch loaded it
    Stale,
    /// Not equivalent
    Mismatch,
}

/// Whether a batch owns its appearance exclusively
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Atoms from any appearance with equivalent attributes may join
    Shared,
    /// Sole user of one mutated-often appearance
    Exclusive(AppearanceHandle),
}

impl Sharing {
    /// Pick the sharing mode for a batch created from `appearance`
    pub fn decide(store: &AttributeStore, appearance: Option<AppearanceHandle>) -> Self {
        match appearance {
            Some(app) if !store.frequent_mask(Some(app)).is_empty() => Sharing::Exclusive(app),
            _ => Sharing::Shared,
        }
    }

    /// Whether this batch is the sole user of a live appearance
    pub fn is_sole_user(&self) -> bool {
        matches!(self, Sharing::Exclusive(_))
    }

    /// Appearance owned by a sole-user batch
    pub fn app_handle(&self) -> Option<AppearanceHandle> {
        match self {
            Sharing::Exclusive(app) => Some(*app),
            Sharing::Shared => None,
        }
    }
}

/// Bindings of all six attribute kinds of one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    bindings: [Option<AttributeBinding>; 6],
}

impl AttributeSet {
    /// Capture the current components of `appearance`
    ///
    /// Frequently mutated components are referenced, stable ones cloned.
    pub fn capture(store: &AttributeStore, appearance: Option<AppearanceHandle>) -> Self {
        let mut set = Self::default();
        for kind in AttributeKind::ALL {
            set.bindings[kind.index()] = Self::bind(store, store.component_of(appearance, kind));
        }
        set
    }

    fn bind(store: &AttributeStore, component: Option<AttributeHandle>) -> Option<AttributeBinding> {
        let handle = component?;
        let live = store.attribute(handle)?;
        Some(if live.changed_frequent() {
            AttributeBinding::LiveRef { handle, seen_version: live.version() }
        } else {
            AttributeBinding::Snapshot(live.value().clone())
        })
    }

    /// Binding of one kind
    pub fn binding(&self, kind: AttributeKind) -> Option<&AttributeBinding> {
        self.bindings[kind.index()].as_ref()
    }

    /// Compare the binding of `kind` against a candidate live component
    pub fn compare(&self, kind: AttributeKind, store: &AttributeStore, candidate: Option<AttributeHandle>) -> BindingMatch {
        match (self.binding(kind), candidate) {
            (None, None) => BindingMatch::Equal,
            (None, Some(_)) | (Some(_), None) => BindingMatch::Mismatch,
            (Some(AttributeBinding::LiveRef { handle, seen_version }), Some(candidate)) => {
                if *handle != candidate {
                    return BindingMatch::Mismatch;
                }
                match store.attribute(candidate) {
                    Some(live) if live.version() == *seen_version => BindingMatch::Equal,
                    Some(_) => BindingMatch::Stale,
                    None => BindingMatch::Mismatch,
                }
            }
            (Some(AttributeBinding::Snapshot(value)), Some(candidate)) => match store.attribute(candidate) {
                Some(live) if !live.changed_frequent() && live.value() == value => BindingMatch::Equal,
                _ => BindingMatch::Mismatch,
            },
        }
    }

    /// Kinds whose binding no longer reflects what `appearance` holds
    ///
    /// Used for sole-user batches, where every atom shares `appearance` and
    /// any divergence is a deferred edit rather than a structural mismatch.
    pub fn staleness(&self, store: &AttributeStore, appearance: Option<AppearanceHandle>) -> DirtyAttrs {
        AttributeKind::ALL
            .into_iter()
            .filter(|kind| self.compare(*kind, store, store.component_of(appearance, *kind)) != BindingMatch::Equal)
            .fold(DirtyAttrs::empty(), |mask, kind| mask | kind.flag())
    }

    /// Current value of `kind`, following live references
    pub fn resolve<'a>(&'a self, kind: AttributeKind, store: &'a AttributeStore) -> Option<&'a AttributeValue> {
        match self.binding(kind)? {
            AttributeBinding::LiveRef { handle, .. } => store.attribute(*handle).map(|live| live.value()),
            AttributeBinding::Snapshot(value) => Some(value),
        }
    }

    /// Re-capture from `appearance`, returning the kinds whose value changed
    pub fn refresh(&mut self, store: &AttributeStore, appearance: Option<AppearanceHandle>) -> DirtyAttrs {
        let changed = self.staleness(store, appearance);
        *self = Self::capture(store, appearance);
        changed
    }

    /// Kinds whose current values differ between two sets
    pub fn differences(&self, other: &AttributeSet, store: &AttributeStore) -> DirtyAttrs {
        AttributeKind::ALL
            .into_iter()
            .filter(|kind| self.resolve(*kind, store) != other.resolve(*kind, store))
            .fold(DirtyAttrs::empty(), |mask, kind| mask | kind.flag())
    }

    /// Replace every live reference with a snapshot of its current value
    pub fn detach(&mut self, store: &AttributeStore) {
        for slot in &mut self.bindings {
            let live_handle = match slot {
                Some(AttributeBinding::LiveRef { handle, .. }) => Some(*handle),
                _ => None,
            };
            if let Some(handle) = live_handle {
                *slot = store
                    .attribute(handle)
                    .map(|live| AttributeBinding::Snapshot(live.value().clone()));
            }
        }
    }

    /// Kinds bound by live reference
    pub fn live_mask(&self) -> DirtyAttrs {
        AttributeKind::ALL
            .into_iter()
            .filter(|kind| matches!(self.binding(*kind), Some(AttributeBinding::LiveRef { .. })))
            .fold(DirtyAttrs::empty(), |mask, kind| mask | kind.flag())
    }
}
