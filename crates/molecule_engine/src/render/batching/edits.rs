//! Producer edit queue
//!
//! Scene-graph producers never touch batch state. They enqueue
//! [`SceneEdit`]s through a cloneable [`EditSender`]; the commit phase drains
//! the queue before it applies anything.

use crate::foundation::collections::{AppearanceHandle, AtomHandle};
use crate::render::attributes::DirtyAttrs;
use crate::render::error::{BatchError, BatchResult};
use crossbeam_channel::{unbounded, Receiver, Sender};

/// One deferred scene edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEdit {
    /// Find or create the batch of an atom and queue it there
    Insert(AtomHandle),
    /// Queue an atom for removal from its batch
    Remove(AtomHandle),
    /// Remove an atom and free it once it left its batch
    Release(AtomHandle),
    /// Attribute components of an appearance changed
    AttributeChanged {
        /// Appearance whose components changed
        appearance: AppearanceHandle,
        /// Kinds that changed
        mask: DirtyAttrs,
    },
}

/// Producer end of the edit queue
#[derive(Debug, Clone)]
pub struct EditSender {
    sender: Sender<SceneEdit>,
}

impl EditSender {
    /// Enqueue an edit
    pub fn send(&self, edit: SceneEdit) -> BatchResult<()> {
        self.sender.send(edit).map_err(|_| BatchError::EditQueueClosed)
    }

    /// Enqueue an insertion
    pub fn insert(&self, atom: AtomHandle) -> BatchResult<()> {
        self.send(SceneEdit::Insert(atom))
    }

    /// Enqueue a removal
    pub fn remove(&self, atom: AtomHandle) -> BatchResult<()> {
        self.send(SceneEdit::Remove(atom))
    }

    /// Enqueue a release
    pub fn release(&self, atom: AtomHandle) -> BatchResult<()> {
        self.send(SceneEdit::Release(atom))
    }

    /// Enqueue an attribute change notification
    pub fn attribute_changed(&self, appearance: AppearanceHandle, mask: DirtyAttrs) -> BatchResult<()> {
        self.send(SceneEdit::AttributeChanged { appearance, mask })
    }
}

/// Consumer end of the edit queue, owned by the container
#[derive(Debug)]
pub(crate) struct EditQueue {
    sender: Sender<SceneEdit>,
    receiver: Receiver<SceneEdit>,
}

impl EditQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub(crate) fn sender(&self) -> EditSender {
        EditSender { sender: self.sender.clone() }
    }

    /// Take every queued edit in arrival order
    pub(crate) fn drain(&self) -> Vec<SceneEdit> {
        self.receiver.try_iter().collect()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}
