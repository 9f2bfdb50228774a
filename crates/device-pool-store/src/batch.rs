//! Atomic multi-key write batches.
//!
//! A [`Batch`] collects the mutations of one logical transition. Backends
//! apply it all-or-nothing so no reader observes a torn intermediate state,
//! such as a device whose record says `in_use` while it is still listed in
//! the `available` index.

/// A single mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Set the given fields of a hash, leaving other fields untouched.
    HashSet {
        /// Hash key.
        key: String,
        /// Field/value pairs to write.
        fields: Vec<(String, String)>,
    },
    /// Add a member to a set.
    SetAdd {
        /// Set key.
        key: String,
        /// Member to add.
        member: String,
    },
    /// Remove a member from a set.
    SetRemove {
        /// Set key.
        key: String,
        /// Member to remove.
        member: String,
    },
    /// Delete a key of any kind.
    Delete {
        /// Key to delete.
        key: String,
    },
}

/// An ordered list of mutations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a hash write.
    pub fn hash_set(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.ops.push(Op::HashSet {
            key: key.into(),
            fields,
        });
        self
    }

    /// Queue a set insertion.
    pub fn set_add(&mut self, key: impl Into<String>, member: impl ToString) -> &mut Self {
        self.ops.push(Op::SetAdd {
            key: key.into(),
            member: member.to_string(),
        });
        self
    }

    /// Queue a set removal.
    pub fn set_remove(&mut self, key: impl Into<String>, member: impl ToString) -> &mut Self {
        self.ops.push(Op::SetRemove {
            key: key.into(),
            member: member.to_string(),
        });
        self
    }

    /// Queue a key deletion.
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(Op::Delete { key: key.into() });
        self
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued operations, in order.
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Consume the batch, yielding its operations.
    #[must_use]
    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_keep_insertion_order() {
        let mut batch = Batch::new();
        batch
            .set_remove("idx:status:available", "d1")
            .set_add("idx:status:in_use", "d1")
            .set_remove("used:wdalocal", 8100);

        assert_eq!(batch.ops().len(), 3);
        assert_eq!(
            batch.ops()[2],
            Op::SetRemove {
                key: "used:wdalocal".into(),
                member: "8100".into()
            }
        );
    }
}
