/// A branch target label within a block.
///
/// Branches may reference a label before it is placed; the code
/// generator records each reference and back-patches it when the
/// label's `set_label` op is lowered.
#[derive(Debug, Clone)]
pub struct Label {
    pub id: u32,
    /// Number of `set_label` ops emitted for this label. The verifier
    /// requires exactly one.
    pub placements: u32,
    /// Host code offset, once the label has been lowered.
    pub value: Option<usize>,
    /// References waiting for the label's host offset.
    pub uses: Vec<LabelUse>,
}

/// A reference to a label from an emitted branch instruction.
#[derive(Debug, Clone, Copy)]
pub struct LabelUse {
    /// Offset of the displacement field in the code buffer.
    pub offset: usize,
    pub kind: RelocKind,
}

/// Relocation types for label back-patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// x86-64 32-bit displacement relative to the end of the field.
    Rel32,
}

impl Label {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            placements: 0,
            value: None,
            uses: Vec::new(),
        }
    }

    pub fn add_use(&mut self, offset: usize, kind: RelocKind) {
        self.uses.push(LabelUse { offset, kind });
    }

    /// Record the host offset of this label.
    pub fn set_value(&mut self, offset: usize) {
        self.value = Some(offset);
    }

    /// Whether references were recorded that were never resolved.
    pub fn has_pending_uses(&self) -> bool {
        !self.uses.is_empty() && self.value.is_none()
    }
}
