//! A small assembler for building programs out of [`Opcode`]s with named jump
//! targets, so that test programs do not need hand-computed byte offsets.

use std::collections::HashMap;

use crate::{
    error::{
        container::Locatable,
        disassembly::{Error, Result},
    },
    opcode::Opcode,
};

/// The number of bytes of the push used to reference a label.
const LABEL_PUSH_SIZE: u8 = 2;

#[derive(Clone, Debug, Eq, PartialEq)]
enum Item {
    Op(Opcode),
    Label(String),
    LabelRef(String),
}

impl Item {
    fn encoded_len(&self) -> usize {
        match self {
            Self::Op(op) => op.encode().len(),
            Self::Label(_) => 1,
            Self::LabelRef(_) => 1 + usize::from(LABEL_PUSH_SIZE),
        }
    }
}

/// Builds a program from opcodes and labels.
///
/// Every label is emitted as a `JUMPDEST`, and every reference to a label is
/// emitted as a `PUSH2` of the label's byte offset.
///
/// ```
/// use evm_path_explorer::opcode::{asm::Assembler, Opcode};
///
/// let code = Assembler::new()
///     .push_label("end")
///     .op(Opcode::Jump)
///     .op(Opcode::Invalid(0xfe))
///     .label("end")
///     .op(Opcode::Stop)
///     .assemble()
///     .unwrap();
///
/// assert_eq!(code, vec![0x61, 0x00, 0x05, 0x56, 0xfe, 0x5b, 0x00]);
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Assembler {
    items: Vec<Item>,
}

impl Assembler {
    /// Constructs an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `opcode`.
    #[must_use]
    pub fn op(mut self, opcode: Opcode) -> Self {
        self.items.push(Item::Op(opcode));
        self
    }

    /// Appends each of `opcodes` in order.
    #[must_use]
    pub fn ops(mut self, opcodes: impl IntoIterator<Item = Opcode>) -> Self {
        self.items.extend(opcodes.into_iter().map(Item::Op));
        self
    }

    /// Appends the shortest push of `value`.
    #[must_use]
    pub fn push(self, value: impl Into<ethnum::U256>) -> Self {
        self.op(Opcode::push_value(value))
    }

    /// Defines the label `name` at the current position.
    #[must_use]
    pub fn label(mut self, name: impl Into<String>) -> Self {
        self.items.push(Item::Label(name.into()));
        self
    }

    /// Appends a push of the offset of the label `name`, which may be defined
    /// before or after this point.
    #[must_use]
    pub fn push_label(mut self, name: impl Into<String>) -> Self {
        self.items.push(Item::LabelRef(name.into()));
        self
    }

    /// Resolves the labels and encodes the program.
    ///
    /// # Errors
    ///
    /// If a label is defined twice or referenced without being defined, or the
    /// program is too large for its labels to fit in a `PUSH2`.
    pub fn assemble(&self) -> Result<Vec<u8>> {
        let mut labels = HashMap::new();
        let mut offset = 0usize;
        for item in &self.items {
            if let Item::Label(name) = item {
                if labels.insert(name.as_str(), offset).is_some() {
                    return Err(Error::DuplicateLabel(name.clone()).locate(location(offset)));
                }
            }
            offset += item.encoded_len();
        }
        if offset > usize::from(u16::MAX) {
            return Err(Error::BytecodeTooLarge.locate(location(offset)));
        }

        let mut bytes = Vec::with_capacity(offset);
        for item in &self.items {
            match item {
                Item::Op(op) => bytes.extend(op.encode()),
                Item::Label(_) => bytes.extend(Opcode::JumpDest.encode()),
                Item::LabelRef(name) => {
                    let target = labels
                        .get(name.as_str())
                        .ok_or_else(|| Error::UndefinedLabel(name.clone()).locate(location(bytes.len())))?;
                    let target = u16::try_from(*target).unwrap_or(u16::MAX);
                    let push = Opcode::push(LABEL_PUSH_SIZE, &target.to_be_bytes())
                        .map_err(|e| e.locate(location(bytes.len())))?;
                    bytes.extend(push.encode());
                }
            }
        }
        Ok(bytes)
    }
}

fn location(offset: usize) -> u32 {
    u32::try_from(offset).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod test {
    use crate::{
        error::disassembly::Error,
        opcode::{asm::Assembler, Opcode},
    };

    #[test]
    fn resolves_backward_and_forward_labels() -> anyhow::Result<()> {
        let code = Assembler::new()
            .label("start")
            .push_label("end")
            .op(Opcode::Jump)
            .push_label("start")
            .op(Opcode::Jump)
            .label("end")
            .op(Opcode::Stop)
            .assemble()?;

        assert_eq!(code, vec![
            0x5b, 0x61, 0x00, 0x09, 0x56, 0x61, 0x00, 0x00, 0x56, 0x5b, 0x00
        ]);

        Ok(())
    }

    #[test]
    fn rejects_bad_labels() {
        let undefined = Assembler::new().push_label("nowhere").assemble();
        assert_eq!(
            undefined.map_err(|e| e.payload),
            Err(Error::UndefinedLabel("nowhere".into()))
        );

        let duplicate = Assembler::new().label("a").op(Opcode::Stop).label("a").assemble();
        assert_eq!(
            duplicate.map_err(|e| e.payload),
            Err(Error::DuplicateLabel("a".into()))
        );
    }
}
