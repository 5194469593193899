//! This module contains the parser definition for turning a stream of bytes
//! into the byte-offset-indexed instruction table of a [`super::Program`].

use crate::{
    constant::PUSH_OPCODE_MAX_BYTES,
    error::{
        container::Locatable,
        disassembly::{Error, Result},
    },
    opcode::Opcode,
};

/// Disassembles the input `bytes` into one [`Opcode`] per byte offset.
///
/// # Byte-Instruction Correspondence
///
/// Each `PUSHN` is followed by `N` [`Opcode::Nop`]s standing in for its data,
/// so the instruction at index `i` is always the one that starts at byte `i`
/// (or the filler for push data at that byte).
///
/// # CBOR Metadata
///
/// Any byte that is not a known instruction is translated to
/// [`Opcode::Invalid`], and hence will cause the path to end exceptionally if
/// it is ever actually executed. This copes with the metadata compilers append
/// to the code without having to strip it beforehand.
///
/// # Truncated Pushes
///
/// A push cut off by the end of the code pushes its available data followed by
/// zero bytes, matching the EVM reading the bytes past the end of code as zero.
///
/// # Errors
///
/// When `bytes` is too large to be addressed with a 32-bit offset.
pub fn disassemble(bytes: &[u8]) -> Result<Vec<Opcode>> {
    if u32::try_from(bytes.len()).is_err() {
        return Err(Error::BytecodeTooLarge.locate(u32::MAX));
    }

    let mut opcodes: Vec<Opcode> = Vec::with_capacity(bytes.len());
    let mut offset = 0;
    while offset < bytes.len() {
        let opcode = Opcode::from_byte(bytes[offset]);
        if let Opcode::Push { size, .. } = opcode {
            debug_assert!(size <= PUSH_OPCODE_MAX_BYTES);
            let data_start = offset + 1;
            let data_end = (data_start + usize::from(size)).min(bytes.len());
            let data = &bytes[data_start..data_end];

            // The offset is known to fit in 32 bits from the check above.
            let location = u32::try_from(offset).unwrap_or(u32::MAX);
            opcodes.push(Opcode::push(size, data).map_err(|e| e.locate(location))?);

            // To maintain the correspondence of bytes to instructions, we need to add a
            // no-op for each byte of the push's data.
            opcodes.extend(std::iter::repeat(Opcode::Nop).take(data.len()));
            offset = data_end;
        } else {
            opcodes.push(opcode);
            offset += 1;
        }
    }

    Ok(opcodes)
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{disassembly::disassembler::disassemble, opcode::Opcode};

    #[test]
    fn pads_push_data_with_nops() -> anyhow::Result<()> {
        let opcodes = disassemble(&[0x61, 0xab, 0xcd, 0x5b])?;
        assert_eq!(opcodes, vec![
            Opcode::Push {
                size:  2,
                value: U256::from(0xabcdu16),
            },
            Opcode::Nop,
            Opcode::Nop,
            Opcode::JumpDest,
        ]);

        Ok(())
    }

    #[test]
    fn translates_unknown_bytes_to_invalid() -> anyhow::Result<()> {
        let opcodes = disassemble(&[0xf9, 0xfe])?;
        assert_eq!(opcodes, vec![Opcode::Invalid(0xf9), Opcode::Invalid(0xfe)]);

        Ok(())
    }

    #[test]
    fn zero_pads_truncated_pushes() -> anyhow::Result<()> {
        let opcodes = disassemble(&[0x62, 0x01])?;
        assert_eq!(opcodes, vec![
            Opcode::Push {
                size:  3,
                value: U256::from(0x01_0000u32),
            },
            Opcode::Nop,
        ]);

        Ok(())
    }
}
