//! Decoder for the subset of A32 memory instructions the engine emulates:
//! word/byte single data transfers and the halfword/signed-byte forms.
//! Anything else trapping on a guarded window cannot be replayed and is
//! treated as fatal by the caller.

/// Where the untrusted OS register file keeps the transfer register.
///
/// The monitor saves r0-r7 and r8-r12 in two separate blocks; banked sp/pc
/// are not reachable from a trap frame, so instructions naming them cannot
/// be emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegSlot {
    Low(usize),
    High(usize),
    Lr,
}

impl RegSlot {
    pub fn from_index(index: u32) -> Result<RegSlot, DecodeError> {
        match index {
            0..=7 => Ok(RegSlot::Low(index as usize)),
            8..=12 => Ok(RegSlot::High(index as usize - 8)),
            14 => Ok(RegSlot::Lr),
            _ => Err(DecodeError::UnsupportedRegister(index)),
        }
    }
}

/// Untrusted OS register state captured at the trap.
#[derive(Debug, Clone, Default)]
pub struct NsContext {
    pub r: [u32; 8],
    pub r_high: [u32; 5],
    pub lr: u32,
    /// Return address the monitor will resume the untrusted OS at.
    pub mon_lr: u32,
}

impl NsContext {
    pub fn get(&self, slot: RegSlot) -> u32 {
        match slot {
            RegSlot::Low(i) => self.r[i],
            RegSlot::High(i) => self.r_high[i],
            RegSlot::Lr => self.lr,
        }
    }

    pub fn set(&mut self, slot: RegSlot, value: u32) {
        match slot {
            RegSlot::Low(i) => self.r[i] = value,
            RegSlot::High(i) => self.r_high[i] = value,
            RegSlot::Lr => self.lr = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDir {
    Load { sign: bool },
    Store,
}

/// One decoded memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub size: usize,
    pub dir: AccessDir,
    pub slot: RegSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnsupportedInstruction(u32),
    UnsupportedRegister(u32),
}

pub fn decode(instr: u32) -> Result<Access, DecodeError> {
    let slot = RegSlot::from_index((instr >> 12) & 0xF)?;
    let load = instr & (1 << 20) != 0;

    let class = (instr >> 25) & 0x7;
    if (class & 0x6) == 0x2 {
        // Word or unsigned byte single data transfer.
        let size = if instr & (1 << 22) != 0 { 1 } else { 4 };
        let dir = if load {
            AccessDir::Load { sign: false }
        } else {
            AccessDir::Store
        };
        Ok(Access { size, dir, slot })
    } else if class == 0 {
        // Halfword or signed byte transfer.
        let size = if instr & (1 << 5) != 0 { 2 } else { 1 };
        let dir = if load {
            AccessDir::Load {
                sign: instr & (1 << 6) != 0,
            }
        } else {
            AccessDir::Store
        };
        Ok(Access { size, dir, slot })
    } else {
        Err(DecodeError::UnsupportedInstruction(instr))
    }
}

pub fn sign_extend(value: u32, size: usize) -> u32 {
    match size {
        1 if value & 0x80 != 0 => value | 0xFFFF_FF00,
        2 if value & 0x8000 != 0 => value | 0xFFFF_0000,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fixtures() {
        // (encoding, size, dir, slot)
        let cases: &[(u32, usize, AccessDir, RegSlot)] = &[
            // ldr r3, [r1]
            (0xE591_3000, 4, AccessDir::Load { sign: false }, RegSlot::Low(3)),
            // ldrb r0, [r1]
            (0xE5D1_0000, 1, AccessDir::Load { sign: false }, RegSlot::Low(0)),
            // str r2, [r3]
            (0xE583_2000, 4, AccessDir::Store, RegSlot::Low(2)),
            // strb r2, [r3]
            (0xE5C3_2000, 1, AccessDir::Store, RegSlot::Low(2)),
            // ldrh r4, [r5]
            (0xE1D5_40B0, 2, AccessDir::Load { sign: false }, RegSlot::Low(4)),
            // strh r1, [r2]
            (0xE1C2_10B0, 2, AccessDir::Store, RegSlot::Low(1)),
            // ldrsb r6, [r0]
            (0xE1D0_60D0, 1, AccessDir::Load { sign: true }, RegSlot::Low(6)),
            // ldrsh r2, [r0]
            (0xE1D0_20F0, 2, AccessDir::Load { sign: true }, RegSlot::Low(2)),
            // ldr r10, [r1]
            (0xE591_A000, 4, AccessDir::Load { sign: false }, RegSlot::High(2)),
            // ldr lr, [r1]
            (0xE591_E000, 4, AccessDir::Load { sign: false }, RegSlot::Lr),
        ];
        for (encoding, size, dir, slot) in cases {
            let access = decode(*encoding).unwrap();
            assert_eq!(access.size, *size, "{:#010x}", encoding);
            assert_eq!(access.dir, *dir, "{:#010x}", encoding);
            assert_eq!(access.slot, *slot, "{:#010x}", encoding);
        }
    }

    #[test]
    fn decode_rejects_block_transfer() {
        // ldm sp!, {lr}
        assert_eq!(
            decode(0xE8BD_4000),
            Err(DecodeError::UnsupportedInstruction(0xE8BD_4000))
        );
    }

    #[test]
    fn decode_rejects_sp_and_pc() {
        // ldr sp, [r0] / ldr pc, [r0]
        assert_eq!(decode(0xE590_D000), Err(DecodeError::UnsupportedRegister(13)));
        assert_eq!(decode(0xE590_F000), Err(DecodeError::UnsupportedRegister(15)));
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0x80, 1), 0xFFFF_FF80);
        assert_eq!(sign_extend(0x7F, 1), 0x7F);
        assert_eq!(sign_extend(0x8000, 2), 0xFFFF_8000);
        assert_eq!(sign_extend(0x7FFF, 2), 0x7FFF);
        assert_eq!(sign_extend(0x8000_0000, 4), 0x8000_0000);
    }

    #[test]
    fn context_slots() {
        let mut ctx = NsContext::default();
        ctx.set(RegSlot::Low(3), 7);
        ctx.set(RegSlot::High(4), 9);
        ctx.set(RegSlot::Lr, 11);
        assert_eq!(ctx.get(RegSlot::Low(3)), 7);
        assert_eq!(ctx.get(RegSlot::High(4)), 9);
        assert_eq!(ctx.get(RegSlot::Lr), 11);
    }
}
