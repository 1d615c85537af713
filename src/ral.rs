//! Register access layer support
//!
//! Re-exports the `ral-registers` API, and adds [`fields!`] for
//! describing register fields in the shape that the RAL macros expect.

pub use ral_registers::{modify_reg, read_reg, write_reg, RWRegister};

/// Define register field modules
///
/// `NAME: offset, width;` produces a `NAME` module with `offset` and
/// `mask` constants, and the empty `R`, `W`, and `RW` modules that the
/// RAL macros import.
macro_rules! fields {
    ($($name:ident: $offset:expr, $width:expr;)+) => {
        $(
            pub mod $name {
                pub const offset: u32 = $offset;
                pub const mask: u32 = (u32::MAX >> (32 - $width)) << offset;
                pub mod R {}
                pub mod W {}
                pub mod RW {}
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case, non_upper_case_globals)]

    use crate::vcell::VCell;

    struct Block {
        REG: VCell<u32>,
    }

    mod REG {
        fields! {
            LOW: 0, 4;
            WIDE: 8, 24;
        }
    }

    #[test]
    fn field_masks() {
        assert_eq!(REG::LOW::mask, 0xF);
        assert_eq!(REG::WIDE::mask, 0xFFFF_FF00);
    }

    #[test]
    fn macros_use_fields() {
        let block = Block {
            REG: VCell::new(0),
        };
        super::write_reg!(self, &block, REG, LOW: 0x1F, WIDE: 1);
        assert_eq!(block.REG.read(), 0x10F);
        super::modify_reg!(self, &block, REG, LOW: 2);
        assert_eq!(super::read_reg!(self, &block, REG, LOW), 2);
        assert!(super::read_reg!(self, &block, REG, WIDE == 1));
    }
}
