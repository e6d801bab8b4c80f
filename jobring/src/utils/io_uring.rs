use bitflags::bitflags;

bitflags! {
    /// `IORING_CQE_F_*` bits of a completion. Bits the reactor does not act
    /// on are retained unnamed.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CompletionFlags: u32 {
        /// The submission is multishot and will complete again.
        const MORE = 1 << 1;
    }
}

impl From<u32> for CompletionFlags {
    fn from(bits: u32) -> Self {
        CompletionFlags::from_bits_retain(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bits_retained() {
        let flags = CompletionFlags::from(0b1011);
        assert!(flags.contains(CompletionFlags::MORE));
        assert_eq!(flags.bits(), 0b1011);
        assert!(!CompletionFlags::default().contains(CompletionFlags::MORE));
    }
}
