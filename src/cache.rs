//! Cache maintenance operations
//!
//! cortex-m only lets you access these functions when you have the SCB
//! in the cortex_m::Peripherals collection. We neither want to steal the
//! peripherals, nor own them, so we write the CBP registers directly.
//!
//! Only the ChipIdea backend needs this; its DMA engine reads descriptors
//! and transfer buffers from main memory. Host builds have no cache.

/// Cleans and invalidates D-cache by address.
///
/// * `addr`: The address to clean and invalidate.
/// * `size`: The number of bytes to clean and invalidate.
///
/// Dirty lines are written back to main memory, then marked invalid, so
/// the next CPU read fetches what the DMA engine wrote.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn clean_invalidate_dcache_by_address(addr: usize, size: usize) {
    if size == 0 {
        return;
    }

    // Safety: write-only registers, pointer to static memory
    let cbp = unsafe { &*cortex_m::peripheral::CBP::PTR };

    cortex_m::asm::dsb();

    // Cache lines are fixed to 32 bytes on Cortex-M7
    const LINESIZE: usize = 32;
    let num_lines = ((size - 1) / LINESIZE) + 1;
    let mut addr = addr & !(LINESIZE - 1);

    for _ in 0..num_lines {
        // Safety: write to Cortex-M write-only register
        unsafe { cbp.dccimvac.write(addr as u32) };
        addr += LINESIZE;
    }

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn clean_invalidate_dcache_by_address(_: usize, _: usize) {}

/// Clean and invalidate the memory behind `value`
pub fn clean_invalidate<T: ?Sized>(value: &T) {
    clean_invalidate_dcache_by_address(
        (value as *const T).cast::<u8>() as usize,
        core::mem::size_of_val(value),
    );
}
