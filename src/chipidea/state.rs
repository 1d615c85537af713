#![allow(clippy::declare_interior_mutable_const)] // Usage is legit in this module.

use core::cell::UnsafeCell;

use super::{qh::Qh, td::Td, ENDPOINT_COUNT};
use crate::critical::Shared;

/// One queue head per endpoint, per direction.
pub const QH_COUNT: usize = ENDPOINT_COUNT * 2;

/// TDs available to each queue head. This bounds the ring depth.
pub const TDS_PER_QH: usize = 4;

/// A list of transfer descriptors
#[repr(align(32))]
struct TdList([UnsafeCell<Td>; QH_COUNT * TDS_PER_QH]);

impl TdList {
    const fn new() -> Self {
        const TD: UnsafeCell<Td> = UnsafeCell::new(Td::new());
        Self([TD; QH_COUNT * TDS_PER_QH])
    }
}

/// A list of queue heads
#[repr(align(4096))]
struct QhList([UnsafeCell<Qh>; QH_COUNT]);

impl QhList {
    const fn new() -> Self {
        const QH: UnsafeCell<Qh> = UnsafeCell::new(Qh::new());
        Self([QH; QH_COUNT])
    }
}

/// DMA descriptor memory for one ChipIdea controller.
///
/// Allocate a `static` object and supply it to the backend constructor.
/// Each state serves exactly one controller.
///
/// ```
/// use usbdc::chipidea::DescriptorState;
///
/// static DESCRIPTORS: DescriptorState = DescriptorState::new();
/// ```
pub struct DescriptorState {
    qh_list: QhList,
    td_list: TdList,
    taken: Shared<bool>,
}

unsafe impl Sync for DescriptorState {}

impl DescriptorState {
    pub const fn new() -> Self {
        Self {
            qh_list: QhList::new(),
            td_list: TdList::new(),
            taken: Shared::new(false),
        }
    }

    /// Returns `None` if the descriptors were already taken.
    pub(crate) fn take(&'static self) -> Option<Descriptors> {
        let mut taken = self.taken.lock();
        if *taken {
            return None;
        }
        *taken = true;
        Some(Descriptors {
            qh_list: &self.qh_list.0,
            td_list: &self.td_list.0,
        })
    }
}

impl Default for DescriptorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive handle on a [`DescriptorState`].
pub(crate) struct Descriptors {
    qh_list: &'static [UnsafeCell<Qh>; QH_COUNT],
    td_list: &'static [UnsafeCell<Td>; QH_COUNT * TDS_PER_QH],
}

impl Descriptors {
    /// Used to tell the hardware where the queue heads are located.
    pub fn qh_list_addr(&self) -> *const () {
        self.qh_list.as_ptr().cast()
    }

    /// # Safety
    ///
    /// Caller must make sure that no other reference to this QH is live.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn qh(&self, index: usize) -> &mut Qh {
        &mut *self.qh_list[index].get()
    }

    /// The `slot`th TD in the ring of queue head `index`.
    ///
    /// # Safety
    ///
    /// Caller must make sure that no other reference to this TD is live.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn td(&self, index: usize, slot: usize) -> &mut Td {
        &mut *self.td_list[index * TDS_PER_QH + slot].get()
    }
}
