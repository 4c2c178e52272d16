// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::{
    fmt,
    marker::PhantomData,
};

//==============================================================================
// Structures
//==============================================================================

/// Payload Pointer
///
/// Address of packet bytes living in a receive ring buffer owned by the network
/// receive subsystem. This is what gets staged into a batch slot and handed to
/// the gather engine, so it deliberately carries no lifetime: it must stay
/// valid until the gather that reads it completes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PayloadPtr(usize);

/// Packet View
///
/// Borrowed view over the bytes of one packet (or one segment of a packet) in a
/// burst. The `'burst` lifetime ties the view to the burst it was taken from.
///
/// # Ring-buffer hazard
///
/// The receive subsystem reuses its buffers once it moves past them. Addresses
/// extracted from a view through [PacketView::addr] are only meaningful as long
/// as the receive subsystem has not overwritten that ring slot. Implementors of
/// [super::BurstSource] must size their rings so that at least
/// `(num_concurrent + 1) × batch_size` packets stay untouched behind the write head.
#[derive(Clone, Copy)]
pub struct PacketView<'burst> {
    addr: PayloadPtr,
    len: usize,
    _burst: PhantomData<&'burst [u8]>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Payload Pointers
impl PayloadPtr {
    /// The null pointer.
    pub const NULL: PayloadPtr = PayloadPtr(0);

    /// Creates a payload pointer from a raw address.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Creates a payload pointer from a raw pointer.
    pub fn from_ptr(ptr: *const u8) -> Self {
        Self(ptr as usize)
    }

    /// Returns the raw address.
    pub fn addr(&self) -> usize {
        self.0
    }

    /// Returns the target address as a raw pointer.
    pub fn as_ptr(&self) -> *const u8 {
        self.0 as *const u8
    }

    /// Returns a pointer `nbytes` past the target one.
    pub fn offset(&self, nbytes: usize) -> Self {
        Self(self.0.wrapping_add(nbytes))
    }

    /// Whether the target pointer is null.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Associate Functions for Packet Views
impl<'burst> PacketView<'burst> {
    /// Creates a view over a slice borrowed from a burst.
    pub fn from_slice(buf: &'burst [u8]) -> Self {
        Self {
            addr: PayloadPtr::from_ptr(buf.as_ptr()),
            len: buf.len(),
            _burst: PhantomData,
        }
    }

    /// Creates a view from a raw address and length.
    ///
    /// # Safety
    ///
    /// The caller asserts that `len` bytes at `addr` are readable for `'burst`,
    /// and that they stay readable until every gather staged from this view
    /// completes.
    pub unsafe fn from_raw_parts(addr: PayloadPtr, len: usize) -> Self {
        Self {
            addr,
            len,
            _burst: PhantomData,
        }
    }

    /// Returns the address of the first byte of the packet.
    pub fn addr(&self) -> PayloadPtr {
        self.addr
    }

    /// Returns the packet length (in bytes).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the packet is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the bytes that follow a header of `header_size` bytes.
    ///
    /// Returns an empty slice if the packet is shorter than the header.
    ///
    /// # Safety
    ///
    /// The view must have been built over readable memory.
    pub unsafe fn payload(&self, header_size: usize) -> &'burst [u8] {
        if self.len <= header_size || self.addr.is_null() {
            return &[];
        }
        ::std::slice::from_raw_parts(self.addr.offset(header_size).as_ptr(), self.len - header_size)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Debug for PayloadPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for PayloadPtr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<PayloadPtr> for usize {
    fn from(ptr: PayloadPtr) -> Self {
        ptr.0
    }
}

impl<'burst> fmt::Debug for PacketView<'burst> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketView")
            .field("addr", &self.addr)
            .field("len", &self.len)
            .finish()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        PacketView,
        PayloadPtr,
    };

    #[test]
    fn offset_advances_address() {
        let ptr: PayloadPtr = PayloadPtr::new(100);
        assert_eq!(ptr.offset(10), PayloadPtr::new(110));
        assert!(!ptr.is_null());
        assert!(PayloadPtr::NULL.is_null());
    }

    #[test]
    fn payload_skips_header() {
        let buf: [u8; 6] = [1, 2, 3, 4, 5, 6];
        let view: PacketView = PacketView::from_slice(&buf);
        assert_eq!(view.len(), 6);
        assert_eq!(unsafe { view.payload(4) }, &[5, 6]);
        assert!(unsafe { view.payload(6) }.is_empty());
    }
}
