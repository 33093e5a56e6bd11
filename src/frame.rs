//! Frame buffer pool.
//!
//! Grounded in the teacher's `frame_pool.rs`: a `GroundedArrayCell`-backed
//! arena slice allocated once from a `'static` storage, with handles that
//! track liveness via a `load`/`store`-only atomic (no CAS, per the
//! `grounded` crate's target support). Unlike the teacher, which stores one
//! reference-counting byte per arena (`0` meaning free), this pool needs a
//! real shared counter: a frame allocation hands out a writer and a reader
//! at once, and readers can be cloned further, so the counter must track how
//! many live handles point at one arena rather than a single true/false bit.
//!
//! Two size classes exist side by side (`SHORT_LEN` and `MTU`); the public
//! [`FrameWriter`]/[`FrameReader`] types are tagged sums over which class
//! backs them (Design Notes: "Source's variant-based state machines").

use core::ptr::{addr_of, addr_of_mut, NonNull};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use grounded::{const_init::ConstInit, uninit::GroundedArrayCell};

use crate::config::{LARGE_POOL_COUNT, MTU, SHORT_LEN, SHORT_POOL_COUNT};
use crate::io::{LengthResult, Readable, Writable};
use crate::poll::Poll;

#[repr(C)]
struct Arena<const CAP: usize> {
    data: [u8; CAP],
    /// Number of live handles sharing this arena. `0` means free.
    refcount: AtomicU8,
    /// Bytes written so far; always `<= frame_length`.
    write_cursor: AtomicU8,
    /// Declared frame length for the current allocation; always `<= CAP`.
    frame_length: AtomicU8,
}

impl<const CAP: usize> ConstInit for Arena<CAP> {
    #[allow(clippy::declare_interior_mutable_const)]
    const VAL: Self = Arena {
        data: [0u8; CAP],
        refcount: AtomicU8::new(0),
        write_cursor: AtomicU8::new(0),
        frame_length: AtomicU8::new(0),
    };
}

/// `'static` storage for exactly `N` arenas of capacity `CAP`.
struct ArenaStorage<const CAP: usize, const N: usize> {
    arenas: GroundedArrayCell<Arena<CAP>, N>,
    once: AtomicBool,
}

impl<const CAP: usize, const N: usize> ArenaStorage<CAP, N> {
    const fn new() -> Self {
        Self {
            arenas: GroundedArrayCell::const_init(),
            once: AtomicBool::new(false),
        }
    }

    fn take(&'static self) -> Option<ArenaSlice<CAP>> {
        let first = critical_section::with(|_| {
            let old = self.once.load(Ordering::Acquire);
            self.once.store(true, Ordering::Release);
            !old
        });
        first.then(|| unsafe { ArenaSlice::from_static(&self.arenas) })
    }
}

struct ArenaSlice<const CAP: usize> {
    start: NonNull<Arena<CAP>>,
    len: usize,
    next_idx: usize,
}

impl<const CAP: usize> ArenaSlice<CAP> {
    unsafe fn from_static<const N: usize>(buf: &'static GroundedArrayCell<Arena<CAP>, N>) -> Self {
        Self {
            start: NonNull::new_unchecked(buf.as_mut_ptr()),
            len: N,
            next_idx: 0,
        }
    }

    fn count_allocatable(&self) -> usize {
        let start_ptr = self.start.as_ptr();
        (0..self.len)
            .filter(|&idx| {
                let ptr = unsafe { start_ptr.add(idx) };
                let refcount: &AtomicU8 = unsafe { &*addr_of!((*ptr).refcount) };
                refcount.load(Ordering::Acquire) == 0
            })
            .count()
    }

    fn allocate_raw(&mut self) -> Option<RawHandle<CAP>> {
        if self.len == 0 {
            return None;
        }
        if self.next_idx >= self.len {
            self.next_idx = 0;
        }
        let start_ptr = self.start.as_ptr();
        let indices = (self.next_idx..self.len).chain(0..self.next_idx);
        for idx in indices {
            let ptr = unsafe { start_ptr.add(idx) };
            let claimed = {
                let refcount: &AtomicU8 = unsafe { &*addr_of!((*ptr).refcount) };
                if refcount.load(Ordering::Acquire) == 0 {
                    refcount.store(1, Ordering::Release);
                    true
                } else {
                    false
                }
            };
            if claimed {
                self.next_idx = idx + 1;
                let write_cursor: &AtomicU8 = unsafe { &*addr_of!((*ptr).write_cursor) };
                let frame_length: &AtomicU8 = unsafe { &*addr_of!((*ptr).frame_length) };
                write_cursor.store(0, Ordering::Relaxed);
                frame_length.store(0, Ordering::Relaxed);
                return Some(RawHandle {
                    ptr: NonNull::new(ptr)?,
                });
            }
        }
        None
    }
}

/// A reference-counted pointer to one arena. Dropping the last handle frees
/// the arena back to its pool.
struct RawHandle<const CAP: usize> {
    ptr: NonNull<Arena<CAP>>,
}

unsafe impl<const CAP: usize> Send for RawHandle<CAP> {}

impl<const CAP: usize> RawHandle<CAP> {
    fn refcount(&self) -> &AtomicU8 {
        unsafe { &*addr_of!((*self.ptr.as_ptr()).refcount) }
    }

    fn write_cursor(&self) -> &AtomicU8 {
        unsafe { &*addr_of!((*self.ptr.as_ptr()).write_cursor) }
    }

    fn frame_length(&self) -> &AtomicU8 {
        unsafe { &*addr_of!((*self.ptr.as_ptr()).frame_length) }
    }

    fn data_ptr(&self) -> *const u8 {
        let arr: *const [u8; CAP] = unsafe { addr_of!((*self.ptr.as_ptr()).data) };
        arr.cast()
    }

    fn data_mut_ptr(&self) -> *mut u8 {
        let arr: *mut [u8; CAP] = unsafe { addr_of_mut!((*self.ptr.as_ptr()).data) };
        arr.cast()
    }

    fn set_frame_length(&self, len: usize) {
        debug_assert!(len <= CAP);
        self.frame_length().store(len as u8, Ordering::Relaxed);
    }

    /// Shares this arena with one more live handle.
    ///
    /// Single-threaded cooperative scheduling guarantees no concurrent
    /// mutator, so a plain load-then-store suffices; no fetch-add/CAS is
    /// required (same target constraint the teacher's pool is built for).
    fn clone_ref(&self) -> Self {
        let count = self.refcount().load(Ordering::Acquire);
        self.refcount().store(count + 1, Ordering::Release);
        Self { ptr: self.ptr }
    }
}

impl<const CAP: usize> Drop for RawHandle<CAP> {
    fn drop(&mut self) {
        let count = self.refcount().load(Ordering::Acquire);
        self.refcount().store(count - 1, Ordering::Release);
        if count == 1 {
            self.write_cursor().store(0, Ordering::Relaxed);
            self.frame_length().store(0, Ordering::Relaxed);
        }
    }
}

/// The append-only side of an allocated frame.
struct RawWriter<const CAP: usize> {
    handle: RawHandle<CAP>,
}

impl<const CAP: usize> RawWriter<CAP> {
    fn frame_length(&self) -> usize {
        self.handle.frame_length().load(Ordering::Acquire) as usize
    }

    fn write_cursor(&self) -> usize {
        self.handle.write_cursor().load(Ordering::Acquire) as usize
    }

    fn is_all_written(&self) -> bool {
        self.write_cursor() == self.frame_length()
    }

    /// Tightens the declared frame length to the number of bytes already
    /// written. One-shot and irreversible: called again it is a no-op,
    /// since the new length always equals the (unchanged) write cursor.
    fn shrink_to_fit(&mut self) {
        let written = self.write_cursor();
        self.handle.set_frame_length(written);
    }

    fn reader(&self) -> RawReader<CAP> {
        RawReader {
            handle: self.handle.clone_ref(),
            read_cursor: 0,
        }
    }
}

impl<const CAP: usize> Writable for RawWriter<CAP> {
    fn poll_writable(&mut self, n: usize) -> Poll<LengthResult> {
        let remaining = self.frame_length() - self.write_cursor();
        if n <= remaining {
            Poll::Ready(LengthResult::Ok)
        } else {
            Poll::Ready(LengthResult::NotEnoughLength)
        }
    }

    fn write_unchecked(&mut self, b: u8) {
        let cursor = self.write_cursor();
        assert!(
            cursor < self.frame_length(),
            "write past declared frame length"
        );
        unsafe {
            self.handle.data_mut_ptr().add(cursor).write(b);
        }
        self.handle
            .write_cursor()
            .store((cursor + 1) as u8, Ordering::Release);
    }
}

/// The read-only, freely cloneable side of an allocated frame.
struct RawReader<const CAP: usize> {
    handle: RawHandle<CAP>,
    read_cursor: usize,
}

impl<const CAP: usize> RawReader<CAP> {
    fn frame_length(&self) -> usize {
        self.handle.frame_length().load(Ordering::Acquire) as usize
    }

    fn write_cursor(&self) -> usize {
        self.handle.write_cursor().load(Ordering::Acquire) as usize
    }

    fn is_all_read(&self) -> bool {
        self.read_cursor == self.frame_length()
    }

    fn clone_fresh(&self) -> Self {
        Self {
            handle: self.handle.clone_ref(),
            read_cursor: 0,
        }
    }

    fn subreader(&self) -> Self {
        Self {
            handle: self.handle.clone_ref(),
            read_cursor: self.read_cursor,
        }
    }
}

impl<const CAP: usize> Readable for RawReader<CAP> {
    fn poll_readable(&mut self, n: usize) -> Poll<LengthResult> {
        let declared = self.frame_length();
        if self.read_cursor + n > declared {
            return Poll::Ready(LengthResult::NotEnoughLength);
        }
        if self.read_cursor + n <= self.write_cursor() {
            Poll::Ready(LengthResult::Ok)
        } else {
            Poll::Pending
        }
    }

    fn read_unchecked(&mut self) -> u8 {
        assert!(self.read_cursor < self.write_cursor(), "read past write cursor");
        let b = unsafe { self.handle.data_ptr().add(self.read_cursor).read() };
        self.read_cursor += 1;
        b
    }
}

/// Which size class backs a frame handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Short,
    Large,
}

/// Append-only view over a newly allocated frame.
pub enum FrameWriter {
    Short(RawWriter<SHORT_LEN>),
    Large(RawWriter<MTU>),
}

impl FrameWriter {
    pub fn size_class(&self) -> SizeClass {
        match self {
            FrameWriter::Short(_) => SizeClass::Short,
            FrameWriter::Large(_) => SizeClass::Large,
        }
    }

    pub fn frame_length(&self) -> usize {
        match self {
            FrameWriter::Short(w) => w.frame_length(),
            FrameWriter::Large(w) => w.frame_length(),
        }
    }

    pub fn write_cursor(&self) -> usize {
        match self {
            FrameWriter::Short(w) => w.write_cursor(),
            FrameWriter::Large(w) => w.write_cursor(),
        }
    }

    pub fn remaining_budget(&self) -> usize {
        self.frame_length() - self.write_cursor()
    }

    pub fn is_all_written(&self) -> bool {
        match self {
            FrameWriter::Short(w) => w.is_all_written(),
            FrameWriter::Large(w) => w.is_all_written(),
        }
    }

    pub fn shrink_frame_length_to_fit(&mut self) {
        match self {
            FrameWriter::Short(w) => w.shrink_to_fit(),
            FrameWriter::Large(w) => w.shrink_to_fit(),
        }
    }

    pub fn reader(&self) -> FrameReader {
        match self {
            FrameWriter::Short(w) => FrameReader::Short(w.reader()),
            FrameWriter::Large(w) => FrameReader::Large(w.reader()),
        }
    }
}

impl Writable for FrameWriter {
    fn poll_writable(&mut self, n: usize) -> Poll<LengthResult> {
        match self {
            FrameWriter::Short(w) => w.poll_writable(n),
            FrameWriter::Large(w) => w.poll_writable(n),
        }
    }

    fn write_unchecked(&mut self, b: u8) {
        match self {
            FrameWriter::Short(w) => w.write_unchecked(b),
            FrameWriter::Large(w) => w.write_unchecked(b),
        }
    }
}

/// Read-only, cloneable view over an allocated frame.
pub enum FrameReader {
    Short(RawReader<SHORT_LEN>),
    Large(RawReader<MTU>),
}

impl FrameReader {
    pub fn size_class(&self) -> SizeClass {
        match self {
            FrameReader::Short(_) => SizeClass::Short,
            FrameReader::Large(_) => SizeClass::Large,
        }
    }

    pub fn frame_length(&self) -> usize {
        match self {
            FrameReader::Short(r) => r.frame_length(),
            FrameReader::Large(r) => r.frame_length(),
        }
    }

    pub fn is_all_read(&self) -> bool {
        match self {
            FrameReader::Short(r) => r.is_all_read(),
            FrameReader::Large(r) => r.is_all_read(),
        }
    }

    /// A fresh clone of this handle, with its own read cursor reset to zero.
    pub fn clone_fresh(&self) -> Self {
        match self {
            FrameReader::Short(r) => FrameReader::Short(r.clone_fresh()),
            FrameReader::Large(r) => FrameReader::Large(r.clone_fresh()),
        }
    }

    /// A clone of this handle that preserves the current read cursor.
    pub fn subreader(&self) -> Self {
        match self {
            FrameReader::Short(r) => FrameReader::Short(r.subreader()),
            FrameReader::Large(r) => FrameReader::Large(r.subreader()),
        }
    }
}

impl Readable for FrameReader {
    fn poll_readable(&mut self, n: usize) -> Poll<LengthResult> {
        match self {
            FrameReader::Short(r) => r.poll_readable(n),
            FrameReader::Large(r) => r.poll_readable(n),
        }
    }

    fn read_unchecked(&mut self) -> u8 {
        match self {
            FrameReader::Short(r) => r.read_unchecked(),
            FrameReader::Large(r) => r.read_unchecked(),
        }
    }
}

/// `'static` backing storage for both size classes. Declare one instance as
/// a `static` and call [`FramePoolStorage::take`] exactly once.
pub struct FramePoolStorage {
    short: ArenaStorage<SHORT_LEN, SHORT_POOL_COUNT>,
    large: ArenaStorage<MTU, LARGE_POOL_COUNT>,
}

impl FramePoolStorage {
    pub const fn new() -> Self {
        Self {
            short: ArenaStorage::new(),
            large: ArenaStorage::new(),
        }
    }

    pub fn take(&'static self) -> Option<FramePool> {
        let short = self.short.take()?;
        let large = self.large.take()?;
        Some(FramePool { short, large })
    }
}

impl Default for FramePoolStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// The live allocator for both size classes.
pub struct FramePool {
    short: ArenaSlice<SHORT_LEN>,
    large: ArenaSlice<MTU>,
}

impl FramePool {
    /// Allocates a frame able to hold at least `length` bytes, classified
    /// into the short or large pool by `length`.
    pub fn allocate(&mut self, length: usize) -> Poll<(FrameWriter, FrameReader)> {
        if length <= SHORT_LEN {
            self.allocate_short(length)
        } else {
            self.allocate_large(length)
        }
    }

    /// Always allocates from the large pool, with the full MTU as budget.
    pub fn allocate_max_length(&mut self) -> Poll<(FrameWriter, FrameReader)> {
        self.allocate_large(MTU)
    }

    fn allocate_short(&mut self, length: usize) -> Poll<(FrameWriter, FrameReader)> {
        match self.short.allocate_raw() {
            Some(handle) => {
                handle.set_frame_length(length);
                let writer = RawWriter { handle };
                let reader = writer.reader();
                Poll::Ready((FrameWriter::Short(writer), FrameReader::Short(reader)))
            }
            None => Poll::Pending,
        }
    }

    fn allocate_large(&mut self, length: usize) -> Poll<(FrameWriter, FrameReader)> {
        match self.large.allocate_raw() {
            Some(handle) => {
                handle.set_frame_length(length);
                let writer = RawWriter { handle };
                let reader = writer.reader();
                Poll::Ready((FrameWriter::Large(writer), FrameReader::Large(reader)))
            }
            None => Poll::Pending,
        }
    }

    pub fn count_allocatable_short(&self) -> usize {
        self.short.count_allocatable()
    }

    pub fn count_allocatable_large(&self) -> usize {
        self.large.count_allocatable()
    }
}
