use std::alloc::{alloc, dealloc, Layout};
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

type DestroyFn = unsafe fn(*mut u8);

struct DestroyOp {
    ptr: *mut u8,
    destroy: DestroyFn,
}

/// Bump allocator with a single backing block whose size is fixed up front.
///
/// The normalizer charges `align + size - 1` bytes per arena-allocated slot,
/// which upper-bounds the space needed regardless of the order objects are
/// constructed in. The block is never reallocated, so object addresses are
/// stable for the allocator's whole lifetime.
///
/// Destruction runs in reverse registration order when the allocator is
/// dropped, before the block itself is released. Only objects explicitly
/// registered (non-trivially-destructible arena objects and adopted heap
/// boxes) are destroyed.
pub(crate) struct FixedSizeAllocator {
    buf: Option<NonNull<u8>>,
    capacity: usize,
    used: Cell<usize>,
    destroy_list: RefCell<Vec<DestroyOp>>,
}

impl FixedSizeAllocator {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let buf = if capacity == 0 {
            None
        } else {
            let layout = Layout::from_size_align(capacity, 1).expect("arena layout");
            let ptr = unsafe { alloc(layout) };
            Some(NonNull::new(ptr).expect("arena allocation failed"))
        };
        FixedSizeAllocator {
            buf,
            capacity,
            used: Cell::new(0),
            destroy_list: RefCell::new(Vec::new()),
        }
    }

    /// Carves an aligned slice out of the block. Exceeding the accounted
    /// capacity is a bug in size accounting, not a user error.
    fn alloc_raw(&self, size: usize, align: usize) -> *mut u8 {
        let base = self
            .buf
            .expect("allocation from an arena sized to zero")
            .as_ptr() as usize;
        let start = (base + self.used.get() + align - 1) & !(align - 1);
        let end = start - base + size;
        assert!(
            end <= self.capacity,
            "arena exhausted: the size accounting pass missed an allocation"
        );
        self.used.set(end);
        start as *mut u8
    }

    /// Moves `value` into the arena. Registers a destroy op when the type
    /// actually has one.
    pub(crate) unsafe fn construct<T>(&self, value: T) -> *mut T {
        let ptr = self.alloc_raw(std::mem::size_of::<T>(), std::mem::align_of::<T>()) as *mut T;
        ptr.write(value);
        if std::mem::needs_drop::<T>() {
            self.destroy_list.borrow_mut().push(DestroyOp {
                ptr: ptr as *mut u8,
                destroy: drop_in_place_thunk::<T>,
            });
        }
        ptr
    }

    /// Adopts a heap-allocated object whose (possibly fat) pointer has been
    /// written to `cell`. The box is reconstructed and dropped at teardown.
    pub(crate) unsafe fn adopt_boxed<T: ?Sized + 'static>(&self, cell: *mut u8) {
        self.destroy_list.borrow_mut().push(DestroyOp {
            ptr: cell,
            destroy: drop_boxed_cell_thunk::<T>,
        });
    }

    pub(crate) fn bytes_used(&self) -> usize {
        self.used.get()
    }
}

unsafe fn drop_in_place_thunk<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T)
}

unsafe fn drop_boxed_cell_thunk<T: ?Sized>(cell: *mut u8) {
    let fat = *(cell as *mut *mut T);
    drop(Box::from_raw(fat));
}

impl Drop for FixedSizeAllocator {
    fn drop(&mut self) {
        let ops = std::mem::take(&mut *self.destroy_list.borrow_mut());
        for op in ops.into_iter().rev() {
            unsafe { (op.destroy)(op.ptr) };
        }
        if let Some(buf) = self.buf {
            let layout = Layout::from_size_align(self.capacity, 1).expect("arena layout");
            unsafe { dealloc(buf.as_ptr(), layout) };
        }
    }
}

/// Bytes to charge for one slot of the given layout: enough for the object
/// plus the worst-case alignment adjustment.
pub(crate) fn slot_bytes(size: usize, align: usize) -> usize {
    align + size - 1
}

pub(crate) fn slot_bytes_of<T>() -> usize {
    slot_bytes(std::mem::size_of::<T>(), std::mem::align_of::<T>())
}

/// Bytes for the typed pointer cell of a key (one word for sized keys, two
/// for trait objects).
pub(crate) fn cell_bytes_of<K: ?Sized>() -> usize {
    slot_bytes(
        std::mem::size_of::<*const K>(),
        std::mem::align_of::<*const K>(),
    )
}
