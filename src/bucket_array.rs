//! The grouped bucket array: the storage engine beneath a node-based,
//! closed-addressing hash table.
//!
//! A [`GroupedBucketArray`] owns two manually allocated buffers: an array of
//! [`Bucket`]s (each the head of a singly-linked chain of caller-owned
//! [`Node`]s) and an array of bucket groups. Each group covers one
//! machine-word-sized run of buckets and tracks their occupancy in a bitmask;
//! groups with at least one occupied bucket are additionally threaded into a
//! circular doubly-linked list anchored at the group owning the sentinel
//! bucket. Whole-table iteration walks set bits within a group and follows
//! the group list across groups, so it costs O(occupied buckets + occupied
//! groups) no matter how sparse the bucket array is.
//!
//! The engine never allocates, constructs, or destroys nodes or their
//! payloads. The table layer built on top of it computes hashes, owns the
//! nodes, and calls in here only to map hashes to buckets and to link or
//! unlink already-constructed nodes.

use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::size_policy;

/// Number of buckets covered by one group: the bit width of the mask word.
const WIDTH: usize = usize::BITS as usize;

#[inline(always)]
fn set_bit(n: usize) -> usize {
    1 << n
}

#[inline(always)]
fn reset_bit(n: usize) -> usize {
    !(1 << n)
}

/// Mask with bits `0..n` cleared and the rest set. `n` must be in
/// `1..=WIDTH`.
#[inline(always)]
fn reset_first_bits(n: usize) -> usize {
    debug_assert!(n >= 1 && n <= WIDTH);
    !(usize::MAX >> (WIDTH - n))
}

/// A chain node owned by the table layer.
///
/// Holds the forward link and raw storage for exactly one element. The
/// engine reads and writes the link but never touches the payload: the
/// caller constructs the value into [`storage_mut`](Node::storage_mut)
/// before linking the node and destroys it after unlinking. The storage is
/// never implicitly initialized or dropped here.
pub struct Node<T> {
    next: Option<NonNull<Node<T>>>,
    storage: MaybeUninit<T>,
}

impl<T> Node<T> {
    /// Creates an unlinked node with uninitialized payload storage.
    pub const fn new() -> Self {
        Self {
            next: None,
            storage: MaybeUninit::uninit(),
        }
    }

    /// The next node in this node's bucket chain, if any.
    #[inline(always)]
    pub fn next(&self) -> Option<NonNull<Node<T>>> {
        self.next
    }

    /// The payload storage.
    pub fn storage(&self) -> &MaybeUninit<T> {
        &self.storage
    }

    /// Mutable payload storage; construct the element here before linking
    /// the node into an array.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use grouped_buckets::Node;
    ///
    /// let mut node: Node<String> = Node::new();
    /// node.storage_mut().write("hello".to_string());
    /// // SAFETY: the payload was just initialized.
    /// assert_eq!(unsafe { node.value() }, "hello");
    /// unsafe { node.storage_mut().assume_init_drop() };
    /// ```
    pub fn storage_mut(&mut self) -> &mut MaybeUninit<T> {
        &mut self.storage
    }

    /// Returns a reference to the payload.
    ///
    /// # Safety
    ///
    /// The payload must have been initialized and not yet destroyed.
    pub unsafe fn value(&self) -> &T {
        // SAFETY: Caller guarantees the payload is initialized.
        unsafe { self.storage.assume_init_ref() }
    }

    /// Returns a mutable reference to the payload.
    ///
    /// # Safety
    ///
    /// The payload must have been initialized and not yet destroyed.
    pub unsafe fn value_mut(&mut self) -> &mut T {
        // SAFETY: Caller guarantees the payload is initialized.
        unsafe { self.storage.assume_init_mut() }
    }
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single hash slot: the head of a singly-linked chain of nodes whose
/// hashes map to this bucket.
pub struct Bucket<T> {
    next: Option<NonNull<Node<T>>>,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bucket<T> {
    /// Creates an empty bucket.
    pub const fn new() -> Self {
        Self { next: None }
    }

    /// The first node of this bucket's chain, if any.
    #[inline(always)]
    pub fn head(&self) -> Option<NonNull<Node<T>>> {
        self.next
    }

    /// Returns `true` if no node is chained under this bucket.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.next.is_none()
    }

    /// Detaches and returns this bucket's whole chain, leaving the bucket
    /// empty.
    ///
    /// The occupancy bit for this bucket is **not** updated; after a bulk
    /// operation that empties buckets this way, the caller must run
    /// [`GroupedBucketArray::unlink_empty_buckets`] before relying on
    /// iteration again. Node ownership stays with the caller.
    pub fn take_head(&mut self) -> Option<NonNull<Node<T>>> {
        self.next.take()
    }
}

/// Occupancy metadata for one `WIDTH`-sized run of buckets.
///
/// `bitmask` bit `k` is set iff bucket `k` of the covered run is non-empty.
/// `next`/`prev` thread the group into the circular list of groups with a
/// non-zero mask; both are `None` while the group is unlinked. `buckets`
/// points at the first covered bucket and is (re)assigned whenever the group
/// is activated.
struct BucketGroup<T> {
    buckets: Option<NonNull<Bucket<T>>>,
    bitmask: usize,
    next: Option<NonNull<BucketGroup<T>>>,
    prev: Option<NonNull<BucketGroup<T>>>,
}

impl<T> Default for BucketGroup<T> {
    fn default() -> Self {
        Self {
            buckets: None,
            bitmask: 0,
            next: None,
            prev: None,
        }
    }
}

/// A fixed-length, manually managed buffer of default-initialized elements.
///
/// Allocation failure aborts via `handle_alloc_error`; the buffer is
/// deallocated exactly once on drop and dropping the empty state is a no-op.
struct RawArray<T> {
    ptr: NonNull<T>,
    len: usize,
    _phantom: PhantomData<T>,
}

impl<T: Default> RawArray<T> {
    fn new(len: usize) -> Self {
        if len == 0 {
            return Self {
                ptr: NonNull::dangling(),
                len: 0,
                _phantom: PhantomData,
            };
        }

        let layout = Layout::array::<T>(len).expect("allocation size overflow");
        // SAFETY: The layout has non-zero size. A null return is routed to
        // `handle_alloc_error`, and every slot is initialized before the
        // buffer is handed out.
        unsafe {
            let raw = alloc::alloc::alloc(layout) as *mut T;
            if raw.is_null() {
                handle_alloc_error(layout);
            }
            for i in 0..len {
                raw.add(i).write(T::default());
            }
            Self {
                ptr: NonNull::new_unchecked(raw),
                len,
                _phantom: PhantomData,
            }
        }
    }
}

impl<T> RawArray<T> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    fn as_slice(&self) -> &[T] {
        // SAFETY: `ptr` is valid for `len` initialized elements.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline(always)]
    fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: `ptr` is valid for `len` initialized elements.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Pointer to the element at `index`.
    #[inline(always)]
    fn ptr_at(&self, index: usize) -> NonNull<T> {
        assert!(index < self.len);
        // SAFETY: `index` was just checked against `len`.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(index)) }
    }
}

impl<T> Drop for RawArray<T> {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }

        // SAFETY: The buffer was allocated with this exact layout and every
        // slot was initialized in `new`.
        unsafe {
            if core::mem::needs_drop::<T>() {
                core::ptr::drop_in_place(core::ptr::slice_from_raw_parts_mut(
                    self.ptr.as_ptr(),
                    self.len,
                ));
            }
            let layout = Layout::array::<T>(self.len).expect("allocation size overflow");
            alloc::alloc::dealloc(self.ptr.as_ptr().cast(), layout);
        }
    }
}

/// A position in a [`GroupedBucketArray`]: one bucket paired with the group
/// covering it.
///
/// Insertion and removal must update both the bucket's chain and its group's
/// mask and linkage together, which is why positions always carry the pair.
/// Obtained from [`GroupedBucketArray::at`], [`begin`], or [`end`]; cursors
/// compare equal when they address the same bucket.
///
/// [`begin`]: GroupedBucketArray::begin
/// [`end`]: GroupedBucketArray::end
pub struct BucketCursor<T> {
    bucket: NonNull<Bucket<T>>,
    group: NonNull<BucketGroup<T>>,
}

impl<T> Clone for BucketCursor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BucketCursor<T> {}

impl<T> PartialEq for BucketCursor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bucket == other.bucket
    }
}

impl<T> Eq for BucketCursor<T> {}

impl<T> BucketCursor<T> {
    /// Raw pointer to the bucket this cursor addresses.
    #[inline(always)]
    pub fn bucket(&self) -> NonNull<Bucket<T>> {
        self.bucket
    }

    /// Advances to the next occupied bucket in the array.
    ///
    /// Clears the mask bits at and below the current offset, takes the
    /// lowest remaining set bit of this group's mask, and if the group is
    /// exhausted follows the active-list link to the next occupied group.
    /// The sentinel bucket is permanently occupied, so the walk always
    /// terminates at [`GroupedBucketArray::end`].
    ///
    /// # Safety
    ///
    /// The cursor must address an occupied bucket (or the sentinel) of a
    /// live array, and the array must not have been mutated in a way that
    /// invalidated this position since the cursor was obtained.
    pub unsafe fn next_occupied(self) -> Self {
        // SAFETY: An occupied bucket's group is in the active list, so its
        // base pointer and `next` link are set, and the neighbor is a live
        // group of the same array.
        unsafe {
            let group = self.group.as_ref();
            let base = group.buckets.unwrap_unchecked();
            let offset = self.bucket.as_ptr().offset_from(base.as_ptr()) as usize;

            let masked = group.bitmask & reset_first_bits(offset + 1);
            let n = masked.trailing_zeros() as usize;
            if n < WIDTH {
                Self {
                    bucket: NonNull::new_unchecked(base.as_ptr().add(n)),
                    group: self.group,
                }
            } else {
                let next = group.next.unwrap_unchecked();
                let next_group = next.as_ref();
                let next_base = next_group.buckets.unwrap_unchecked();
                Self {
                    bucket: NonNull::new_unchecked(
                        next_base
                            .as_ptr()
                            .add(next_group.bitmask.trailing_zeros() as usize),
                    ),
                    group: next,
                }
            }
        }
    }
}

/// The grouped bucket array.
///
/// Owns a buffer of `bucket_count() + 1` buckets (the extra slot is a
/// permanently "occupied" sentinel terminating iteration) and a buffer of
/// `bucket_count() / WIDTH + 1` groups, with the last group hosting the
/// sentinel. Bucket counts are resolved against the prime table in
/// [`size_policy`]; the array never resizes in place — a table grows by
/// constructing a larger array, reinserting every node, and replacing the
/// old array wholesale, which leaves node addresses untouched.
///
/// Nodes are owned by the caller. All linking operations are `unsafe` and
/// preconditioned on the caller's structural guarantees; violations are
/// undefined behavior, backed by debug assertions rather than recoverable
/// errors.
///
/// # Examples
///
/// ```rust
/// use core::ptr::NonNull;
///
/// use grouped_buckets::GroupedBucketArray;
/// use grouped_buckets::Node;
///
/// let mut array: GroupedBucketArray<u32> = GroupedBucketArray::new(0);
/// assert_eq!(array.bucket_count(), 13);
///
/// let mut node = Box::new(Node::new());
/// node.storage_mut().write(7);
/// let ptr = NonNull::from(&mut *node);
///
/// let itb = array.at(array.position(7));
/// // SAFETY: the node is live and not linked anywhere else.
/// unsafe { array.insert_node(itb, ptr) };
/// assert_eq!(array.iter().count(), 1);
///
/// unsafe { array.extract_node(itb, ptr) };
/// assert_eq!(array.iter().count(), 0);
/// ```
pub struct GroupedBucketArray<T> {
    size_index: usize,
    size: usize,
    buckets: RawArray<Bucket<T>>,
    groups: RawArray<BucketGroup<T>>,
}

impl<T> Debug for GroupedBucketArray<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::vec::Vec;

        f.debug_struct("GroupedBucketArray")
            .field("bucket_count", &self.size)
            .field(
                "occupied_buckets",
                &self
                    .buckets
                    .as_slice()
                    .iter()
                    .take(self.size)
                    .filter(|b| !b.is_empty())
                    .count(),
            )
            .field(
                "active_groups",
                &self
                    .groups
                    .as_slice()
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g.bitmask != 0)
                    .map(|(i, g)| format!("{i}:{:016X}", g.bitmask))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<T> GroupedBucketArray<T> {
    /// Creates an array with at least `min_buckets` buckets.
    ///
    /// The bucket count is the smallest tabled prime not below
    /// `min_buckets`. Both buffers are freshly allocated; the sentinel
    /// bucket's group starts as the sole member of the active list.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use grouped_buckets::GroupedBucketArray;
    ///
    /// let array: GroupedBucketArray<String> = GroupedBucketArray::new(100);
    /// assert_eq!(array.bucket_count(), 193);
    /// ```
    pub fn new(min_buckets: usize) -> Self {
        let size_index = size_policy::size_index(min_buckets);
        let size = size_policy::size(size_index);

        // If the group allocation aborts or unwinds, dropping `buckets`
        // releases the first buffer.
        let buckets = RawArray::new(size + 1);
        let groups = RawArray::new(size / WIDTH + 1);

        let mut this = Self {
            size_index,
            size,
            buckets,
            groups,
        };
        this.link_sentinel();
        this
    }

    /// Anchors the last group on the sentinel bucket and makes it the sole
    /// member of the active list.
    fn link_sentinel(&mut self) {
        let sentinel_base = self.buckets.ptr_at(WIDTH * (self.size / WIDTH));
        let last = self.groups.len() - 1;
        let sentinel = self.groups.ptr_at(last);

        let group = &mut self.groups.as_mut_slice()[last];
        group.buckets = Some(sentinel_base);
        group.bitmask = set_bit(self.size % WIDTH);
        group.next = Some(sentinel);
        group.prev = Some(sentinel);
    }

    /// The number of real buckets (the sentinel slot is not counted).
    pub fn bucket_count(&self) -> usize {
        self.size
    }

    /// Maps a hash to a bucket index in `[0, bucket_count())`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use grouped_buckets::GroupedBucketArray;
    ///
    /// let array: GroupedBucketArray<u8> = GroupedBucketArray::new(0);
    /// assert_eq!(array.position(5), 5 % 13);
    /// ```
    #[inline(always)]
    pub fn position(&self, hash: u64) -> usize {
        size_policy::position(hash, self.size_index)
    }

    /// Returns the cursor for bucket `n` paired with its covering group.
    ///
    /// `n == bucket_count()` addresses the sentinel and equals [`end`].
    ///
    /// # Panics
    ///
    /// Panics if `n > bucket_count()`.
    ///
    /// [`end`]: GroupedBucketArray::end
    pub fn at(&self, n: usize) -> BucketCursor<T> {
        assert!(n <= self.size, "bucket index out of range");
        BucketCursor {
            bucket: self.buckets.ptr_at(n),
            group: self.groups.ptr_at(n / WIDTH),
        }
    }

    /// Cursor at the first occupied bucket, or [`end`] if the array is
    /// empty.
    ///
    /// [`end`]: GroupedBucketArray::end
    pub fn begin(&self) -> BucketCursor<T> {
        // SAFETY: The sentinel bucket is permanently occupied and its group
        // is always in the active list, so advancing from it is valid.
        unsafe { self.end().next_occupied() }
    }

    /// Cursor at the sentinel bucket, the iteration terminator. Not
    /// incrementable.
    pub fn end(&self) -> BucketCursor<T> {
        self.at(self.size)
    }

    /// The index of the bucket a cursor addresses.
    ///
    /// The cursor must have been obtained from this array.
    pub fn bucket_index(&self, itb: BucketCursor<T>) -> usize {
        let base = self.buckets.ptr_at(0).as_ptr() as usize;
        let index = (itb.bucket.as_ptr() as usize - base) / core::mem::size_of::<Bucket<T>>();
        debug_assert!(index <= self.size);
        index
    }

    /// The real buckets as a slice (the sentinel is excluded).
    ///
    /// Intended for bulk operations in the table layer, such as walking
    /// every chain during a clear.
    pub fn buckets(&self) -> &[Bucket<T>] {
        &self.buckets.as_slice()[..self.size]
    }

    /// Mutable access to the real buckets.
    ///
    /// Emptying a bucket through [`Bucket::take_head`] leaves its occupancy
    /// bit stale; run [`unlink_empty_buckets`] afterwards.
    ///
    /// [`unlink_empty_buckets`]: GroupedBucketArray::unlink_empty_buckets
    pub fn buckets_mut(&mut self) -> &mut [Bucket<T>] {
        let size = self.size;
        &mut self.buckets.as_mut_slice()[..size]
    }

    /// Pushes `node` onto the front of the chain at `itb`.
    ///
    /// If the bucket was empty, its occupancy bit is set; if its group's
    /// mask was zero, the group is first spliced into the active list right
    /// after the sentinel group. Pure pointer relinking; cannot fail.
    ///
    /// # Safety
    ///
    /// `itb` must come from this array. `node` must be live, not linked
    /// into any bucket chain, and must stay live until it is extracted.
    pub unsafe fn insert_node(&mut self, itb: BucketCursor<T>, node: NonNull<Node<T>>) {
        // SAFETY: Forwarded caller contract.
        unsafe { self.link_node(itb, node, None) }
    }

    /// Like [`insert_node`], but when `hint` is given the node is linked
    /// immediately after it instead of at the chain front.
    ///
    /// Tables holding duplicate keys use the hint to keep nodes with
    /// equivalent keys contiguous in chain order; that relative placement is
    /// a guaranteed contract.
    ///
    /// # Safety
    ///
    /// As for [`insert_node`]; additionally `hint`, when present, must be
    /// linked in the chain at `itb`.
    ///
    /// [`insert_node`]: GroupedBucketArray::insert_node
    pub unsafe fn insert_node_hint(
        &mut self,
        itb: BucketCursor<T>,
        node: NonNull<Node<T>>,
        hint: Option<NonNull<Node<T>>>,
    ) {
        // SAFETY: Forwarded caller contract.
        unsafe { self.link_node(itb, node, hint) }
    }

    unsafe fn link_node(
        &mut self,
        itb: BucketCursor<T>,
        node: NonNull<Node<T>>,
        hint: Option<NonNull<Node<T>>>,
    ) {
        // SAFETY: `itb` addresses a bucket and group of this array; `node`
        // (and `hint`, if any) are live nodes per the caller contract.
        unsafe {
            let bucket = itb.bucket.as_ptr();
            if (*bucket).next.is_none() {
                let group = itb.group.as_ptr();
                let n = self.bucket_index(itb);
                if (*group).bitmask == 0 {
                    let last = self.groups.ptr_at(self.groups.len() - 1);
                    (*group).buckets = Some(self.buckets.ptr_at(WIDTH * (n / WIDTH)));
                    (*group).next = (*last.as_ptr()).next;
                    (*(*group).next.unwrap_unchecked().as_ptr()).prev = Some(itb.group);
                    (*group).prev = Some(last);
                    (*last.as_ptr()).next = Some(itb.group);
                }
                (*group).bitmask |= set_bit(n % WIDTH);
            }

            match hint {
                Some(hint) => {
                    (*node.as_ptr()).next = (*hint.as_ptr()).next;
                    (*hint.as_ptr()).next = Some(node);
                }
                None => {
                    (*node.as_ptr()).next = (*bucket).next;
                    (*bucket).next = Some(node);
                }
            }
        }
    }

    /// Unlinks `node` from the chain at `itb`, walking the chain from its
    /// head to find the predecessor link.
    ///
    /// If the bucket becomes empty its occupancy bit is cleared, and if the
    /// group's mask drops to zero the group is spliced out of the active
    /// list. The node's own link is reset so it can be relinked elsewhere.
    ///
    /// # Safety
    ///
    /// `itb` must come from this array and `node` must currently be linked
    /// in the chain at `itb`.
    pub unsafe fn extract_node(&mut self, itb: BucketCursor<T>, node: NonNull<Node<T>>) {
        // SAFETY: The caller guarantees `node` is linked under `itb`, so the
        // chain walk stays within live nodes and terminates at `node`.
        unsafe {
            let mut slot: *mut Option<NonNull<Node<T>>> = &mut (*itb.bucket.as_ptr()).next;
            loop {
                let current = *slot;
                debug_assert!(current.is_some(), "node is not linked in this bucket");
                let current = current.unwrap_unchecked();
                if current == node {
                    break;
                }
                slot = &mut (*current.as_ptr()).next;
            }

            *slot = (*node.as_ptr()).next;
            (*node.as_ptr()).next = None;

            if (*itb.bucket.as_ptr()).next.is_none() {
                self.unlink_bucket(itb);
            }
        }
    }

    /// Unlinks the node following `prev` (or the chain head when `prev` is
    /// `None`) without walking the chain.
    ///
    /// The fast path for mid-iteration erasure, where the caller already
    /// holds the predecessor.
    ///
    /// # Safety
    ///
    /// `itb` must come from this array. With `prev == None` the chain at
    /// `itb` must be non-empty; otherwise `prev` must be linked at `itb`
    /// and have a successor.
    pub unsafe fn extract_node_after(
        &mut self,
        itb: BucketCursor<T>,
        prev: Option<NonNull<Node<T>>>,
    ) {
        // SAFETY: Per the caller contract the addressed slot holds a live
        // node.
        unsafe {
            let slot: *mut Option<NonNull<Node<T>>> = match prev {
                Some(prev) => &mut (*prev.as_ptr()).next,
                None => &mut (*itb.bucket.as_ptr()).next,
            };

            debug_assert!((*slot).is_some(), "no node at this chain position");
            let node = (*slot).unwrap_unchecked();
            *slot = (*node.as_ptr()).next;
            (*node.as_ptr()).next = None;

            if (*itb.bucket.as_ptr()).next.is_none() {
                self.unlink_bucket(itb);
            }
        }
    }

    unsafe fn unlink_bucket(&mut self, itb: BucketCursor<T>) {
        // SAFETY: The bucket was occupied a moment ago, so its group is
        // active and has its base pointer set.
        unsafe {
            let group = itb.group.as_ptr();
            let base = (*group).buckets.unwrap_unchecked();
            let offset = itb.bucket.as_ptr().offset_from(base.as_ptr()) as usize;
            (*group).bitmask &= reset_bit(offset);
            if (*group).bitmask == 0 {
                Self::unlink_group(itb.group);
            }
        }
    }

    unsafe fn unlink_group(group: NonNull<BucketGroup<T>>) {
        // SAFETY: Linked groups always have live neighbors; the sentinel
        // group keeps the list non-empty, so the neighbors outlive the
        // splice.
        unsafe {
            let g = group.as_ptr();
            let next = (*g).next.unwrap_unchecked();
            let prev = (*g).prev.unwrap_unchecked();
            (*next.as_ptr()).prev = Some(prev);
            (*prev.as_ptr()).next = Some(next);
            (*g).next = None;
            (*g).prev = None;
        }
    }

    /// Recomputes every occupancy bit from actual bucket contents and
    /// unlinks groups whose masks drop to zero.
    ///
    /// A full O(bucket_count) sweep, needed after bulk operations that
    /// emptied buckets without going through [`extract_node`] (for example
    /// a table-layer clear via [`Bucket::take_head`]). Never required on
    /// the insert/extract path.
    ///
    /// [`extract_node`]: GroupedBucketArray::extract_node
    pub fn unlink_empty_buckets(&mut self) {
        let last = self.groups.len() - 1;
        for gi in 0..=last {
            // The sentinel group's range past `size % WIDTH` holds only the
            // sentinel bit, which must never be cleared.
            let real = if gi == last { self.size % WIDTH } else { WIDTH };
            let group = self.groups.ptr_at(gi).as_ptr();

            // SAFETY: `gi * WIDTH + offset` indexes a real bucket for every
            // `offset < real`, and `group` points into the owned group
            // buffer.
            unsafe {
                for offset in 0..real {
                    if self.buckets.as_slice()[gi * WIDTH + offset].next.is_none() {
                        (*group).bitmask &= reset_bit(offset);
                    }
                }
                if (*group).bitmask == 0 && (*group).next.is_some() {
                    Self::unlink_group(NonNull::new_unchecked(group));
                }
            }
        }
    }

    /// Empties every bucket chain and resets all group metadata, keeping
    /// the allocated capacity.
    ///
    /// Node ownership stays with the caller: any nodes still linked are
    /// simply forgotten by the array, so the caller must have taken or
    /// destroyed them beforehand to avoid leaking.
    pub fn clear(&mut self) {
        for bucket in self.buckets.as_mut_slice() {
            bucket.next = None;
        }
        for group in self.groups.as_mut_slice() {
            *group = BucketGroup::default();
        }
        self.link_sentinel();
    }

    /// Iterates over the occupied buckets in O(occupied buckets + occupied
    /// groups), yielding each bucket's index and a reference to it.
    ///
    /// Within a group, buckets are visited in increasing index order.
    pub fn iter(&self) -> Buckets<'_, T> {
        Buckets {
            array: self,
            cursor: self.begin(),
        }
    }

    /// Iterates over the nodes chained under bucket `n`.
    ///
    /// # Safety
    ///
    /// Every node linked in that chain must stay live for the duration of
    /// the borrow.
    ///
    /// # Panics
    ///
    /// Panics if `n >= bucket_count()`.
    pub unsafe fn nodes_in(&self, n: usize) -> NodeIter<'_, T> {
        NodeIter {
            next: self.buckets()[n].head(),
            _marker: PhantomData,
        }
    }
}

/// Iterator over the occupied buckets of a [`GroupedBucketArray`], created
/// by [`GroupedBucketArray::iter`].
pub struct Buckets<'a, T> {
    array: &'a GroupedBucketArray<T>,
    cursor: BucketCursor<T>,
}

impl<'a, T> Iterator for Buckets<'a, T> {
    type Item = (usize, &'a Bucket<T>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == self.array.end() {
            return None;
        }

        let index = self.array.bucket_index(self.cursor);
        // SAFETY: The cursor addresses an occupied bucket inside the
        // borrowed array, and advancing from an occupied bucket is valid.
        unsafe {
            let bucket = &*self.cursor.bucket.as_ptr();
            self.cursor = self.cursor.next_occupied();
            Some((index, bucket))
        }
    }
}

/// Iterator over one bucket's node chain, created by
/// [`GroupedBucketArray::nodes_in`].
pub struct NodeIter<'a, T> {
    next: Option<NonNull<Node<T>>>,
    _marker: PhantomData<&'a Node<T>>,
}

impl<'a, T> Iterator for NodeIter<'a, T> {
    type Item = &'a Node<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        // SAFETY: `nodes_in`'s contract keeps every chained node live for
        // `'a`.
        let node = unsafe { node.as_ref() };
        self.next = node.next();
        Some(node)
    }
}
